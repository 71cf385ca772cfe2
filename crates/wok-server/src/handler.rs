//! Drives the scheduler for one request head, independent of transport.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use wok_core::{Output, Params, WokError};
use wok_runtime::{
    BackgroundTracker, HandleStatus, Handled, Scheduler, SchedulerConfig, Scope, TransportClass,
};

use crate::app::{Application, RequestHead, Resolution};
use crate::config::ServerConfig;

/// Header naming the call a request targets.
pub const CALL_HEADER: &str = "X-Wok-Call";

/// Transport-neutral response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Status code.
    pub status: u16,
    /// Headers in emission order.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Bytes,
}

impl Reply {
    fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        for (name, value) in self.headers {
            match (
                axum::http::HeaderName::from_bytes(name.as_bytes()),
                axum::http::HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    let _ = response.headers_mut().append(name, value);
                }
                _ => warn!(header = %name, "dropping invalid response header"),
            }
        }
        response
    }
}

/// Shared request driver used by both HTTP and channel transports.
#[derive(Clone)]
pub struct Driver {
    app: Arc<dyn Application>,
    scheduler: Scheduler,
    config: Arc<ServerConfig>,
    background: BackgroundTracker,
}

impl Driver {
    /// Driver for `app`.
    pub fn new(app: Arc<dyn Application>, scheduler: SchedulerConfig, config: ServerConfig) -> Self {
        Self {
            app,
            scheduler: Scheduler::new(scheduler),
            config: Arc::new(config),
            background: BackgroundTracker::new(),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Side effects spawned by every request served so far.
    pub fn background(&self) -> &BackgroundTracker {
        &self.background
    }

    /// Build the scope for one request or invocation.
    pub fn scope(
        &self,
        head: &RequestHead,
        transport: TransportClass,
        token: CancellationToken,
        stream: Option<(mpsc::Receiver<Params>, mpsc::Sender<Output>)>,
    ) -> Arc<Scope> {
        let mut builder = Scope::builder()
            .token(token)
            .method(head.method.as_str())
            .transport(transport)
            .background(self.background.clone());

        for (name, value) in &head.headers {
            if let Ok(value) = value.to_str() {
                builder = builder.header(name.as_str(), value);
            }
        }

        let instance = head
            .header(&self.config.instance_header)
            .map_or_else(|| Uuid::now_v7().to_string(), str::to_string);
        builder = builder.instance_id(instance);

        if let Some(call) = head.header(CALL_HEADER) {
            builder = builder.call(call);
        }
        if let Some((input, output)) = stream {
            builder = builder.input(input).output(output);
        }

        builder.build(self.scheduler.config())
    }

    /// Resolve and run `head`. The resolution is returned so a channel
    /// invocation can keep following it.
    #[instrument(skip_all, fields(method = %head.method, path = %head.path()))]
    pub async fn serve(
        &self,
        scope: &Arc<Scope>,
        head: &RequestHead,
    ) -> (Reply, Option<Resolution>) {
        let Some(resolution) = self.app.resolve(head) else {
            let err = WokError::RouteNotResolved(head.path().to_string());
            debug!(category = err.category(), error = %err, "request not resolved");
            return (Reply::empty(404), None);
        };

        let handled = self.handle(scope, &resolution).await;
        (self.reply(scope, &handled), Some(resolution))
    }

    /// Rerun `resolution` on every param update until the input stream
    /// or the scope ends. Non-empty results are pushed to the client.
    pub async fn follow(&self, scope: &Arc<Scope>, mut resolution: Resolution) {
        while let Some(update) = scope.recv(scope.token()).await {
            resolution.params.merge(&update);
            let handled = self.handle(scope, &resolution).await;
            match handled.status {
                HandleStatus::Aborted => break,
                HandleStatus::Resolved { .. } if !handled.output.is_nil() => {
                    if scope.send(handled.output, scope.token()).await.is_err() {
                        break;
                    }
                }
                HandleStatus::Resolved { .. } | HandleStatus::BudgetExceeded => {}
            }
        }
    }

    async fn handle(&self, scope: &Arc<Scope>, resolution: &Resolution) -> Handled {
        self.scheduler
            .handle(
                scope,
                &self.app.root(),
                &self.config.route_header,
                resolution.params.clone(),
                resolution.route.clone(),
            )
            .await
    }

    fn reply(&self, scope: &Scope, handled: &Handled) -> Reply {
        if handled.status == HandleStatus::Aborted {
            return match scope.response_override() {
                Some(custom) => Reply {
                    status: custom.status,
                    headers: custom.headers,
                    body: custom.body,
                },
                None => Reply::empty(scope.status_code()),
            };
        }

        let body = match handled.output.to_json() {
            Ok(body) => body,
            Err(err) => {
                warn!(category = err.category(), error = %err, "failed to encode output");
                return Reply::empty(500);
            }
        };

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];

        let mut memo: Vec<(String, String)> = Vec::new();
        for entry in scope.memo().entries() {
            memo.retain(|(name, _)| !name.eq_ignore_ascii_case(&entry.header));
            memo.push((entry.header, entry.value));
        }
        headers.extend(memo);

        let vary = scope.vary_headers();
        if !vary.is_empty() {
            headers.push(("Vary".to_string(), vary.join(", ")));
        }
        if let Some(instance) = scope.instance_id() {
            headers.push((self.config.instance_header.clone(), instance.to_string()));
        }

        Reply {
            status: scope.status_code(),
            headers,
            body: Bytes::from(body),
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .field("background", &self.background)
            .finish_non_exhaustive()
    }
}
