//! Execution context handed to every plan body.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wok_core::{Output, Params, Route, WokError};

use crate::gate::{Gate, RedirectRequest};
use crate::plan::TransportClass;
use crate::scope::{ResponseOverride, Scope};

/// View of the request from one plan instance.
///
/// Cancelled when the instance is retired or the request ends; cancelling
/// one instance never affects its siblings.
#[derive(Clone, Debug)]
pub struct PlanContext {
    scope: Arc<Scope>,
    gate: Arc<Gate>,
    epoch: u64,
    token: CancellationToken,
    route: Route,
    depth: usize,
    params: Params,
    full_params: Params,
    old_params: Params,
}

impl PlanContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scope: Arc<Scope>,
        gate: Arc<Gate>,
        epoch: u64,
        token: CancellationToken,
        route: Route,
        depth: usize,
        params: Params,
        full_params: Params,
        old_params: Params,
    ) -> Self {
        Self {
            scope,
            gate,
            epoch,
            token,
            route,
            depth,
            params,
            full_params,
            old_params,
        }
    }

    // ── Request view ──

    /// Params this plan declared, or all params if it declared none.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// First value of a param.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.first(key)
    }

    /// The same snapshot taken from what the client last received.
    pub fn old_params(&self) -> &Params {
        &self.old_params
    }

    /// Requested route.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Tree depth this plan is attached at.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Instance token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the instance was retired or the request ended.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the instance is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// HTTP method.
    pub fn method(&self) -> &str {
        self.scope.method()
    }

    /// How the request arrived.
    pub fn transport(&self) -> TransportClass {
        self.scope.transport()
    }

    /// Client instance identity.
    pub fn instance_id(&self) -> Option<&str> {
        self.scope.instance_id()
    }

    /// Request header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.scope.header(name)
    }

    // ── Redirects ──

    fn post(&self, request: RedirectRequest) -> bool {
        debug!(depth = self.depth, "plan posted redirect");
        self.gate.post_redirect(self.epoch, request)
    }

    /// Redirect to an absolute route with new params.
    pub fn redirect(&self, route: Route, params: Params) -> bool {
        self.post(RedirectRequest {
            route: Some(route),
            params: Some(params),
        })
    }

    /// Redirect below this plan's depth: the route prefix up to and
    /// excluding this plan's segment is kept and `tail` appended.
    pub fn partial_redirect(&self, tail: Route, params: Params) -> bool {
        let route = self.route.prefix(self.depth).join(tail.iter().cloned());
        self.post(RedirectRequest {
            route: Some(route),
            params: Some(params),
        })
    }

    /// Keep the route, replace the params.
    pub fn params_redirect(&self, params: Params) -> bool {
        self.post(RedirectRequest {
            route: None,
            params: Some(params),
        })
    }

    /// Redirect to a modified copy of the full request params.
    pub fn change_params(&self, modify: impl FnOnce(&mut Params)) -> bool {
        let mut params = self.full_params.clone();
        modify(&mut params);
        self.params_redirect(params)
    }

    // ── Dependencies ──

    /// Register dependency keys for as long as this instance lives.
    pub fn load<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.scope.deduper().load(key.as_ref(), &self.token);
        }
    }

    // ── Response control ──

    /// Take over the response. Returns whether this plan won.
    pub fn handle_response(&self, response: ResponseOverride) -> bool {
        self.scope.handle_response(response)
    }

    /// Respond with no body and the current status code.
    pub fn use_empty_body(&self) -> bool {
        self.handle_response(ResponseOverride::new(self.scope.status_code()))
    }

    /// Respond with `body` and the current status code.
    pub fn use_custom_body(&self, body: impl Into<Bytes>, content_type: &str) -> bool {
        self.handle_response(
            ResponseOverride::new(self.scope.status_code())
                .header("Content-Type", content_type)
                .body(body),
        )
    }

    /// Respond with an HTTP redirect.
    pub fn url_redirect(&self, status: u16, location: &str) -> bool {
        self.handle_response(ResponseOverride::new(status).header("Location", location))
    }

    /// Current status code.
    pub fn status_code(&self) -> u16 {
        self.scope.status_code()
    }

    /// Set the status code.
    pub fn set_status_code(&self, status: u16) {
        self.scope.set_status_code(status);
    }

    /// Add headers to `Vary` for the rest of the request.
    pub fn vary<I, S>(&self, headers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope.vary(headers);
    }

    /// Add headers to `Vary` while this instance lives.
    pub fn context_vary<I, S>(&self, headers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope.context_vary(headers, &self.token);
    }

    // ── Streams ──

    /// Push output to the client. Fails with
    /// [`WokError::ChannelClosed`] once the instance ends or when the
    /// transport has no output stream.
    pub async fn send(&self, output: Output) -> Result<(), WokError> {
        self.scope.send(output, &self.token).await
    }

    /// Next param update from the client.
    pub async fn recv(&self) -> Option<Params> {
        self.scope.recv(&self.token).await
    }
}
