//! `WokServer`: Axum HTTP + WebSocket front end for the scheduler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use wok_runtime::{SchedulerConfig, TransportClass};
use wok_settings::WokSettings;

use crate::app::{Application, RequestHead};
use crate::channel::run_channel_session;
use crate::config::ServerConfig;
use crate::handler::Driver;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Request driver.
    pub driver: Driver,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// When the server started.
    pub start_time: Instant,
}

/// The wok server.
pub struct WokServer {
    driver: Driver,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
}

impl WokServer {
    /// Create a new server for `app`.
    pub fn new(config: ServerConfig, scheduler: SchedulerConfig, app: Arc<dyn Application>) -> Self {
        let driver = Driver::new(app, scheduler, config);
        let shutdown = ShutdownCoordinator::new(driver.background().clone());
        Self {
            driver,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Server and scheduler configuration from loaded settings.
    pub fn from_settings(settings: &WokSettings, app: Arc<dyn Application>) -> Self {
        Self::new(
            ServerConfig::from(settings),
            SchedulerConfig::from(settings),
            app,
        )
    }

    /// Build the Axum router.
    ///
    /// `/health` and `/ws` are fixed; every other path goes to the
    /// application.
    pub fn router(&self) -> Router {
        let state = AppState {
            driver: self.driver.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .fallback(http_handler)
            .with_state(state)
    }

    /// Bind and serve until shutdown. Returns the bound address.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = self.driver.config();
        let listener =
            tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server stopped with error");
            }
        });

        info!(%addr, "wok server listening");
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Get the request driver.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        self.driver.config()
    }

    /// Open persistent channels.
    pub fn channel_count(&self) -> usize {
        self.shutdown.channel_count()
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.channel_count(),
        state.driver.background().pending_count(),
    ))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.driver.config().max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let channel_id = Uuid::now_v7().to_string();
    let session = run_channel_session(socket, channel_id, state.driver, state.shutdown.token());
    state.shutdown.track_channel(session).await;
}

/// One-shot request. Requests carrying the route header are partial
/// updates; everything else is a full navigation.
async fn http_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let head = RequestHead {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
    };
    let transport = if head.header(&state.driver.config().route_header).is_some() {
        TransportClass::Ajax
    } else {
        TransportClass::Navigation
    };

    let token = state.shutdown.token().child_token();
    let _guard = token.clone().drop_guard();
    let scope = state.driver.scope(&head, transport, token, None);
    let (reply, _) = state.driver.serve(&scope, &head).await;
    reply.into_response()
}
