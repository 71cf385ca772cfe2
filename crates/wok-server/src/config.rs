//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wok_settings::WokSettings;

/// Configuration for the wok server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for in-flight work.
    pub shutdown_timeout_ms: u64,
    /// Header carrying the route memo on partial navigations.
    pub route_header: String,
    /// Header carrying the client instance id.
    pub instance_header: String,
    /// Pending `EVENT` updates buffered per invocation.
    pub input_buffer: usize,
    /// Pending `APPLY` outputs buffered per invocation.
    pub output_buffer: usize,
}

impl ServerConfig {
    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&WokSettings::default())
    }
}

impl From<&WokSettings> for ServerConfig {
    fn from(settings: &WokSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            shutdown_timeout_ms: settings.server.shutdown_timeout_ms,
            route_header: settings.scheduler.route_header.clone(),
            instance_header: settings.scheduler.instance_header.clone(),
            input_buffer: settings.channel.input_buffer.max(1),
            output_buffer: settings.channel.output_buffer.max(1),
        }
    }
}
