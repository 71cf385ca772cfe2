//! # wok
//!
//! Server binary: loads settings, initializes logging and serves the demo
//! plan tree over HTTP and the persistent channel.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use wok_server::{PathApplication, WokServer};
use wok_settings::WokSettings;

/// wok scheduler server.
#[derive(Parser, Debug)]
#[command(name = "wok", about = "Controller-diff scheduler server")]
struct Cli {
    /// Settings file (defaults to `~/.wok/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Log level filter (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load settings and fold command-line overrides in.
    fn settings(&self) -> Result<WokSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(wok_settings::settings_path);
        let mut settings = wok_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        Ok(settings)
    }
}

fn init_logging(settings: &WokSettings) {
    if settings.logging.json {
        wok_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        wok_core::logging::init_subscriber(&settings.logging.level);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.settings()?;
    init_logging(&settings);

    let app = PathApplication::new(demo::tree().into_root()).reload_on_events();
    let server = WokServer::from_settings(&settings, Arc::new(app));
    let (addr, handle) = server
        .listen()
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    tracing::info!("wok listening on http://{addr} (channel at ws://{addr}/ws)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let report = server
        .shutdown()
        .graceful_shutdown(handle, server.config().shutdown_timeout())
        .await;
    if !report.side_effects_drained {
        tracing::warn!("side effects still running at exit");
    }
    Ok(())
}
