//! # wok-server
//!
//! Axum front end for the wok scheduler.
//!
//! - One-shot HTTP: every path outside `/health` and `/ws` is resolved by an
//!   [`Application`] and answered with the aggregated JSON output, the route
//!   memo headers and `Vary`
//! - Persistent channel on `/ws`: `REQUEST`/`EVENT`/`CLOSE` frames
//!   multiplexed onto scheduler invocations, answered with
//!   `RESPONSE`/`APPLY`/`DONE`
//! - Graceful shutdown: cancel the root token, wait for the listener and
//!   channel sessions, then drain side-effect plans

#![deny(unsafe_code)]

pub mod app;
pub mod channel;
pub mod config;
pub mod handler;
pub mod health;
pub mod server;
pub mod shutdown;

pub use app::{Application, PathApplication, RequestHead, Resolution};
pub use config::ServerConfig;
pub use handler::{Driver, Reply};
pub use server::WokServer;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
