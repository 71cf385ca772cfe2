//! Persistent channel: frame codec, invocation multiplexer and the
//! WebSocket session that feeds them.

pub mod multiplexer;
pub mod protocol;
pub mod session;

pub use multiplexer::Multiplexer;
pub use protocol::{Command, Frame};
pub use session::run_channel_session;
