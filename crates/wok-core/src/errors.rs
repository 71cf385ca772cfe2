//! Error taxonomy for scheduling and transport.

use thiserror::Error;

/// Errors surfaced by the scheduler, plan contexts and the channel protocol.
#[derive(Debug, Error)]
pub enum WokError {
    /// The redirect loop ran out of iterations.
    #[error("redirect budget of {0} iterations exceeded")]
    RedirectBudgetExceeded(usize),

    /// A plan body panicked. The fault is confined to its own instance.
    #[error("plan fault: {0}")]
    PlanFault(String),

    /// The socket stream is gone or the plan context has ended.
    #[error("channel closed")]
    ChannelClosed,

    /// No route matched the incoming request.
    #[error("route not resolved: {0}")]
    RouteNotResolved(String),

    /// A header value could not be decoded.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A persistent-channel frame was malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON encoding failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WokError {
    /// Whether the caller can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RedirectBudgetExceeded(_)
            | Self::PlanFault(_)
            | Self::ChannelClosed
            | Self::RouteNotResolved(_)
            | Self::InvalidHeader { .. } => true,
            Self::Protocol(_) | Self::Json(_) | Self::Io(_) => false,
        }
    }

    /// Error category string for structured logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RedirectBudgetExceeded(_) => "redirect_budget_exceeded",
            Self::PlanFault(_) => "plan_fault",
            Self::ChannelClosed => "channel_closed",
            Self::RouteNotResolved(_) => "route_not_resolved",
            Self::InvalidHeader { .. } => "invalid_header",
            Self::Protocol(_) => "protocol",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for wok operations.
pub type Result<T> = std::result::Result<T, WokError>;
