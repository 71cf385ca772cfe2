//! Scheduler and persistent-channel settings.

use serde::{Deserialize, Serialize};
use wok_core::SegmentEncoding;

/// Scheduler behavior and header names.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Redirects absorbed per call before giving up. The loop runs at most
    /// `max_redirections + 1` iterations.
    pub max_redirections: usize,
    /// Header carrying the route and params the client last received.
    pub route_header: String,
    /// Header listing dependency keys the client already has loaded.
    pub deps_header: String,
    /// Header identifying the client instance across requests.
    pub instance_header: String,
    /// How route segments are written on the wire.
    pub segment_encoding: SegmentEncoding,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_redirections: 1000,
            route_header: "X-Wok-Route".to_string(),
            deps_header: "X-Wok-Deps".to_string(),
            instance_header: "X-Wok-Instance".to_string(),
            segment_encoding: SegmentEncoding::Raw,
        }
    }
}

/// Buffer sizes for multiplexed channel invocations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Capacity of each invocation's `EVENT` input stream.
    pub input_buffer: usize,
    /// Capacity of each invocation's plan output stream.
    pub output_buffer: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            input_buffer: 16,
            output_buffer: 16,
        }
    }
}
