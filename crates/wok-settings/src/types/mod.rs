//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so partial JSON files are accepted and missing fields keep their defaults.

mod scheduler;
mod server;

pub use scheduler::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "scheduler": { "maxRedirections": 50, "segmentEncoding": "base36" },
///   "server": { "port": 9000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WokSettings {
    /// Scheduler behavior and header names.
    pub scheduler: SchedulerSettings,
    /// Channel buffer sizes.
    pub channel: ChannelSettings,
    /// Listener settings.
    pub server: ServerSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl WokSettings {
    /// Clamp values that would make the runtime misbehave, logging each fix.
    pub fn validate(&mut self) {
        if self.channel.input_buffer == 0 {
            warn!("channel.inputBuffer must be at least 1, using 1");
            self.channel.input_buffer = 1;
        }
        if self.channel.output_buffer == 0 {
            warn!("channel.outputBuffer must be at least 1, using 1");
            self.channel.output_buffer = 1;
        }
        if self.scheduler.route_header.trim().is_empty() {
            warn!("scheduler.routeHeader is empty, using default");
            self.scheduler.route_header = SchedulerSettings::default().route_header;
        }
        if self.scheduler.deps_header.trim().is_empty() {
            warn!("scheduler.depsHeader is empty, using default");
            self.scheduler.deps_header = SchedulerSettings::default().deps_header;
        }
        if self.scheduler.instance_header.trim().is_empty() {
            warn!("scheduler.instanceHeader is empty, using default");
            self.scheduler.instance_header = SchedulerSettings::default().instance_header;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wok_core::SegmentEncoding;

    #[test]
    fn defaults() {
        let s = WokSettings::default();
        assert_eq!(s.scheduler.max_redirections, 1000);
        assert_eq!(s.scheduler.route_header, "X-Wok-Route");
        assert_eq!(s.scheduler.deps_header, "X-Wok-Deps");
        assert_eq!(s.scheduler.instance_header, "X-Wok-Instance");
        assert_eq!(s.scheduler.segment_encoding, SegmentEncoding::Raw);
        assert_eq!(s.server.host, "127.0.0.1");
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_value(WokSettings::default()).unwrap();
        assert!(json["scheduler"].get("maxRedirections").is_some());
        assert!(json["scheduler"].get("segmentEncoding").is_some());
        assert!(json["channel"].get("inputBuffer").is_some());
        assert!(json["server"].get("shutdownTimeoutMs").is_some());
    }

    #[test]
    fn empty_json_produces_defaults() {
        let s: WokSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.scheduler.max_redirections, 1000);
        assert_eq!(s.channel.input_buffer, 16);
    }

    #[test]
    fn partial_json() {
        let s: WokSettings =
            serde_json::from_str(r#"{"scheduler": {"segmentEncoding": "base36"}}"#).unwrap();
        assert_eq!(s.scheduler.segment_encoding, SegmentEncoding::Base36);
        assert_eq!(s.scheduler.route_header, "X-Wok-Route");
    }

    #[test]
    fn validate_clamps_zero_buffers() {
        let mut s = WokSettings::default();
        s.channel.input_buffer = 0;
        s.channel.output_buffer = 0;
        s.validate();
        assert_eq!(s.channel.input_buffer, 1);
        assert_eq!(s.channel.output_buffer, 1);
    }

    #[test]
    fn validate_restores_blank_headers() {
        let mut s = WokSettings::default();
        s.scheduler.route_header = "  ".into();
        s.validate();
        assert_eq!(s.scheduler.route_header, "X-Wok-Route");
    }
}
