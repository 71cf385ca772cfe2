//! Scheduler configuration.

use wok_core::SegmentEncoding;
use wok_settings::{SchedulerSettings, WokSettings};

/// Immutable configuration threaded through every `handle` call.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Redirects absorbed before giving up.
    pub max_redirections: usize,
    /// Header listing dependency keys the client already has.
    pub deps_header: String,
    /// How route segments are written on the wire.
    pub segment_encoding: SegmentEncoding,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            max_redirections: settings.max_redirections,
            deps_header: settings.deps_header.clone(),
            segment_encoding: settings.segment_encoding,
        }
    }
}

impl From<&WokSettings> for SchedulerConfig {
    fn from(settings: &WokSettings) -> Self {
        Self::from(&settings.scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_settings() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.max_redirections, 1000);
        assert_eq!(cfg.deps_header, "X-Wok-Deps");
        assert_eq!(cfg.segment_encoding, SegmentEncoding::Raw);
    }

    #[test]
    fn from_settings() {
        let mut settings = WokSettings::default();
        settings.scheduler.max_redirections = 3;
        settings.scheduler.segment_encoding = SegmentEncoding::Base36;
        let cfg = SchedulerConfig::from(&settings);
        assert_eq!(cfg.max_redirections, 3);
        assert_eq!(cfg.segment_encoding, SegmentEncoding::Base36);
    }
}
