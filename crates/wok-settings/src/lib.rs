//! # wok-settings
//!
//! Layered configuration for the scheduler and server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WokSettings::default()`]
//! 2. **Settings file**: `~/.wok/settings.json` or an explicit path (deep-merged)
//! 3. **Environment variables**: `WOK_*` overrides (highest priority)
//!
//! There is no process-wide instance. Load once at startup and pass the
//! value (or the pieces derived from it) to whoever needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
