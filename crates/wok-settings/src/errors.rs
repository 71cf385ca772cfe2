//! Settings error types.

use thiserror::Error;

/// Errors raised while loading `settings.json`.
///
/// Out-of-range values are not errors: `validate()` clamps them with a warning.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not JSON, or a field has the wrong type.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_settings_from_path;

    #[test]
    fn read_failure_converts_to_io() {
        let err: SettingsError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, SettingsError::Io(_)));
        assert_eq!(err.to_string(), "failed to read settings file: denied");
    }

    #[test]
    fn parse_failure_converts_to_json() {
        let err: SettingsError = serde_json::from_str::<serde_json::Value>("{bad}")
            .unwrap_err()
            .into();
        assert!(matches!(err, SettingsError::Json(_)));
        assert!(err.to_string().starts_with("failed to parse settings JSON"));
    }

    #[test]
    fn unreadable_path_surfaces_as_io() {
        // A directory exists but cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_from_path(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Io(_)));
    }

    #[test]
    fn mistyped_field_surfaces_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scheduler": {"maxRedirections": "many"}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }
}
