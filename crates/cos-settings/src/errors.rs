//! Settings error types.

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON, or does not fit the schema.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but would leave the client unable to run.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mismatch_is_json_error() {
        let err: SettingsError = serde_json::from_str::<u32>("\"sixty\"").unwrap_err().into();
        assert!(err.to_string().starts_with("malformed settings"));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("session.tickRateHz must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid settings value: session.tickRateHz must be positive"
        );
    }
}
