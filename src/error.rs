//! Error types for uttermill.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UttermillError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Wire / decode errors (fatal for the offending chunk only)
    #[error("Failed to decode audio payload: {message}")]
    DecodeFailed { message: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Job record validation
    #[error("Invalid job record: {message}")]
    InvalidJob { message: String },

    #[error("Sample rate mismatch: buffer at {expected} Hz, chunk at {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, UttermillError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = UttermillError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = UttermillError::ConfigInvalidValue {
            key: "ttl.pending".to_string(),
            message: "must be a positive duration".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for ttl.pending: must be a positive duration"
        );
    }

    #[test]
    fn test_decode_failed_display() {
        let error = UttermillError::DecodeFailed {
            message: "invalid base64".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to decode audio payload: invalid base64"
        );
    }

    #[test]
    fn test_unsupported_format_display() {
        let error = UttermillError::UnsupportedFormat {
            format: "opus".to_string(),
        };
        assert_eq!(error.to_string(), "Unsupported audio format: opus");
    }

    #[test]
    fn test_invalid_job_display() {
        let error = UttermillError::InvalidJob {
            message: "empty session_id".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid job record: empty session_id");
    }

    #[test]
    fn test_sample_rate_mismatch_display() {
        let error = UttermillError::SampleRateMismatch {
            expected: 16000,
            actual: 44100,
        };
        assert_eq!(
            error.to_string(),
            "Sample rate mismatch: buffer at 16000 Hz, chunk at 44100 Hz"
        );
    }

    #[test]
    fn test_other_display() {
        let error = UttermillError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: UttermillError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: UttermillError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<UttermillError>();
        assert_sync::<UttermillError>();
    }
}
