//! Error types for the Quotaguard crate.

use thiserror::Error;

/// Main error type for Quotaguard operations.
#[derive(Error, Debug)]
pub enum QuotaguardError {
    /// A rate limit expression could not be parsed
    #[error("Invalid rate limit spec {spec:?}: {reason}")]
    InvalidLimitSpec {
        /// The offending text
        spec: String,
        /// What was wrong with it
        reason: String,
    },

    /// The same path and method were registered twice
    #[error("Endpoint {method} {path} is already registered")]
    DuplicateEndpoint { method: String, path: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuotaguardError {
    pub(crate) fn invalid_spec(spec: &str, reason: impl Into<String>) -> Self {
        QuotaguardError::InvalidLimitSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for QuotaguardError {
    fn from(err: config::ConfigError) -> Self {
        QuotaguardError::Config(err.to_string())
    }
}

/// Result type alias for Quotaguard operations.
pub type Result<T> = std::result::Result<T, QuotaguardError>;
