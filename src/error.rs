//! Error types for iris-approx.
//!
//! Every failure in this crate is surfaced as an [`ApproxError`]. Nothing is
//! retried locally: a failed lookup or batch is returned to the caller as-is.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ApproxError>;

/// Main error type for approximator lookup and batch approximation.
#[derive(Error, Debug)]
pub enum ApproxError {
    /// A descriptor lookup matched zero (or more than one) record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resolved descriptor is not an approximator.
    #[error("Invalid model type: {0}")]
    InvalidModelType(String),

    /// The algorithm tag has no matching engine variant.
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The engine variant does not implement the requested encode call.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Invalid argument passed by a caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed model artifact, feature matrix, or index file.
    #[error("Format error: {0}")]
    Format(String),

    /// I/O error while materializing artifacts or writing outputs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error raised by an external collaborator implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApproxError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApproxError::NotFound(msg.into())
    }

    pub fn invalid_model_type(msg: impl Into<String>) -> Self {
        ApproxError::InvalidModelType(msg.into())
    }

    pub fn unknown_algorithm(msg: impl Into<String>) -> Self {
        ApproxError::UnknownAlgorithm(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        ApproxError::UnsupportedOperation(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ApproxError::InvalidArgument(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        ApproxError::InvalidConfig(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        ApproxError::Format(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApproxError::Internal(msg.into())
    }

    /// Wrap an arbitrary collaborator error message.
    pub fn other(msg: impl std::fmt::Display) -> Self {
        ApproxError::Other(anyhow::anyhow!("{msg}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ApproxError::not_found("approximator named 'lopq-64'");
        assert_eq!(err.to_string(), "Not found: approximator named 'lopq-64'");

        let err = ApproxError::unknown_algorithm("BOGUS");
        assert_eq!(err.to_string(), "Unknown algorithm: BOGUS");
    }

    #[test]
    fn test_io_conversion() {
        fn open_missing() -> Result<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here.npy")?)
        }

        assert!(matches!(open_missing(), Err(ApproxError::Io(_))));
    }

    #[test]
    fn test_other_is_transparent() {
        let err = ApproxError::other("store unavailable");
        assert_eq!(err.to_string(), "store unavailable");
    }
}
