//! Error types for core parsing and validation.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while validating definitions or loading configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid runtime definition `{name}`: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("failed to read config {path}: {reason}")]
    ConfigRead { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("invalid duration `{0}`")]
    InvalidDuration(String),
}

impl CoreError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
