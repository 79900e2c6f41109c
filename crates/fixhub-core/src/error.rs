//! Error types for fixhub-core.

use thiserror::Error;

/// Local, pre-request field check failure.
///
/// Produced before any network request is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Name of the offending field, as shown on the form.
    pub field: &'static str,
    /// Operator-facing message.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for a required field left blank.
    pub fn required(field: &'static str) -> Self {
        Self::new(field, "is required")
    }
}

/// Result type alias for local validation.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
