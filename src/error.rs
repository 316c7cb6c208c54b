//! Error handling for the saga orchestration core

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, CoreError>;

/// Top-level error type for the saga orchestration core.
///
/// Variants map onto the error-kind table in the error handling design:
/// validation and business-rule errors are raised before any workflow
/// record exists, transient/permanent collaborator failures drive retry
/// and compensation, and invariant violations indicate a core-internal
/// bug rather than an expected failure mode.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("business rule violation: {0}")]
    BusinessRule(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient collaborator failure: {0}")]
    Transient(String),

    #[error("permanent collaborator failure: {0}")]
    Permanent(String),

    #[error("compensation failed: {0}")]
    Compensation(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] crate::lifecycle::LifecycleError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the step executor should retry this error.
    ///
    /// Only transient collaborator failures are retryable; everything else
    /// (validation, business-rule, permanent, invariant) is final on first
    /// occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    /// Category label used in logging.
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::BusinessRule(_) => "business_rule",
            CoreError::NotFound(_) => "not_found",
            CoreError::Transient(_) => "transient",
            CoreError::Permanent(_) => "permanent",
            CoreError::Compensation(_) => "compensation",
            CoreError::Invariant(_) => "invariant",
            CoreError::Lifecycle(_) => "lifecycle",
            CoreError::Serialization(_) => "serialization",
            CoreError::Database(_) => "database",
            CoreError::Io(_) => "io",
            CoreError::Config(_) => "config",
            CoreError::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = CoreError::Transient("timeout".to_string());
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = CoreError::Validation("missing plan".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "validation");
    }
}
