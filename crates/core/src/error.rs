//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (field validation, invariants,
/// malformed identifiers). Storage failures have their own error type in `stockroom-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A field failed validation (blank, too long, out of range).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Fails with `Validation` when `value` is blank or exceeds `max` characters.
    pub fn check_text(field: &str, value: &str, max: usize) -> DomainResult<()> {
        if value.trim().is_empty() {
            return Err(Self::validation(format!("{field} cannot be empty")));
        }
        let len = value.chars().count();
        if len > max {
            return Err(Self::validation(format!(
                "{field} must be at most {max} characters (got {len})"
            )));
        }
        Ok(())
    }
}
