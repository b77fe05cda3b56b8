//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Each variant maps onto one kind of the public error taxonomy:
///
/// | variant | kind | caller action |
/// |---|---|---|
/// | `Validation`, `InvalidId` | BadRequest | fix the request |
/// | `NotFound` | NotFound | none (never leaks cross-store existence) |
/// | `Conflict` | Conflict | request is invalid for the current state |
/// | `RetryableConflict` | RetryableConflict | retry the *same* request |
/// | `Forbidden` | Forbidden | actor lacks the role |
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found, or is outside the caller's store.
    #[error("not found: {0}")]
    NotFound(String),

    /// A business invariant would be violated (negative stock, forbidden transition).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A concurrent writer won the race; the same request may succeed on retry.
    #[error("retryable conflict: {0}")]
    RetryableConflict(String),

    /// The actor's role in the store does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::RetryableConflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableConflict(_))
    }
}
