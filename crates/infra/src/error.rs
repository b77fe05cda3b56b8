use thiserror::Error;

use shopledger_auth::AuthzError;
use shopledger_core::DomainError;

use crate::ledger_store::StoreError;
use crate::retry::Retryable;

/// Error returned by every engine operation.
///
/// `Conflict` means the request is invalid for the current state;
/// `RetryableConflict` means a concurrent writer won and the *same* request
/// may succeed if re-sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("retryable conflict: {0}")]
    RetryableConflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Storage failed for a reason unrelated to the request.
    #[error("store error: {0}")]
    Store(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RetryableConflict(_))
    }
}

impl Retryable for ServiceError {
    fn is_retryable(&self) -> bool {
        ServiceError::is_retryable(self)
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ServiceError::BadRequest(msg)
            }
            DomainError::NotFound(msg) => ServiceError::NotFound(msg),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::RetryableConflict(msg) => ServiceError::RetryableConflict(msg),
            DomainError::Forbidden(msg) => ServiceError::Forbidden(msg),
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(value: AuthzError) -> Self {
        match value {
            // Unknown stores read the same as stores the actor cannot see.
            AuthzError::StoreNotFound => ServiceError::NotFound("store not found".to_string()),
            AuthzError::Forbidden(msg) => ServiceError::Forbidden(msg),
            AuthzError::Unavailable(msg) => ServiceError::Store(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Serialization(msg) | StoreError::LockTimeout(msg) => {
                ServiceError::RetryableConflict(msg)
            }
            StoreError::Constraint(msg) | StoreError::Duplicate(msg) => ServiceError::Conflict(msg),
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            StoreError::Backend(msg) => ServiceError::Store(msg),
        }
    }
}
