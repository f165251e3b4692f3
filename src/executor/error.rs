//! Backend error types

use thiserror::Error;

use crate::error::ErmError;

/// Failures reported by a database backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Transaction could not be serialized against concurrent work
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// Constraint violation other than a unique key
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Unique key or index violation
    #[error("unique violation: {0}")]
    UniqueViolation(String),

    /// Connection lost or refused
    #[error("connection error: {0}")]
    Connection(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

impl From<BackendError> for ErmError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Serialization(msg) | BackendError::Connection(msg) => {
                ErmError::Retryable(msg)
            }
            BackendError::Integrity(msg) | BackendError::UniqueViolation(msg) => {
                ErmError::ConflictData(format!("input data violates model: {}", msg))
            }
            BackendError::Other(msg) => ErmError::Backend(msg),
        }
    }
}
