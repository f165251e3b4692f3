//! Error taxonomy shared by the resolver, compiler, write engine and executor

use thiserror::Error;

/// Errors surfaced to the transport layer
///
/// Every variant carries a detail string that is safe to show to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErmError {
    /// Malformed name, predicate, projection or path
    #[error("Bad syntax: {0}")]
    BadSyntax(String),

    /// Well-formed input with an invalid value
    #[error("Bad data: {0}")]
    BadData(String),

    /// Request conflicts with the current catalog model
    #[error("Model conflict: {0}")]
    ConflictModel(String),

    /// Request conflicts with data already stored
    #[error("Data conflict: {0}")]
    ConflictData(String),

    /// Access denied to an authenticated client
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Access denied to an anonymous client
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Required resource or row set is empty
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input encoding not recognized
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Transient failure; the client may retry the whole request
    #[error("Service unavailable: {0}")]
    Retryable(String),

    /// Other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl ErmError {
    /// HTTP status code conventionally associated with this error
    pub fn status(&self) -> u16 {
        match self {
            ErmError::BadSyntax(_) | ErmError::BadData(_) => 400,
            ErmError::Unauthorized(_) => 401,
            ErmError::Forbidden(_) => 403,
            ErmError::NotFound(_) => 404,
            ErmError::ConflictModel(_) | ErmError::ConflictData(_) => 409,
            ErmError::UnsupportedMediaType(_) => 415,
            ErmError::Retryable(_) => 503,
            ErmError::Backend(_) => 500,
        }
    }

    /// Whether the client may safely resubmit the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErmError::Retryable(_))
    }

    /// Denial for `what`, picking Unauthorized for anonymous clients
    pub fn denied(what: impl Into<String>, anonymous: bool) -> Self {
        if anonymous {
            ErmError::Unauthorized(what.into())
        } else {
            ErmError::Forbidden(what.into())
        }
    }
}

impl From<serde_json::Error> for ErmError {
    fn from(e: serde_json::Error) -> Self {
        ErmError::BadData(format!("invalid JSON input: {}", e))
    }
}

impl From<csv::Error> for ErmError {
    fn from(e: csv::Error) -> Self {
        ErmError::BadData(format!("invalid CSV input: {}", e))
    }
}

/// Result type used throughout the crate
pub type ErmResult<T> = Result<T, ErmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ErmError::BadSyntax("x".into()).status(), 400);
        assert_eq!(ErmError::ConflictData("x".into()).status(), 409);
        assert_eq!(ErmError::UnsupportedMediaType("x".into()).status(), 415);
        assert_eq!(ErmError::Retryable("x".into()).status(), 503);
    }

    #[test]
    fn test_denied_picks_variant() {
        assert!(matches!(
            ErmError::denied("table", true),
            ErmError::Unauthorized(_)
        ));
        assert!(matches!(
            ErmError::denied("table", false),
            ErmError::Forbidden(_)
        ));
    }

    #[test]
    fn test_json_error_is_bad_data() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(ErmError::from(err), ErmError::BadData(_)));
    }
}
