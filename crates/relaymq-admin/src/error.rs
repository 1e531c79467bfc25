//! Admin boundary error types.

use thiserror::Error;

/// Errors returned by property administration.
///
/// Each kind maps onto one request/response status; see [`AdminError::status_code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    /// The caller lacks the required privileges.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists or still has dependents.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request violates a precondition, e.g. an invalid name.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Anything else.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AdminError {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            AdminError::NotAuthorized(_) => 401,
            AdminError::NotFound(_) => 404,
            AdminError::Conflict(_) => 409,
            AdminError::PreconditionFailed(_) => 412,
            AdminError::Unexpected(_) => 500,
        }
    }

    /// Map a response status back to an error kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => AdminError::NotAuthorized(message),
            404 => AdminError::NotFound(message),
            409 => AdminError::Conflict(message),
            412 => AdminError::PreconditionFailed(message),
            _ => AdminError::Unexpected(message),
        }
    }
}

impl From<serde_json::Error> for AdminError {
    fn from(err: serde_json::Error) -> Self {
        AdminError::PreconditionFailed(format!("invalid property config: {}", err))
    }
}

/// Result type for admin operations.
pub type AdminResult<T> = Result<T, AdminError>;
