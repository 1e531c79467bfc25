//! Authentication error types.

use thiserror::Error;

/// Errors raised by the authentication core.
///
/// Transport parsing problems are folded into [`AuthError::AuthenticationFailed`]
/// so providers and callers see one failure surface no matter which transport
/// supplied the bad data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The client declared a scheme with no registered provider.
    #[error("unknown authentication scheme: {0}")]
    UnknownScheme(String),

    /// The provider rejected the presented credential.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        /// Human readable rejection reason.
        reason: String,
    },

    /// The provider did not finish before the attempt deadline.
    #[error("authentication attempt timed out")]
    Timeout,

    /// Another attempt is already in flight; nothing was evaluated.
    #[error("authentication already in progress")]
    InProgress,

    /// Two providers were registered under the same scheme name.
    #[error("duplicate authentication scheme: {0}")]
    DuplicateScheme(String),

    /// The connection has been closed; no further transitions are allowed.
    #[error("connection closed")]
    Closed,
}

impl AuthError {
    /// Shorthand for [`AuthError::AuthenticationFailed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        AuthError::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Whether a connection may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::UnknownScheme(_)
                | AuthError::AuthenticationFailed { .. }
                | AuthError::Timeout
                | AuthError::InProgress
        )
    }

    /// Short machine-readable kind, used on the wire and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::UnknownScheme(_) => "unknown_scheme",
            AuthError::AuthenticationFailed { .. } => "authentication_failed",
            AuthError::Timeout => "timeout",
            AuthError::InProgress => "in_progress",
            AuthError::DuplicateScheme(_) => "duplicate_scheme",
            AuthError::Closed => "closed",
        }
    }
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;
