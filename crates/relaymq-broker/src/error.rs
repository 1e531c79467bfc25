//! Broker error types.

use thiserror::Error;

/// Broker errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication setup error.
    #[error("authentication error: {0}")]
    Auth(#[from] relaymq_auth::AuthError),

    /// Malformed client command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
