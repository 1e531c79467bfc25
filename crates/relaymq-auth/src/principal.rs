//! Authenticated identities.

use std::fmt;

use chrono::{DateTime, Utc};

/// Identity produced by a successful provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    role: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Create a principal without expiry.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            expires_at: None,
        }
    }

    /// Set the instant after which the principal must re-authenticate.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Tenant or role identifier.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Expiry instant, if any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Check whether the principal has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role)
    }
}
