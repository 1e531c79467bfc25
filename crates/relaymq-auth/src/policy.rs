//! Listener-level authentication policy.

use std::str::FromStr;
use std::time::Duration;

/// Default number of failed attempts tolerated before the connection closes.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default deadline for a single authentication attempt in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;

/// What to do when a client declares a scheme nobody serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownSchemePolicy {
    /// Report the error and let the client try another scheme.
    #[default]
    Reject,
    /// Report the error and close the connection.
    Close,
}

impl FromStr for UnknownSchemePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(UnknownSchemePolicy::Reject),
            "close" => Ok(UnknownSchemePolicy::Close),
            other => Err(format!("unknown scheme policy: {}", other)),
        }
    }
}

/// Retry, timeout and re-authentication policy for one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Failed attempts allowed before the connection is closed. Zero closes on the first failure.
    pub max_retries: u32,

    /// Deadline for each attempt.
    pub attempt_timeout: Duration,

    /// Handling of undeclared schemes.
    pub unknown_scheme: UnknownSchemePolicy,

    /// Re-authenticate when the principal expires instead of closing.
    pub reauth_on_expiry: bool,
}

impl AuthPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            unknown_scheme: UnknownSchemePolicy::Reject,
            reauth_on_expiry: true,
        }
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the unknown-scheme handling.
    pub fn with_unknown_scheme(mut self, policy: UnknownSchemePolicy) -> Self {
        self.unknown_scheme = policy;
        self
    }

    /// Close instead of re-authenticating on expiry.
    pub fn without_reauth(mut self) -> Self {
        self.reauth_on_expiry = false;
        self
    }

    /// Check whether `failures` consecutive failures exhaust the retry budget.
    pub fn retries_exhausted(&self, failures: u32) -> bool {
        failures > self.max_retries
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::new()
    }
}
