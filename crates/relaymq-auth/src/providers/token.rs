//! Static bearer token authentication.
//!
//! Authenticates clients using opaque tokens that map to a role. The token is
//! read from the command payload, or from the HTTP `Authorization` header when
//! the connection arrived over HTTP.
//!
//! # Configuration
//!
//! Set `RELAYMQ_TOKENS` with format:
//! ```text
//! token1:role1;token2:role2
//! ```
//!
//! # Example
//!
//! ```text
//! RELAYMQ_TOKENS="session-abc123:tenant-a;ops-token:superuser"
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::carrier::{bearer_credential, AuthenticationDataSource};
use crate::error::{AuthError, AuthResult};
use crate::principal::Principal;
use crate::provider::AuthenticationProvider;

/// Scheme name served by [`TokenProvider`].
pub const TOKEN_SCHEME: &str = "token";

/// Default environment variable holding token specs.
pub const TOKENS_ENV: &str = "RELAYMQ_TOKENS";

/// Token entry with optional expiration.
#[derive(Clone)]
struct TokenEntry {
    role: String,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Provider that validates bearer tokens against an in-process store.
pub struct TokenProvider {
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl TokenProvider {
    /// Create a provider with no tokens.
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Register a token for a role (no expiry).
    pub fn register_token(&self, token: impl Into<String>, role: impl Into<String>) {
        self.tokens.write().insert(
            token.into(),
            TokenEntry {
                role: role.into(),
                expires_at: None,
            },
        );
    }

    /// Register a token that expires after `ttl`.
    pub fn register_token_with_ttl(
        &self,
        token: impl Into<String>,
        role: impl Into<String>,
        ttl: Duration,
    ) {
        self.tokens.write().insert(
            token.into(),
            TokenEntry {
                role: role.into(),
                expires_at: Some(Utc::now() + ttl),
            },
        );
    }

    /// Revoke a token. Returns whether it existed.
    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    /// Parse a token spec string.
    ///
    /// Format: `token1:role1;token2:role2`. Malformed entries are skipped.
    pub fn from_spec(spec: &str) -> Self {
        let provider = Self::new();

        for entry in spec.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            match entry.split_once(':') {
                Some((token, role)) if !token.trim().is_empty() && !role.trim().is_empty() => {
                    provider.register_token(token.trim(), role.trim());
                }
                _ => {
                    tracing::warn!("ignoring malformed token entry");
                }
            }
        }

        provider
    }

    /// Load tokens from an environment variable. Missing variable means no tokens.
    pub fn from_env(env_var: &str) -> Self {
        match std::env::var(env_var) {
            Ok(spec) => Self::from_spec(&spec),
            Err(_) => Self::new(),
        }
    }

    /// Load from `RELAYMQ_TOKENS`.
    pub fn from_default_env() -> Self {
        Self::from_env(TOKENS_ENV)
    }

    /// Check if a token exists and has not expired.
    pub fn is_valid(&self, token: &str) -> bool {
        let now = Utc::now();
        self.tokens
            .read()
            .get(token)
            .map(|e| !e.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Number of registered tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }

    /// Remove expired tokens, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, entry| !entry.is_expired_at(now));
        before - tokens.len()
    }
}

impl Default for TokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticationProvider for TokenProvider {
    fn scheme(&self) -> &str {
        TOKEN_SCHEME
    }

    fn authenticate(&self, data: &dyn AuthenticationDataSource) -> AuthResult<Principal> {
        let token = bearer_credential(data)
            .ok_or_else(|| AuthError::failed("no token presented"))?;

        let tokens = self.tokens.read();
        let entry = tokens
            .get(token)
            .ok_or_else(|| AuthError::failed("unknown token"))?;

        if entry.is_expired_at(Utc::now()) {
            return Err(AuthError::failed("token expired"));
        }

        let principal = Principal::new(entry.role.clone());
        Ok(match entry.expires_at {
            Some(exp) => principal.with_expiry(exp),
            None => principal,
        })
    }
}
