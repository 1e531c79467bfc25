//! TLS client certificate authentication.
//!
//! The TLS layer validates the chain during the handshake; this provider only
//! turns the leaf certificate into a principal. By default the role is the
//! leaf subject. When fingerprints are pinned, only pinned certificates are
//! accepted and the role comes from the pin.

use std::collections::HashMap;

use chrono::Utc;

use crate::carrier::AuthenticationDataSource;
use crate::error::{AuthError, AuthResult};
use crate::principal::Principal;
use crate::provider::AuthenticationProvider;

/// Scheme name served by [`TlsProvider`].
pub const TLS_SCHEME: &str = "tls";

/// Provider that authenticates the client certificate presented over TLS.
#[derive(Debug, Default)]
pub struct TlsProvider {
    /// SHA-256 fingerprint (lowercase hex) -> role.
    pinned: HashMap<String, String>,
}

impl TlsProvider {
    /// Create a provider that maps the leaf subject to the role.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a certificate fingerprint to a role.
    pub fn with_pinned_fingerprint(
        mut self,
        fingerprint: impl AsRef<str>,
        role: impl Into<String>,
    ) -> Self {
        self.pinned
            .insert(fingerprint.as_ref().to_ascii_lowercase(), role.into());
        self
    }

    /// Parse a pin spec of the form `fingerprint=role;fingerprint=role`.
    pub fn from_pin_spec(spec: &str) -> Self {
        spec.split(';')
            .filter_map(|entry| entry.split_once('='))
            .map(|(fp, role)| (fp.trim(), role.trim()))
            .filter(|(fp, role)| !fp.is_empty() && !role.is_empty())
            .fold(Self::new(), |provider, (fp, role)| {
                provider.with_pinned_fingerprint(fp, role)
            })
    }

    /// Number of pinned fingerprints.
    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }
}

impl AuthenticationProvider for TlsProvider {
    fn scheme(&self) -> &str {
        TLS_SCHEME
    }

    fn authenticate(&self, data: &dyn AuthenticationDataSource) -> AuthResult<Principal> {
        let leaf = data
            .tls_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| AuthError::failed("no client certificate presented"))?;

        if leaf.is_expired_at(Utc::now()) {
            return Err(AuthError::failed("client certificate expired"));
        }

        let role = if self.pinned.is_empty() {
            if leaf.subject().is_empty() {
                return Err(AuthError::failed("client certificate has an empty subject"));
            }
            leaf.subject().to_string()
        } else {
            self.pinned
                .get(&leaf.fingerprint())
                .cloned()
                .ok_or_else(|| AuthError::failed("client certificate is not pinned"))?
        };

        let principal = Principal::new(role);
        Ok(match leaf.not_after() {
            Some(exp) => principal.with_expiry(exp),
            None => principal,
        })
    }
}
