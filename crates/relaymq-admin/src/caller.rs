//! Authorization view of an admin caller.
//!
//! The admin surface only sees the outcome of connection authentication: is
//! there a principal, and what is its role. It never looks at the credential
//! carrier or at providers.

use relaymq_auth::{ConnectionAuthState, Principal};

/// The identity behind an admin request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Caller {
    role: Option<String>,
}

impl Caller {
    /// A caller with no authenticated principal.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build from an optional principal.
    pub fn from_principal(principal: Option<&Principal>) -> Self {
        Self {
            role: principal.map(|p| p.role().to_string()),
        }
    }

    /// Authenticated role, if any.
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Check whether the caller is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.role.is_some()
    }
}

impl From<&ConnectionAuthState> for Caller {
    fn from(state: &ConnectionAuthState) -> Self {
        Self::from_principal(state.principal())
    }
}

impl From<&Principal> for Caller {
    fn from(principal: &Principal) -> Self {
        Self::from_principal(Some(principal))
    }
}
