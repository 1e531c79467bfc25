//! Authentication provider interface.

use crate::carrier::AuthenticationDataSource;
use crate::error::AuthResult;
use crate::principal::Principal;

/// A pluggable authentication scheme.
///
/// Providers are registered once at startup and shared by every connection.
/// They hold no per-connection state; anything a session needs lives in
/// [`ConnectionAuthState`](crate::state::ConnectionAuthState).
///
/// `authenticate` may block (certificate checks, token introspection). The
/// session driver runs it on the blocking pool, never on an I/O thread.
pub trait AuthenticationProvider: Send + Sync {
    /// Stable scheme identifier matched against the client-declared scheme.
    fn scheme(&self) -> &str;

    /// Turn the credential material on a connection into a principal.
    ///
    /// Absent, malformed or rejected credentials yield
    /// [`AuthError::AuthenticationFailed`](crate::error::AuthError::AuthenticationFailed).
    fn authenticate(&self, data: &dyn AuthenticationDataSource) -> AuthResult<Principal>;
}
