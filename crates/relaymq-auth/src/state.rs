//! Per-connection authentication state machine.
//!
//! ```text
//! Unauthenticated --begin--> Authenticating --ok--> Authenticated
//!        ^                        |   ^                  |
//!        |                      fail  +----re-auth-------+
//!        +---unknown scheme--     v
//!                               Failed --begin--> Authenticating
//!
//! any state --close--> Closed (terminal)
//! ```
//!
//! The machine is owned by one connection and mutated through `&mut self`
//! only, so transitions for a connection are totally ordered. At most one
//! attempt is in flight; a second trigger while authenticating is coalesced.
//! Results carry the id of the attempt they answer; results for a superseded
//! attempt or a closed connection are discarded.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AuthError, AuthResult};
use crate::policy::AuthPolicy;
use crate::principal::Principal;
use crate::provider::AuthenticationProvider;
use crate::registry::ProviderRegistry;

/// Lifecycle state of a connection's authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No credential has been accepted yet.
    Unauthenticated,
    /// A provider call is outstanding.
    Authenticating,
    /// A principal is established.
    Authenticated,
    /// The last attempt failed.
    Failed {
        /// Why the attempt failed.
        reason: AuthError,
    },
    /// The connection is gone. Terminal.
    Closed,
}

impl AuthState {
    /// Short lowercase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed { .. } => "failed",
            AuthState::Closed => "closed",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A started attempt: the resolved provider and the id its result must carry.
pub struct Attempt {
    /// Attempt id, unique per connection.
    pub id: u64,
    /// Scheme being attempted.
    pub scheme: String,
    /// Provider to invoke.
    pub provider: Arc<dyn AuthenticationProvider>,
}

impl fmt::Debug for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attempt")
            .field("id", &self.id)
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Result of asking the machine to authenticate.
#[derive(Debug)]
pub enum Begin {
    /// A new attempt must be run.
    Started(Attempt),
    /// An attempt is already in flight; the trigger was folded into it.
    Coalesced,
}

/// Effect of delivering a provider result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The connection is now authenticated as this principal.
    Authenticated(Principal),
    /// The attempt failed.
    Failed {
        /// Why it failed.
        reason: AuthError,
        /// The retry budget is used up; the connection should close.
        retries_exhausted: bool,
    },
    /// The result was stale or the connection is closed; nothing changed.
    Discarded,
}

/// Authentication state of one connection.
#[derive(Debug)]
pub struct ConnectionAuthState {
    state: AuthState,
    principal: Option<Principal>,
    active_scheme: Option<String>,
    last_authenticated_at: Option<DateTime<Utc>>,
    policy: AuthPolicy,
    failures: u32,
    next_attempt_id: u64,
    in_flight: Option<(u64, String)>,
}

impl ConnectionAuthState {
    /// Create a machine in [`AuthState::Unauthenticated`].
    pub fn new(policy: AuthPolicy) -> Self {
        Self {
            state: AuthState::Unauthenticated,
            principal: None,
            active_scheme: None,
            last_authenticated_at: None,
            policy,
            failures: 0,
            next_attempt_id: 1,
            in_flight: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Principal usable for authorization right now.
    ///
    /// Stays available while a re-authentication is in flight.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Scheme of the current principal.
    pub fn active_scheme(&self) -> Option<&str> {
        self.active_scheme.as_deref()
    }

    /// When the current principal was established.
    pub fn last_authenticated_at(&self) -> Option<DateTime<Utc>> {
        self.last_authenticated_at
    }

    /// Consecutive failed attempts.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Policy this machine enforces.
    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Id of the outstanding attempt, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|(id, _)| *id)
    }

    /// Check whether the connection currently has a principal.
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Check whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.state == AuthState::Closed
    }

    /// Start authenticating with the client-declared scheme.
    ///
    /// An unresolvable scheme fails with [`AuthError::UnknownScheme`]. A fresh
    /// connection goes back to `Unauthenticated`; an authenticated one keeps
    /// its principal.
    pub fn begin(&mut self, scheme: &str, registry: &ProviderRegistry) -> AuthResult<Begin> {
        match self.state {
            AuthState::Closed => return Err(AuthError::Closed),
            AuthState::Authenticating => return Ok(Begin::Coalesced),
            _ => {}
        }

        let Some(provider) = registry.resolve(scheme) else {
            if self.state != AuthState::Authenticated {
                self.state = AuthState::Unauthenticated;
            }
            return Err(AuthError::UnknownScheme(scheme.to_string()));
        };

        let id = self.next_attempt_id;
        self.next_attempt_id += 1;
        self.in_flight = Some((id, scheme.to_string()));
        self.state = AuthState::Authenticating;

        Ok(Begin::Started(Attempt {
            id,
            scheme: scheme.to_string(),
            provider,
        }))
    }

    /// Re-authenticate an established principal with its active scheme.
    ///
    /// Triggered by principal expiry or a protocol re-auth command. The
    /// previous principal remains queryable until the attempt resolves.
    pub fn request_reauth(&mut self, registry: &ProviderRegistry) -> AuthResult<Begin> {
        match self.state {
            AuthState::Closed => Err(AuthError::Closed),
            AuthState::Authenticating => Ok(Begin::Coalesced),
            AuthState::Authenticated => {
                let scheme = self
                    .active_scheme
                    .clone()
                    .ok_or_else(|| AuthError::failed("no active scheme to refresh"))?;
                self.begin(&scheme, registry)
            }
            AuthState::Unauthenticated | AuthState::Failed { .. } => {
                Err(AuthError::failed("no authenticated session to refresh"))
            }
        }
    }

    /// Check whether the principal has expired and needs re-authentication.
    pub fn reauth_due(&self, now: DateTime<Utc>) -> bool {
        self.state == AuthState::Authenticated
            && self
                .principal
                .as_ref()
                .map(|p| p.is_expired_at(now))
                .unwrap_or(false)
    }

    /// Deliver the result of attempt `attempt_id`.
    pub fn complete(
        &mut self,
        attempt_id: u64,
        result: AuthResult<Principal>,
        now: DateTime<Utc>,
    ) -> Applied {
        if self.state == AuthState::Closed {
            return Applied::Discarded;
        }

        let scheme = match self.in_flight.take() {
            Some((id, scheme)) if id == attempt_id => scheme,
            other => {
                self.in_flight = other;
                return Applied::Discarded;
            }
        };

        match result {
            Ok(principal) => {
                self.state = AuthState::Authenticated;
                self.principal = Some(principal.clone());
                self.active_scheme = Some(scheme);
                self.last_authenticated_at = Some(now);
                self.failures = 0;
                Applied::Authenticated(principal)
            }
            Err(reason) => {
                self.failures += 1;
                self.principal = None;
                self.active_scheme = None;
                self.state = AuthState::Failed {
                    reason: reason.clone(),
                };
                Applied::Failed {
                    reason,
                    retries_exhausted: self.policy.retries_exhausted(self.failures),
                }
            }
        }
    }

    /// Tear down. Releases the principal and cancels any outstanding attempt.
    ///
    /// Returns `false` if the machine was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == AuthState::Closed {
            return false;
        }
        self.state = AuthState::Closed;
        self.principal = None;
        self.active_scheme = None;
        self.in_flight = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::AuthenticationDataSource;
    use chrono::Duration;

    struct Fixed(&'static str);

    impl AuthenticationProvider for Fixed {
        fn scheme(&self) -> &str {
            self.0
        }

        fn authenticate(&self, _data: &dyn AuthenticationDataSource) -> AuthResult<Principal> {
            Ok(Principal::new("tenant-a"))
        }
    }

    fn registry() -> Arc<ProviderRegistry> {
        let mut builder = ProviderRegistry::builder();
        builder.register(Fixed("token")).unwrap();
        builder.register(Fixed("tls")).unwrap();
        builder.build()
    }

    fn started(begin: AuthResult<Begin>) -> Attempt {
        match begin.unwrap() {
            Begin::Started(attempt) => attempt,
            Begin::Coalesced => panic!("expected a new attempt"),
        }
    }

    #[test]
    fn test_success_reaches_authenticated() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());
        assert_eq!(state.state(), &AuthState::Unauthenticated);

        let attempt = started(state.begin("token", &registry));
        assert_eq!(state.state(), &AuthState::Authenticating);
        assert_eq!(state.in_flight(), Some(attempt.id));

        let now = Utc::now();
        let applied = state.complete(attempt.id, Ok(Principal::new("tenant-a")), now);
        assert_eq!(applied, Applied::Authenticated(Principal::new("tenant-a")));
        assert_eq!(state.state(), &AuthState::Authenticated);
        assert_eq!(state.principal().unwrap().role(), "tenant-a");
        assert_eq!(state.active_scheme(), Some("token"));
        assert_eq!(state.last_authenticated_at(), Some(now));
        assert_eq!(state.in_flight(), None);
    }

    #[test]
    fn test_failure_reaches_failed_without_principal() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());

        let attempt = started(state.begin("token", &registry));
        let applied = state.complete(attempt.id, Err(AuthError::failed("bad token")), Utc::now());

        assert_eq!(
            applied,
            Applied::Failed {
                reason: AuthError::failed("bad token"),
                retries_exhausted: false,
            }
        );
        assert_eq!(
            state.state(),
            &AuthState::Failed {
                reason: AuthError::failed("bad token")
            }
        );
        assert!(state.principal().is_none());
        assert_eq!(state.failures(), 1);
    }

    #[test]
    fn test_unknown_scheme_returns_to_unauthenticated() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());

        let err = state.begin("kerberos", &registry).unwrap_err();
        assert_eq!(err, AuthError::UnknownScheme("kerberos".into()));
        assert_eq!(state.state(), &AuthState::Unauthenticated);
        assert_eq!(state.failures(), 0);
    }

    #[test]
    fn test_unknown_scheme_keeps_existing_principal() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());
        let attempt = started(state.begin("token", &registry));
        state.complete(attempt.id, Ok(Principal::new("tenant-a")), Utc::now());

        assert!(state.begin("kerberos", &registry).is_err());
        assert_eq!(state.state(), &AuthState::Authenticated);
        assert!(state.principal().is_some());
    }

    #[test]
    fn test_second_trigger_is_coalesced() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());

        let attempt = started(state.begin("token", &registry));
        assert!(matches!(state.begin("tls", &registry), Ok(Begin::Coalesced)));
        assert!(matches!(state.request_reauth(&registry), Ok(Begin::Coalesced)));
        assert_eq!(state.in_flight(), Some(attempt.id));
    }

    #[test]
    fn test_retry_budget() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default().with_max_retries(1));

        let first = started(state.begin("token", &registry));
        let applied = state.complete(first.id, Err(AuthError::Timeout), Utc::now());
        assert!(matches!(applied, Applied::Failed { retries_exhausted: false, .. }));

        let second = started(state.begin("token", &registry));
        let applied = state.complete(second.id, Err(AuthError::failed("nope")), Utc::now());
        assert!(matches!(applied, Applied::Failed { retries_exhausted: true, .. }));

        let third = started(state.begin("token", &registry));
        state.complete(third.id, Ok(Principal::new("tenant-a")), Utc::now());
        assert_eq!(state.failures(), 0);
    }

    #[test]
    fn test_reauth_keeps_previous_principal() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());
        let now = Utc::now();

        let attempt = started(state.begin("token", &registry));
        state.complete(
            attempt.id,
            Ok(Principal::new("tenant-a").with_expiry(now + Duration::seconds(5))),
            now,
        );
        assert!(!state.reauth_due(now));

        let later = now + Duration::seconds(5);
        assert!(state.reauth_due(later));

        let refresh = started(state.request_reauth(&registry));
        assert_eq!(refresh.scheme, "token");
        assert_eq!(state.state(), &AuthState::Authenticating);
        assert_eq!(state.principal().unwrap().role(), "tenant-a");
        assert!(state.is_authenticated());

        state.complete(refresh.id, Ok(Principal::new("tenant-a-rotated")), later);
        assert_eq!(state.principal().unwrap().role(), "tenant-a-rotated");
        assert_eq!(state.last_authenticated_at(), Some(later));
    }

    #[test]
    fn test_reauth_requires_authenticated() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());
        assert!(state.request_reauth(&registry).is_err());
        assert_eq!(state.state(), &AuthState::Unauthenticated);
    }

    #[test]
    fn test_close_wins_over_pending_result() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());

        let attempt = started(state.begin("token", &registry));
        assert!(state.close());

        let applied = state.complete(attempt.id, Ok(Principal::new("tenant-a")), Utc::now());
        assert_eq!(applied, Applied::Discarded);
        assert_eq!(state.state(), &AuthState::Closed);
        assert!(state.principal().is_none());
        assert_eq!(state.begin("token", &registry).unwrap_err(), AuthError::Closed);
        assert!(!state.close());
    }

    #[test]
    fn test_close_from_authenticated_releases_principal() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());
        let attempt = started(state.begin("token", &registry));
        state.complete(attempt.id, Ok(Principal::new("tenant-a")), Utc::now());

        state.close();
        assert!(state.principal().is_none());
        assert!(state.active_scheme().is_none());
        assert!(state.is_closed());
    }

    #[test]
    fn test_stale_result_discarded() {
        let registry = registry();
        let mut state = ConnectionAuthState::new(AuthPolicy::default());
        let attempt = started(state.begin("token", &registry));

        let applied = state.complete(attempt.id + 100, Ok(Principal::new("x")), Utc::now());
        assert_eq!(applied, Applied::Discarded);
        assert_eq!(state.state(), &AuthState::Authenticating);
        assert_eq!(state.in_flight(), Some(attempt.id));
    }
}
