//! Async driver for a connection's authentication state.
//!
//! [`AuthSession`] is owned by the connection task. Starting an attempt hands
//! back a [`PendingAttempt`] future that runs the provider on the blocking
//! pool under the policy deadline. The connection loop polls it next to its
//! socket and feeds the outcome back through [`AuthSession::apply`], so every
//! transition happens in the connection's own context.
//!
//! ```ignore
//! let mut session = AuthSession::new(conn_id, registry, policy);
//! let carrier = Arc::new(carrier);
//! if let Start::Started(pending) = session.start("token", carrier)? {
//!     tokio::select! {
//!         outcome = pending => { session.apply(outcome); }
//!         _ = socket_closed => { session.close(); }
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use crate::carrier::ConnectionCarrier;
use crate::error::{AuthError, AuthResult};
use crate::policy::{AuthPolicy, UnknownSchemePolicy};
use crate::principal::Principal;
use crate::registry::ProviderRegistry;
use crate::state::{Applied, Attempt, AuthState, Begin, ConnectionAuthState};

/// Result of a provider run, tagged with the attempt it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Attempt id.
    pub attempt_id: u64,
    /// Provider result, or [`AuthError::Timeout`] if the deadline passed.
    pub result: AuthResult<Principal>,
}

/// An authentication attempt running off the I/O path.
pub struct PendingAttempt {
    attempt_id: u64,
    scheme: String,
    inner: Pin<Box<dyn Future<Output = AttemptOutcome> + Send>>,
}

impl PendingAttempt {
    /// Attempt id.
    pub fn attempt_id(&self) -> u64 {
        self.attempt_id
    }

    /// Scheme being attempted.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl Future for PendingAttempt {
    type Output = AttemptOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAttempt")
            .field("attempt_id", &self.attempt_id)
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Result of [`AuthSession::start`].
#[derive(Debug)]
pub enum Start {
    /// A provider call was launched.
    Started(PendingAttempt),
    /// An attempt is already in flight; no second provider call was made.
    Coalesced,
}

/// Authentication lifecycle of one connection.
pub struct AuthSession {
    connection_id: u64,
    registry: Arc<ProviderRegistry>,
    state: ConnectionAuthState,
    pending: Option<AbortHandle>,
    provider_slot: Arc<Mutex<()>>,
}

impl AuthSession {
    /// Create a session for a newly accepted connection.
    pub fn new(connection_id: u64, registry: Arc<ProviderRegistry>, policy: AuthPolicy) -> Self {
        Self {
            connection_id,
            registry,
            state: ConnectionAuthState::new(policy),
            pending: None,
            provider_slot: Arc::new(Mutex::new(())),
        }
    }

    /// Connection this session belongs to.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Underlying state machine.
    pub fn auth_state(&self) -> &ConnectionAuthState {
        &self.state
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &AuthState {
        self.state.state()
    }

    /// Principal for authorization checks.
    pub fn principal(&self) -> Option<&Principal> {
        self.state.principal()
    }

    /// Policy enforced by this session.
    pub fn policy(&self) -> &AuthPolicy {
        self.state.policy()
    }

    /// Start an attempt with the client-declared scheme.
    pub fn start(&mut self, scheme: &str, carrier: Arc<ConnectionCarrier>) -> AuthResult<Start> {
        let begin = self.state.begin(scheme, &self.registry).inspect_err(|e| {
            tracing::warn!(
                connection_id = self.connection_id,
                scheme,
                error = %e,
                "authentication attempt rejected"
            );
        })?;
        Ok(self.launch(begin, carrier))
    }

    /// Re-authenticate with the active scheme, e.g. after expiry or a
    /// protocol re-auth command carrying fresh credentials.
    pub fn reauthenticate(&mut self, carrier: Arc<ConnectionCarrier>) -> AuthResult<Start> {
        let begin = self.state.request_reauth(&self.registry)?;
        if matches!(begin, Begin::Started(_)) {
            tracing::debug!(
                connection_id = self.connection_id,
                scheme = self.state.active_scheme().unwrap_or_default(),
                "re-authenticating"
            );
        }
        Ok(self.launch(begin, carrier))
    }

    /// Check whether the principal has expired at the current time.
    pub fn reauth_due(&self) -> bool {
        self.state.reauth_due(Utc::now())
    }

    fn launch(&mut self, begin: Begin, carrier: Arc<ConnectionCarrier>) -> Start {
        match begin {
            Begin::Coalesced => {
                tracing::debug!(
                    connection_id = self.connection_id,
                    "authentication trigger coalesced into in-flight attempt"
                );
                Start::Coalesced
            }
            Begin::Started(attempt) => Start::Started(self.spawn(attempt, carrier)),
        }
    }

    fn spawn(&mut self, attempt: Attempt, carrier: Arc<ConnectionCarrier>) -> PendingAttempt {
        let Attempt {
            id,
            scheme,
            provider,
        } = attempt;
        let deadline = self.state.policy().attempt_timeout;
        let slot = self.provider_slot.clone();

        // The slot guard moves into the blocking closure, so it is released
        // only when the provider call returns, even after a timeout.
        let mut task = tokio::spawn(async move {
            let guard = slot.lock_owned().await;
            tokio::task::spawn_blocking(move || {
                let _slot = guard;
                provider.authenticate(carrier.as_ref())
            })
            .await
        });
        self.pending = Some(task.abort_handle());

        let inner = Box::pin(async move {
            let result = match tokio::time::timeout(deadline, &mut task).await {
                Ok(joined) => match joined.and_then(|call| call) {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Err(AuthError::Closed),
                    Err(e) => Err(AuthError::failed(format!("provider panicked: {}", e))),
                },
                Err(_) => {
                    task.abort();
                    Err(AuthError::Timeout)
                }
            };
            AttemptOutcome {
                attempt_id: id,
                result,
            }
        });

        tracing::debug!(
            connection_id = self.connection_id,
            attempt = id,
            scheme = %scheme,
            "authentication attempt started"
        );

        PendingAttempt {
            attempt_id: id,
            scheme,
            inner,
        }
    }

    /// Apply a finished attempt to the state machine.
    pub fn apply(&mut self, outcome: AttemptOutcome) -> Applied {
        if self.state.in_flight() == Some(outcome.attempt_id) {
            self.pending = None;
        }

        let applied = self
            .state
            .complete(outcome.attempt_id, outcome.result, Utc::now());

        match &applied {
            Applied::Authenticated(principal) => {
                tracing::info!(
                    connection_id = self.connection_id,
                    attempt = outcome.attempt_id,
                    scheme = self.state.active_scheme().unwrap_or_default(),
                    role = principal.role(),
                    "connection authenticated"
                );
            }
            Applied::Failed {
                reason,
                retries_exhausted,
            } => {
                tracing::warn!(
                    connection_id = self.connection_id,
                    attempt = outcome.attempt_id,
                    failures = self.state.failures(),
                    retries_exhausted,
                    error = %reason,
                    "authentication failed"
                );
            }
            Applied::Discarded => {
                tracing::debug!(
                    connection_id = self.connection_id,
                    attempt = outcome.attempt_id,
                    "stale authentication result discarded"
                );
            }
        }

        applied
    }

    /// Run one attempt to completion and apply it.
    ///
    /// Suitable when nothing else needs to be polled meanwhile.
    pub async fn authenticate(
        &mut self,
        scheme: &str,
        carrier: Arc<ConnectionCarrier>,
    ) -> AuthResult<Principal> {
        match self.start(scheme, carrier)? {
            Start::Started(pending) => {
                let outcome = pending.await;
                match self.apply(outcome) {
                    Applied::Authenticated(principal) => Ok(principal),
                    Applied::Failed { reason, .. } => Err(reason),
                    Applied::Discarded => Err(AuthError::Closed),
                }
            }
            Start::Coalesced => Err(AuthError::InProgress),
        }
    }

    /// Decide whether an error from this session should close the connection.
    pub fn should_close(&self, err: &AuthError) -> bool {
        match err {
            AuthError::UnknownScheme(_) => {
                self.policy().unknown_scheme == UnknownSchemePolicy::Close
            }
            AuthError::AuthenticationFailed { .. } | AuthError::Timeout => self
                .policy()
                .retries_exhausted(self.state.failures()),
            AuthError::InProgress => false,
            AuthError::DuplicateScheme(_) | AuthError::Closed => true,
        }
    }

    /// Close the session. Cancels the outstanding attempt and releases the principal.
    pub fn close(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        if self.state.close() {
            tracing::debug!(connection_id = self.connection_id, "authentication session closed");
        }
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::AuthenticationDataSource;
    use crate::provider::AuthenticationProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Slow(Duration);

    impl AuthenticationProvider for Slow {
        fn scheme(&self) -> &str {
            "slow"
        }

        fn authenticate(&self, _data: &dyn AuthenticationDataSource) -> AuthResult<Principal> {
            std::thread::sleep(self.0);
            Ok(Principal::new("slow-user"))
        }
    }

    struct Echo;

    impl AuthenticationProvider for Echo {
        fn scheme(&self) -> &str {
            "echo"
        }

        fn authenticate(&self, data: &dyn AuthenticationDataSource) -> AuthResult<Principal> {
            data.command_data()
                .map(Principal::new)
                .ok_or_else(|| AuthError::failed("no command data"))
        }
    }

    #[derive(Default)]
    struct CallStats {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    struct Counting(Arc<CallStats>);

    impl AuthenticationProvider for Counting {
        fn scheme(&self) -> &str {
            "counting"
        }

        fn authenticate(&self, _data: &dyn AuthenticationDataSource) -> AuthResult<Principal> {
            let stats = &self.0;
            stats.calls.fetch_add(1, Ordering::SeqCst);
            let active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
            stats.peak.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            stats.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Principal::new("counted"))
        }
    }

    fn registry() -> Arc<ProviderRegistry> {
        let mut builder = ProviderRegistry::builder();
        builder.register(Echo).unwrap();
        builder.register(Slow(Duration::from_millis(200))).unwrap();
        builder.build()
    }

    fn command(data: &str) -> Arc<ConnectionCarrier> {
        let mut carrier = ConnectionCarrier::new();
        carrier.set_command_data(data);
        Arc::new(carrier)
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let mut session = AuthSession::new(1, registry(), AuthPolicy::default());
        let principal = session.authenticate("echo", command("tenant-a")).await.unwrap();
        assert_eq!(principal.role(), "tenant-a");
        assert_eq!(session.state(), &AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_authenticate_failure() {
        let mut session = AuthSession::new(1, registry(), AuthPolicy::default());
        let err = session
            .authenticate("echo", Arc::new(ConnectionCarrier::new()))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::failed("no command data"));
        assert!(matches!(session.state(), AuthState::Failed { .. }));
        assert!(session.principal().is_none());
    }

    #[tokio::test]
    async fn test_timeout_fails_attempt() {
        let policy = AuthPolicy::default().with_attempt_timeout(Duration::from_millis(20));
        let mut session = AuthSession::new(1, registry(), policy);

        let err = session.authenticate("slow", command("x")).await.unwrap_err();
        assert_eq!(err, AuthError::Timeout);
        assert_eq!(
            session.state(),
            &AuthState::Failed {
                reason: AuthError::Timeout
            }
        );
    }

    #[tokio::test]
    async fn test_timed_out_call_holds_provider_slot() {
        let stats = Arc::new(CallStats::default());
        let mut builder = ProviderRegistry::builder();
        builder.register(Counting(stats.clone())).unwrap();
        let policy = AuthPolicy::default().with_attempt_timeout(Duration::from_millis(20));
        let mut session = AuthSession::new(1, builder.build(), policy);

        let err = session.authenticate("counting", command("x")).await.unwrap_err();
        assert_eq!(err, AuthError::Timeout);

        // The first call is still running, so this attempt never reaches the provider.
        let err = session.authenticate("counting", command("x")).await.unwrap_err();
        assert_eq!(err, AuthError::Timeout);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(stats.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.peak.load(Ordering::SeqCst), 1);

        // Once the slot is free the next attempt runs the provider again.
        let _ = session.authenticate("counting", command("x")).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(stats.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_authenticate_while_in_flight() {
        let mut session = AuthSession::new(1, registry(), AuthPolicy::default());
        let pending = match session.start("slow", command("x")).unwrap() {
            Start::Started(pending) => pending,
            Start::Coalesced => panic!("expected a new attempt"),
        };

        let err = session.authenticate("echo", command("y")).await.unwrap_err();
        assert_eq!(err, AuthError::InProgress);
        assert!(!session.should_close(&err));
        assert_eq!(session.state(), &AuthState::Authenticating);
        assert_eq!(session.auth_state().failures(), 0);

        session.apply(pending.await);
        assert_eq!(session.principal().unwrap().role(), "slow-user");
    }

    #[tokio::test]
    async fn test_coalesced_start() {
        let mut session = AuthSession::new(1, registry(), AuthPolicy::default());
        let first = session.start("slow", command("x")).unwrap();
        assert!(matches!(first, Start::Started(_)));
        assert!(matches!(
            session.start("echo", command("y")).unwrap(),
            Start::Coalesced
        ));

        if let Start::Started(pending) = first {
            let applied = session.apply(pending.await);
            assert_eq!(applied, Applied::Authenticated(Principal::new("slow-user")));
        }
    }

    #[tokio::test]
    async fn test_close_while_pending_ends_closed() {
        let mut session = AuthSession::new(1, registry(), AuthPolicy::default());
        let pending = match session.start("slow", command("x")).unwrap() {
            Start::Started(pending) => pending,
            Start::Coalesced => panic!("expected a new attempt"),
        };

        session.close();
        let applied = session.apply(pending.await);
        assert_eq!(applied, Applied::Discarded);
        assert_eq!(session.state(), &AuthState::Closed);
        assert!(session.principal().is_none());
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let mut session = AuthSession::new(1, registry(), AuthPolicy::default());
        let err = session.start("kerberos", command("x")).unwrap_err();
        assert_eq!(err, AuthError::UnknownScheme("kerberos".into()));
        assert!(!session.should_close(&err));

        let strict = AuthSession::new(
            2,
            registry(),
            AuthPolicy::default().with_unknown_scheme(UnknownSchemePolicy::Close),
        );
        assert!(strict.should_close(&err));
    }

    #[tokio::test]
    async fn test_reauthenticate_keeps_principal_until_resolved() {
        let mut session = AuthSession::new(1, registry(), AuthPolicy::default());
        session.authenticate("echo", command("tenant-a")).await.unwrap();

        let pending = match session.reauthenticate(command("tenant-a-v2")).unwrap() {
            Start::Started(pending) => pending,
            Start::Coalesced => panic!("expected a new attempt"),
        };
        assert_eq!(session.state(), &AuthState::Authenticating);
        assert_eq!(session.principal().unwrap().role(), "tenant-a");

        session.apply(pending.await);
        assert_eq!(session.principal().unwrap().role(), "tenant-a-v2");
    }
}
