//! RelayMQ connection authentication.
//!
//! This crate provides the pluggable authentication core of the broker:
//!
//! - [`carrier`]: per-connection credential material from TLS, HTTP, the
//!   command protocol and the peer socket, behind one capability interface
//! - [`provider`] and [`providers`]: the scheme plugin interface and the
//!   built-in TLS, token and JWT schemes
//! - [`registry`]: the startup-built, read-only scheme table
//! - [`state`] and [`session`]: the per-connection authentication lifecycle
//!
//! # Example
//!
//! ```ignore
//! use relaymq_auth::{AuthPolicy, AuthSession, ConnectionCarrier, ProviderRegistry, TokenProvider};
//!
//! let tokens = TokenProvider::new();
//! tokens.register_token("abc", "tenant-a");
//!
//! let mut builder = ProviderRegistry::builder();
//! builder.register(tokens)?;
//! let registry = builder.build();
//!
//! let mut carrier = ConnectionCarrier::for_peer(peer_addr);
//! carrier.set_command_data("abc");
//!
//! let mut session = AuthSession::new(1, registry, AuthPolicy::default());
//! let principal = session.authenticate("token", Arc::new(carrier)).await?;
//! assert_eq!(principal.role(), "tenant-a");
//! ```

pub mod carrier;
pub mod error;
pub mod policy;
pub mod principal;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod session;
pub mod state;

pub use carrier::{
    bearer_credential, AuthenticationDataSource, Certificate, ConnectionCarrier, HttpData,
    Transport,
};
pub use error::{AuthError, AuthResult};
pub use policy::{AuthPolicy, UnknownSchemePolicy};
pub use principal::Principal;
pub use provider::AuthenticationProvider;
pub use providers::{JwtProvider, TlsProvider, TokenProvider, JWT_SCHEME, TLS_SCHEME, TOKEN_SCHEME};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
pub use session::{AttemptOutcome, AuthSession, PendingAttempt, Start};
pub use state::{Applied, Attempt, AuthState, Begin, ConnectionAuthState};
