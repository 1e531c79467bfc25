//! Broker configuration.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use relaymq_auth::policy::{DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_MAX_RETRIES};
use relaymq_auth::{
    AuthPolicy, JwtProvider, ProviderRegistry, TlsProvider, TokenProvider, UnknownSchemePolicy,
    JWT_SCHEME, TLS_SCHEME, TOKEN_SCHEME,
};

use crate::error::Error;

/// Default listen address for the broker.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:6650";

/// Default interval between principal expiry checks in seconds.
pub const DEFAULT_EXPIRY_CHECK_SECS: u64 = 5;

/// Shortest expiry check interval a connection will use.
pub const MIN_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Default super-user role.
pub const DEFAULT_SUPER_USER: &str = "superuser";

/// RelayMQ broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Socket address to listen on (e.g., "0.0.0.0:6650").
    pub listen_address: String,

    /// Schemes to enable, in registration order.
    pub providers: Vec<String>,

    /// Static token spec (`token:role;token:role`).
    pub tokens: Option<String>,

    /// HMAC secret for JWT verification.
    pub jwt_secret: Option<String>,

    /// Pinned certificate fingerprints (`fingerprint=role;...`).
    pub tls_pins: Option<String>,

    /// Retry, timeout and unknown-scheme policy for every connection.
    pub auth_policy: AuthPolicy,

    /// How often connections check for expired principals.
    pub expiry_check_interval: Duration,

    /// Roles allowed to provision properties.
    pub super_user_roles: Vec<String>,
}

impl BrokerConfig {
    /// Create a configuration listening on the given address with no providers.
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            providers: Vec::new(),
            tokens: None,
            jwt_secret: None,
            tls_pins: None,
            auth_policy: AuthPolicy::default(),
            expiry_check_interval: Duration::from_secs(DEFAULT_EXPIRY_CHECK_SECS),
            super_user_roles: vec![DEFAULT_SUPER_USER.to_string()],
        }
    }

    /// Enable a provider scheme.
    pub fn with_provider(mut self, scheme: impl Into<String>) -> Self {
        self.providers.push(scheme.into());
        self
    }

    /// Set the static token spec and enable the token scheme.
    pub fn with_tokens(mut self, spec: impl Into<String>) -> Self {
        self.tokens = Some(spec.into());
        self.enable(TOKEN_SCHEME)
    }

    /// Set the JWT secret and enable the JWT scheme.
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self.enable(JWT_SCHEME)
    }

    /// Set the authentication policy.
    pub fn with_auth_policy(mut self, policy: AuthPolicy) -> Self {
        self.auth_policy = policy;
        self
    }

    /// Set the expiry check interval. Values below
    /// [`MIN_EXPIRY_CHECK_INTERVAL`] are raised to it.
    pub fn with_expiry_check_interval(mut self, interval: Duration) -> Self {
        self.expiry_check_interval = interval.max(MIN_EXPIRY_CHECK_INTERVAL);
        self
    }

    /// Set the super-user roles.
    pub fn with_super_users(mut self, roles: Vec<String>) -> Self {
        self.super_user_roles = roles;
        self
    }

    fn enable(mut self, scheme: &str) -> Self {
        if !self.providers.iter().any(|s| s == scheme) {
            self.providers.push(scheme.to_string());
        }
        self
    }

    /// Build the provider registry for the enabled schemes.
    ///
    /// Fails on unknown scheme names, missing provider settings and duplicate
    /// schemes. Any failure here must stop startup.
    pub fn build_registry(&self) -> Result<Arc<ProviderRegistry>, Error> {
        let mut builder = ProviderRegistry::builder();

        for scheme in &self.providers {
            match scheme.as_str() {
                TOKEN_SCHEME => {
                    let provider = TokenProvider::from_spec(self.tokens.as_deref().unwrap_or(""));
                    if provider.token_count() == 0 {
                        tracing::warn!("token scheme enabled without any tokens");
                    }
                    builder.register(provider)?;
                }
                JWT_SCHEME => {
                    let provider = match &self.jwt_secret {
                        Some(secret) => JwtProvider::with_secret_str(secret),
                        None => JwtProvider::from_env()?.ok_or_else(|| {
                            Error::Config(
                                "jwt scheme enabled but no key configured (set RELAYMQ_JWT_SECRET)"
                                    .to_string(),
                            )
                        })?,
                    };
                    builder.register(provider)?;
                }
                TLS_SCHEME => {
                    let provider = match &self.tls_pins {
                        Some(pins) => TlsProvider::from_pin_spec(pins),
                        None => TlsProvider::new(),
                    };
                    builder.register(provider)?;
                }
                other => {
                    return Err(Error::Config(format!(
                        "unsupported authentication scheme: {}",
                        other
                    )));
                }
            }
        }

        Ok(builder.build())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_ADDRESS)
    }
}

/// Command-line arguments for the broker.
#[derive(Parser, Debug)]
#[command(name = "relaymq-broker")]
#[command(version, about = "RelayMQ Broker", long_about = None)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(short, long, env = "RELAYMQ_LISTEN", default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// Authentication schemes to enable (comma separated).
    #[arg(long, value_delimiter = ',', default_value = "token")]
    pub providers: Vec<String>,

    /// Static tokens as `token:role;token:role`.
    #[arg(long, env = "RELAYMQ_TOKENS", hide_env_values = true)]
    pub tokens: Option<String>,

    /// HMAC secret for the jwt scheme.
    #[arg(long, env = "RELAYMQ_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Pinned client certificate fingerprints as `sha256=role;...`.
    #[arg(long, env = "RELAYMQ_TLS_PINS")]
    pub tls_pins: Option<String>,

    /// Failed attempts allowed before a connection is closed.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Authentication attempt timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_ATTEMPT_TIMEOUT_SECS)]
    pub auth_timeout: u64,

    /// What to do on an unknown scheme: `reject` or `close`.
    #[arg(long, default_value = "reject")]
    pub unknown_scheme: UnknownSchemePolicy,

    /// Close connections with expired principals instead of re-authenticating.
    #[arg(long)]
    pub no_reauth: bool,

    /// Expiry check interval in seconds.
    #[arg(long, default_value_t = DEFAULT_EXPIRY_CHECK_SECS)]
    pub expiry_check_interval: u64,

    /// Super-user roles (comma separated).
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_SUPER_USER)]
    pub super_users: Vec<String>,
}

impl Args {
    /// Convert command-line arguments to broker configuration.
    pub fn into_config(self) -> BrokerConfig {
        let mut policy = AuthPolicy::new()
            .with_max_retries(self.max_retries)
            .with_attempt_timeout(Duration::from_secs(self.auth_timeout))
            .with_unknown_scheme(self.unknown_scheme);
        if self.no_reauth {
            policy = policy.without_reauth();
        }

        BrokerConfig {
            listen_address: self.listen,
            providers: self
                .providers
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            tokens: self.tokens,
            jwt_secret: self.jwt_secret,
            tls_pins: self.tls_pins,
            auth_policy: policy,
            expiry_check_interval: Duration::from_secs(self.expiry_check_interval.max(1)),
            super_user_roles: self.super_users,
        }
    }
}
