//! Scheme name to provider mapping.
//!
//! Providers are registered through [`ProviderRegistryBuilder`] while the
//! broker starts. [`ProviderRegistryBuilder::build`] publishes an immutable
//! [`ProviderRegistry`] that is shared by `Arc` and only ever read.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AuthError, AuthResult};
use crate::provider::AuthenticationProvider;

/// Startup-time registry under construction.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: HashMap<String, Arc<dyn AuthenticationProvider>>,
}

impl ProviderRegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its scheme name.
    ///
    /// Fails with [`AuthError::DuplicateScheme`] if the name is taken; the
    /// existing provider is never shadowed.
    pub fn register<P>(&mut self, provider: P) -> AuthResult<&mut Self>
    where
        P: AuthenticationProvider + 'static,
    {
        self.register_shared(Arc::new(provider))
    }

    /// Register an already shared provider.
    pub fn register_shared(
        &mut self,
        provider: Arc<dyn AuthenticationProvider>,
    ) -> AuthResult<&mut Self> {
        let scheme = provider.scheme().to_string();
        if self.providers.contains_key(&scheme) {
            return Err(AuthError::DuplicateScheme(scheme));
        }

        tracing::debug!(scheme = %scheme, "authentication provider registered");
        self.providers.insert(scheme, provider);
        Ok(self)
    }

    /// Publish the registry. No further registration is possible.
    pub fn build(self) -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry {
            providers: self.providers,
        })
    }
}

/// Immutable scheme to provider mapping, safe for concurrent lookups.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AuthenticationProvider>>,
}

impl ProviderRegistry {
    /// Start building a registry.
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    /// Look up the provider for a scheme.
    pub fn resolve(&self, scheme: &str) -> Option<Arc<dyn AuthenticationProvider>> {
        self.providers.get(scheme).cloned()
    }

    /// Check whether a scheme is registered.
    pub fn contains(&self, scheme: &str) -> bool {
        self.providers.contains_key(scheme)
    }

    /// Registered scheme names, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
