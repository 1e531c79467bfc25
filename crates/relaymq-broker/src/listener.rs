//! TCP listener for the broker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relaymq_admin::{InMemoryProperties, Properties};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::config::BrokerConfig;
use crate::connection::{BrokerContext, Connection};
use crate::error::Error;

/// Accepts client connections and runs one [`Connection`] task per client.
pub struct Broker {
    listener: TcpListener,
    ctx: BrokerContext,
    next_connection_id: AtomicU64,
}

impl Broker {
    /// Build the provider registry and bind the listen address.
    ///
    /// Any registry error is fatal: the broker never starts with a partial
    /// scheme table.
    pub async fn bind(config: &BrokerConfig) -> Result<Self, Error> {
        let properties = Arc::new(InMemoryProperties::new(
            config.super_user_roles.iter().cloned(),
        ));
        Self::bind_with_properties(config, properties).await
    }

    /// Like [`Broker::bind`] with a caller-provided property store.
    pub async fn bind_with_properties(
        config: &BrokerConfig,
        properties: Arc<dyn Properties>,
    ) -> Result<Self, Error> {
        let registry = config.build_registry()?;
        if registry.is_empty() {
            tracing::warn!("no authentication providers enabled, every CONNECT will be rejected");
        }
        tracing::info!(schemes = ?registry.schemes(), "authentication providers registered");

        let listener = TcpListener::bind(&config.listen_address).await?;

        Ok(Self {
            listener,
            ctx: BrokerContext {
                registry,
                policy: config.auth_policy.clone(),
                properties,
                expiry_check_interval: config.expiry_check_interval,
            },
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared connection context.
    pub fn context(&self) -> &BrokerContext {
        &self.ctx
    }

    /// Accept connections until shutdown, then wait for open connections to finish.
    pub async fn run_until_shutdown(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let mut connections = JoinSet::new();

        tracing::info!(address = %self.local_addr()?, "listener ready, accepting connections");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                        let connection = Connection::new(id, Some(peer), &self.ctx);
                        let connection_shutdown = shutdown.resubscribe();
                        tracing::debug!(connection_id = id, peer = %peer, "accepted connection");

                        connections.spawn(async move {
                            if let Err(e) = connection.run(stream, connection_shutdown).await {
                                tracing::warn!(connection_id = id, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown.recv() => {
                    tracing::info!(
                        open_connections = connections.len(),
                        "shutdown signal received, stopping listener"
                    );
                    break;
                }
            }
        }

        while connections.join_next().await.is_some() {}
        Ok(())
    }
}
