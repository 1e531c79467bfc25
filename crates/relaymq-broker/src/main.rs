//! RelayMQ Broker - standalone broker process.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaymq_broker::{Args, Broker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaymq_broker=info,relaymq_auth=info,relaymq_admin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting RelayMQ broker");

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        listen_address = %config.listen_address,
        providers = ?config.providers,
        max_retries = config.auth_policy.max_retries,
        attempt_timeout_secs = config.auth_policy.attempt_timeout.as_secs(),
        "configuration loaded"
    );

    let broker = match Broker::bind(&config).await {
        Ok(broker) => broker,
        Err(e) => {
            tracing::error!(error = %e, "failed to start broker");
            return Err(e.into());
        }
    };

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    match broker.run_until_shutdown(shutdown_rx).await {
        Ok(()) => {
            tracing::info!("broker shutdown complete");
        }
        Err(e) => {
            tracing::error!(error = %e, "broker error");
            return Err(e.into());
        }
    }

    Ok(())
}
