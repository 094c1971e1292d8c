use access_relay::{
    config::{Config, StoreBackend},
    error::RelayError,
    services::*,
};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration
    let config = Config::from_env().map_err(|e| RelayError::ConfigError(format!("{:#}", e)))?;

    tracing::info!("Starting access-relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let startup_backoff = config.backoff_policy();

    // Chain side
    let source = Arc::new(EthereumLogSource::new(
        &config.rpc_url,
        config.rpc_fallback_url.as_deref(),
        config.rpc_timeout,
    )?);

    let contract = config.contract_address;
    let verified = retry_transient("Contract check", startup_backoff, &cancel, || {
        source.verify_contract(contract)
    })
    .await?;
    if verified.is_none() {
        return Ok(());
    }

    match source.contract_price(contract).await {
        Ok(price) => tracing::info!(price = %price, "Current access price"),
        Err(e) => tracing::warn!(error = %e, "Could not read access price"),
    }

    // Credential store
    let store: Arc<dyn CredentialStore> = match config.store_backend {
        StoreBackend::Redis => {
            let credentials = config
                .load_store_credentials()
                .map_err(|e| RelayError::ConfigError(format!("{:#}", e)))?;
            let connected = retry_transient("Credential store connect", startup_backoff, &cancel, || {
                RedisCredentialStore::connect(&credentials, &config.collection_name, config.store_timeout)
            })
            .await?;
            match connected {
                Some(store) => Arc::new(store),
                None => return Ok(()),
            }
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory credential store, credentials will not persist");
            Arc::new(MemoryCredentialStore::new())
        }
    };

    // Starting watermark: no replay of history before the first run
    let head = retry_transient("Head fetch", startup_backoff, &cancel, || source.current_head()).await?;
    let Some(head) = head else {
        return Ok(());
    };
    let watermark = WatermarkTracker::starting_at(head, config.start_block);
    tracing::info!(head, watermark = watermark.get(), "Connected to chain");

    let mut poller = PaymentPoller::new(
        source,
        EventDecoder::new(),
        store,
        watermark,
        contract,
        PollerSettings::from_config(&config),
    );

    poller.run(cancel).await;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down gracefully...");
    cancel.cancel();
}
