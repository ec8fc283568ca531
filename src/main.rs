//! IBC Packet Lifecycle Indexer
//!
//! Reconstructs the lifecycle of IBC packets crossing a Babylon-family
//! chain (send → receive → acknowledge → timeout), stitching together
//! events arriving in different transactions and orders, and derives
//! per-channel, per-relayer and per-token analytics from the result.

use std::sync::Arc;

use ibc_indexer::config::Config;
use ibc_indexer::db::{self, IbcStore, PgStore};
use ibc_indexer::denom::TokenRegistry;
use ibc_indexer::price::PriceProvider;
use ibc_indexer::processor::EventProcessor;
use ibc_indexer::resolver::ChainResolver;
use ibc_indexer::token::TokenService;
use ibc_indexer::watcher::ChainWatcher;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting IBC indexer");

    let config = Config::load()?;
    tracing::info!(
        networks = ?config.ingest.networks,
        mainnet_id = %config.local_chain.mainnet_id,
        testnet_id = %config.local_chain.testnet_id,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let store: Arc<dyn IbcStore> = Arc::new(PgStore::new(pool));

    let registry = TokenRegistry::seeded();
    let provider = Arc::new(PriceProvider::new(&config.price, registry.stable_ids())?);
    let tokens = Arc::new(TokenService::new(registry, provider.clone()));

    // Shutdown channels: one per watcher, one for the price refresh loop
    let mut shutdown_txs = Vec::new();
    let (refresh_shutdown_tx, refresh_shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    shutdown_txs.push(refresh_shutdown_tx);

    // Price refresh loop: diagnostics every half-TTL, batched refresh of
    // stale prices through the token service
    let refresh_provider = provider.clone();
    tokio::spawn(async move {
        refresh_provider.run_refresh_loop(refresh_shutdown_rx).await;
    });
    let refresh_tokens = tokens.clone();
    let refresh_ttl = provider.cache_ttl();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(refresh_ttl / 2).await;
            let refreshed = refresh_tokens.refresh_stale_prices(refresh_ttl).await;
            if refreshed > 0 {
                tracing::debug!(refreshed, "Refreshed stale token prices");
            }
        }
    });

    // API server (health, metrics, status)
    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], 9090));
    let api_store = store.clone();
    let api_networks = config.ingest.networks.clone();
    tokio::spawn(async move {
        if let Err(e) = ibc_indexer::api::start_api_server(api_addr, api_store, api_networks).await
        {
            tracing::error!(error = %e, "API server error");
        }
    });

    // One watcher per network, each with its own processor so per-network
    // event streams stay serialized
    let mut watcher_handles = Vec::new();
    for network in &config.ingest.networks {
        let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
        shutdown_txs.push(shutdown_tx);

        let resolver = ChainResolver::new(store.clone(), config.local_chain.clone());
        let processor = Arc::new(EventProcessor::new(store.clone(), resolver));
        let watcher = ChainWatcher::new(
            &config.ingest.lcd_url,
            *network,
            config.ingest.poll_interval_ms,
            store.clone(),
            processor,
        )?;

        let network = *network;
        watcher_handles.push(tokio::spawn(async move {
            if let Err(e) = watcher.run(shutdown_rx).await {
                tracing::error!(%network, error = %e, "Watcher error");
            }
        }));
    }

    tracing::info!("Workers started, indexing");

    // Fan the shutdown signal out to every worker
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        for tx in shutdown_txs {
            let _ = tx.send(()).await;
        }
    });

    for handle in watcher_handles {
        let _ = handle.await;
    }

    tracing::info!("IBC indexer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ibc_indexer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
