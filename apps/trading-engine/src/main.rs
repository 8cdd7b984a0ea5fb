//! Trading Engine Binary
//!
//! Starts the trading engine: configuration, persistence, collaborator
//! adapters, the trading manager, and its background workers.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trading-engine
//! ```
//!
//! # Environment Variables
//!
//! - `TRADING_CONFIG`: Path to the YAML config (default: config.yaml)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use tokio::signal;
use trading_engine::feed::{MarketDataFeed, MockFeed};
use trading_engine::manager::TradingManager;
use trading_engine::persistence::TradingStore;
use trading_engine::telemetry::init_telemetry;
use trading_engine::{EngineError, load_config};

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    init_telemetry();
    tracing::info!("Starting trading engine");

    let config_path = std::env::var("TRADING_CONFIG").ok();
    let config = load_config(config_path.as_deref())?;

    let store = Arc::new(TradingStore::new_local(&config.persistence.db_path).await?);

    // The real broker and feed transports are deployment adapters wired in
    // here; without them the engine runs in simulation against the mock
    // feed and fills at plan prices.
    let feed: Arc<dyn MarketDataFeed> = Arc::new(MockFeed::new());

    let manager = Arc::new(TradingManager::new(
        &config,
        Arc::clone(&store),
        feed,
        None,
        None,
    ));

    if !manager.start() {
        tracing::error!("Trading manager failed to start");
        return Err(EngineError::Startup(
            "monitoring loop failed to start".to_string(),
        ));
    }

    tracing::info!("Trading engine ready");
    shutdown_signal().await;

    tracing::info!("Shutdown signal received");
    manager.stop().await;
    tracing::info!("Trading engine stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
