//! SMA bank terminal: maintains ~1000 concurrent rolling means over a live
//! futures price stream and logs tick rate and edge-window means.

use std::error::Error;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tick_aggregators::feed::binance::{spawn_binance_feed, BinanceFeedConfig};
use tick_aggregators::{ConnectionStatus, Engine, EngineConfig};

/// Trading pairs from the SYMBOLS env var (comma separated, default btcusdt).
fn symbols() -> Vec<String> {
    std::env::var("SYMBOLS")
        .unwrap_or_else(|_| "btcusdt".to_string())
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Install the ring crypto provider for rustls-backed WSS.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let config = EngineConfig::default();
    config.validate()?;
    let mut engine = Engine::new(config.clone());
    info!(
        windows = config.window_count,
        capacity = config.ring_capacity(),
        "starting SMA bank engine"
    );

    let (event_tx, intake) = broadcast::channel(config.intake_capacity);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(16);

    let feed = spawn_binance_feed(
        BinanceFeedConfig::new(symbols()),
        event_tx,
        status_tx,
        stop_rx.clone(),
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = stop_tx.send(true);
        }
    });

    let engine_task = tokio::spawn(async move {
        engine.run(intake, status_rx, stop_rx, snapshot_tx).await;
        engine
    });

    // The price stream never produces snapshots; this drains until shutdown.
    while snapshot_rx.recv().await.is_some() {}

    let engine = engine_task.await?;
    feed.abort();
    info!(counters = ?engine.counters(), "SMA bank engine finished");
    Ok(())
}
