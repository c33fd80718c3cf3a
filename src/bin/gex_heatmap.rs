//! GEX heatmap terminal: live per-strike gamma exposure over an options
//! chain, printed as a classified table once per reporter interval.

use std::error::Error;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tick_aggregators::feed::deribit::{spawn_deribit_feed, DeribitFeedConfig};
use tick_aggregators::{ConnectionStatus, Engine, EngineConfig, Snapshot};

/// Currency whose chain to track, from the CURRENCY env var (default BTC).
fn currency() -> String {
    std::env::var("CURRENCY").unwrap_or_else(|_| "BTC".to_string())
}

fn render(snapshot: &Snapshot) {
    println!(
        "--- GEX heatmap @ {} (index {:.2}) ---",
        snapshot.time.format("%H:%M:%S"),
        snapshot.reference_price
    );
    println!(
        "   {:>10} | {:>13} | {:>12} | {:>6} | {}",
        "strike", "net GEX ($M)", "total OI", "bias", "wall"
    );
    for row in &snapshot.rows {
        let marker = if row.near_money { ">>" } else { "  " };
        println!(
            "{} {:>10.0} | {:>+13.4} | {:>12.0} | {:>6} | {}",
            marker,
            row.strike,
            row.net_exposure_m,
            row.total_open_interest,
            row.bias.label(),
            row.wall.label()
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Install the ring crypto provider for rustls-backed REST/WSS.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let config = EngineConfig::default();
    config.validate()?;
    let mut engine = Engine::new(config.clone());
    let feed_config = DeribitFeedConfig::new(currency());
    info!(currency = %feed_config.currency, "starting GEX heatmap engine");

    let (event_tx, intake) = broadcast::channel(config.intake_capacity);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(16);

    let feed = spawn_deribit_feed(feed_config, event_tx, status_tx, stop_rx.clone());

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

    while let Some(snapshot) = snapshot_rx.recv().await {
        render(&snapshot);
    }

    let engine = engine_task.await?;
    feed.abort();
    info!(counters = ?engine.counters(), "GEX heatmap engine finished");
    Ok(())
}
