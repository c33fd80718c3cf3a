//! Price-stream feed adapter (Binance futures combined book-ticker stream).

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{Backoff, ConnectionStatus};
use crate::types::{PriceTick, TickEvent};

/// Price feed configuration.
#[derive(Debug, Clone)]
pub struct BinanceFeedConfig {
    /// Combined-stream endpoint.
    pub base_url: String,
    /// Trading pairs to subscribe, e.g. `["btcusdt"]`.
    pub symbols: Vec<String>,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for BinanceFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://fstream.binance.com/stream".to_string(),
            symbols: vec!["btcusdt".to_string()],
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

impl BinanceFeedConfig {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Combined-stream URL: `<base>?streams=<sym>@bookTicker/<sym>@bookTicker`.
    pub fn stream_url(&self) -> String {
        let streams = self
            .symbols
            .iter()
            .map(|symbol| format!("{}@bookTicker", symbol.to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}?streams={}", self.base_url, streams)
    }
}

/// Combined-stream envelope: `{"stream": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: BookTickerMsg,
}

/// Book-ticker payload. Prices arrive as decimal strings.
#[derive(Debug, Deserialize)]
struct BookTickerMsg {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    best_bid: String,
    #[serde(rename = "a")]
    best_ask: String,
    #[serde(rename = "E", default)]
    event_time_ms: Option<i64>,
}

impl BookTickerMsg {
    /// Normalize into a [`PriceTick`]; `None` when a price field does not
    /// parse (the tick is skipped, the stream continues).
    fn into_tick(self, received: DateTime<Utc>) -> Option<PriceTick> {
        let best_bid: f64 = self.best_bid.parse().ok()?;
        let best_ask: f64 = self.best_ask.parse().ok()?;
        let time_exchange = self
            .event_time_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(received);
        Some(PriceTick {
            symbol: self.symbol,
            best_bid,
            best_ask,
            time_exchange,
            time_received: received,
        })
    }
}

/// Spawn the price feed task.
///
/// Ticks flow into `events` (the bounded intake), connection state into
/// `status_tx`. The task reconnects with bounded backoff until the stop
/// signal fires.
pub fn spawn_binance_feed(
    config: BinanceFeedConfig,
    events: broadcast::Sender<TickEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let url = config.stream_url();
        let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_max);
        // Once the stop sender is gone, `changed()` resolves with Err forever;
        // the branch must be disabled or the loops spin on it.
        let mut stop_open = true;
        info!(%url, "starting price feed");

        loop {
            if *stop.borrow() {
                break;
            }
            let _ = status_tx.send(ConnectionStatus::Reconnecting);

            match connect_async(&url).await {
                Ok((ws_stream, _)) => {
                    info!("price feed connected");
                    backoff.reset();
                    let _ = status_tx.send(ConnectionStatus::Connected);

                    let (_, mut read) = ws_stream.split();
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<StreamEnvelope>(&text) {
                                        Ok(envelope) => {
                                            match envelope.data.into_tick(Utc::now()) {
                                                Some(tick) => {
                                                    let _ = events.send(TickEvent::Price(tick));
                                                }
                                                None => debug!("price tick with unparseable fields"),
                                            }
                                        }
                                        Err(e) => debug!(error = %e, "unrecognised stream message"),
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    warn!("server closed price stream");
                                    break;
                                }
                                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                    // Heartbeat - handled automatically
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    error!(error = %e, "price stream error");
                                    break;
                                }
                                None => break,
                            },
                            changed = stop.changed(), if stop_open => match changed {
                                Ok(()) => {
                                    if *stop.borrow() {
                                        info!("price feed stopping");
                                        let _ = status_tx.send(ConnectionStatus::Disconnected);
                                        return;
                                    }
                                }
                                Err(_) => stop_open = false,
                            }
                        }
                    }
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                }
                Err(e) => {
                    error!(error = %e, "failed to connect price feed");
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                }
            }

            let delay = backoff.next_delay();
            debug!(?delay, "waiting before price feed reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = stop.changed(), if stop_open => match changed {
                    Ok(()) => {
                        if *stop.borrow() {
                            break;
                        }
                    }
                    Err(_) => stop_open = false,
                }
            }
        }
    })
}
