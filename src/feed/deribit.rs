//! Options-chain feed adapter (Deribit JSON-RPC over WebSocket).
//!
//! Instruments are discovered over REST, then subscribed in paced chunks to
//! respect the venue's rate limits. The price index channel is subscribed
//! first so the reference price starts ticking before the chain does.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{Backoff, ConnectionStatus};
use crate::error::EngineError;
use crate::types::{IndexTick, OptionTickerEvent, TickEvent};

/// Options feed configuration.
#[derive(Debug, Clone)]
pub struct DeribitFeedConfig {
    pub ws_url: String,
    pub rest_url: String,
    /// Currency whose option chain to track, e.g. `BTC`.
    pub currency: String,
    /// Cap on discovered instruments to subscribe.
    pub max_instruments: usize,
    /// Channels per subscribe request.
    pub subscribe_chunk: usize,
    /// Pacing delay between chunked subscribe requests.
    pub subscribe_pacing: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for DeribitFeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://www.deribit.com/ws/api/v2".to_string(),
            rest_url: "https://www.deribit.com/api/v2".to_string(),
            currency: "BTC".to_string(),
            max_instruments: 50,
            subscribe_chunk: 50,
            subscribe_pacing: Duration::from_millis(20),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

impl DeribitFeedConfig {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            ..Default::default()
        }
    }

    pub fn with_max_instruments(mut self, max: usize) -> Self {
        self.max_instruments = max;
        self
    }

    fn index_channel(&self) -> String {
        format!("deribit_price_index.{}_usd", self.currency.to_lowercase())
    }
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    #[serde(default)]
    result: Option<Vec<InstrumentInfo>>,
}

#[derive(Debug, Deserialize)]
struct InstrumentInfo {
    instrument_name: String,
}

/// JSON-RPC subscription envelope: `{"params": {"channel": ..., "data": ...}}`.
#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    params: Option<RpcParams>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcParams {
    channel: String,
    data: serde_json::Value,
}

/// Ticker payload for one option instrument.
#[derive(Debug, Deserialize)]
struct TickerMsg {
    instrument_name: String,
    #[serde(default)]
    open_interest: f64,
    #[serde(default)]
    greeks: Option<Greeks>,
    #[serde(default)]
    index_price: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Greeks {
    #[serde(default)]
    gamma: Option<f64>,
}

/// Price index payload: `{"index_name": "btc_usd", "price": ...}`.
#[derive(Debug, Deserialize)]
struct IndexMsg {
    index_name: String,
    price: f64,
}

/// Fetch all active option instruments for the configured currency.
async fn fetch_instruments(
    client: &reqwest::Client,
    config: &DeribitFeedConfig,
) -> Result<Vec<String>, EngineError> {
    let url = format!(
        "{}/public/get_instruments?currency={}&kind=option&expired=false",
        config.rest_url, config.currency
    );
    debug!(%url, "fetching option instruments");
    let response = client
        .get(&url)
        .send()
        .await?
        .json::<InstrumentsResponse>()
        .await?;
    let mut names: Vec<String> = response
        .result
        .ok_or_else(|| EngineError::Subscribe("instrument listing missing result".into()))?
        .into_iter()
        .map(|info| info.instrument_name)
        .collect();
    names.truncate(config.max_instruments);
    if names.is_empty() {
        return Err(EngineError::Subscribe(format!(
            "no active options found for {}",
            config.currency
        )));
    }
    info!(count = names.len(), currency = %config.currency, "discovered option instruments");
    Ok(names)
}

/// Route one RPC message into the intake. Returns `false` for messages that
/// carry no subscription data (subscribe confirmations, errors).
fn route_message(message: RpcMessage, events: &broadcast::Sender<TickEvent>) -> bool {
    if let Some(err) = message.error {
        warn!(error = %err, "api error from options venue");
        return false;
    }
    let Some(params) = message.params else {
        // Response to a subscribe request.
        return false;
    };

    if params.channel.starts_with("ticker.") {
        match serde_json::from_value::<TickerMsg>(params.data) {
            Ok(ticker) => {
                let gamma = ticker.greeks.and_then(|g| g.gamma).unwrap_or(0.0);
                let _ = events.send(TickEvent::OptionTicker(OptionTickerEvent {
                    instrument: ticker.instrument_name,
                    open_interest: ticker.open_interest,
                    gamma,
                    index_price: ticker.index_price,
                }));
                true
            }
            Err(e) => {
                debug!(error = %e, channel = %params.channel, "unparseable ticker payload");
                false
            }
        }
    } else if params.channel.starts_with("deribit_price_index") {
        match serde_json::from_value::<IndexMsg>(params.data) {
            Ok(index) => {
                let _ = events.send(TickEvent::Index(IndexTick {
                    index: index.index_name,
                    price: index.price,
                }));
                true
            }
            Err(e) => {
                debug!(error = %e, "unparseable index payload");
                false
            }
        }
    } else {
        debug!(channel = %params.channel, "message on unexpected channel");
        false
    }
}

/// Spawn the options feed task.
///
/// Discovers instruments, subscribes in paced chunks, and streams normalized
/// ticker/index events into the bounded intake, reconnecting with bounded
/// backoff until the stop signal fires.
pub fn spawn_deribit_feed(
    config: DeribitFeedConfig,
    events: broadcast::Sender<TickEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_max);
        // Once the stop sender is gone, `changed()` resolves with Err forever;
        // the branch must be disabled or the loops spin on it.
        let mut stop_open = true;
        info!(url = %config.ws_url, currency = %config.currency, "starting options feed");

        loop {
            if *stop.borrow() {
                break;
            }
            let _ = status_tx.send(ConnectionStatus::Reconnecting);

            match run_connection(&config, &client, &events, &status_tx, &mut stop, &mut backoff).await
            {
                Ok(()) => {
                    // Clean stop requested.
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                    return;
                }
                Err(e) => {
                    error!(error = %e, "options feed connection ended");
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                }
            }

            let delay = backoff.next_delay();
            debug!(?delay, "waiting before options feed reconnect");
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

/// One full connection lifecycle: discover, connect, subscribe, read.
///
/// Returns `Ok(())` only when the stop signal requested a clean shutdown;
/// all other exits are connection errors that trigger a reconnect.
async fn run_connection(
    config: &DeribitFeedConfig,
    client: &reqwest::Client,
    events: &broadcast::Sender<TickEvent>,
    status_tx: &watch::Sender<ConnectionStatus>,
    stop: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> Result<(), EngineError> {
    let instruments = fetch_instruments(client, config).await?;

    let (ws_stream, _) = connect_async(&config.ws_url).await?;
    info!("options feed connected");
    let (mut write, mut read) = ws_stream.split();

    // Index first: it always ticks, so the reference price warms up even
    // when the chain is quiet.
    let index_request = json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "public/subscribe",
        "params": {"channels": [config.index_channel()]}
    });
    write
        .send(Message::Text(index_request.to_string().into()))
        .await?;

    // Paced, chunked ticker subscriptions to respect rate limits.
    for (chunk_id, chunk) in instruments.chunks(config.subscribe_chunk).enumerate() {
        let channels: Vec<String> = chunk
            .iter()
            .map(|name| format!("ticker.{name}.100ms"))
            .collect();
        let request = json!({
            "jsonrpc": "2.0",
            "id": chunk_id + 1,
            "method": "public/subscribe",
            "params": {"channels": channels}
        });
        write.send(Message::Text(request.to_string().into())).await?;
        tokio::time::sleep(config.subscribe_pacing).await;
    }
    info!(count = instruments.len(), "subscribed to option tickers");
    let _ = status_tx.send(ConnectionStatus::Connected);
    backoff.reset();

    // See spawn_deribit_feed: a closed stop channel must not spin the select.
    let mut stop_open = true;
    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<RpcMessage>(&text) {
                        Ok(message) => {
                            route_message(message, events);
                        }
                        Err(e) => debug!(error = %e, "unrecognised rpc message"),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(EngineError::Connection(
                        "server closed options stream".into(),
                    ));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Heartbeat - handled automatically
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(EngineError::from(e)),
                None => {
                    return Err(EngineError::Connection("options stream ended".into()));
                }
            },
            changed = stop.changed(), if stop_open => match changed {
                Ok(()) => {
                    if *stop.borrow() {
                        info!("options feed stopping");
                        return Ok(());
                    }
                }
                Err(_) => stop_open = false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_channel_name() {
        let config = DeribitFeedConfig::new("BTC");
        assert_eq!(config.index_channel(), "deribit_price_index.btc_usd");
        assert_eq!(
            DeribitFeedConfig::new("eth").index_channel(),
            "deribit_price_index.eth_usd"
        );
    }

    #[test]
    fn test_route_ticker_message() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {
                "channel": "ticker.BTC-29DEC23-40000-C.100ms",
                "data": {
                    "instrument_name": "BTC-29DEC23-40000-C",
                    "open_interest": 600.0,
                    "greeks": {"gamma": 0.00002, "delta": 0.4},
                    "index_price": 42000.0,
                    "mark_price": 0.012
                }
            }
        }"#;
        let message: RpcMessage = serde_json::from_str(raw).unwrap();
        let (tx, mut rx) = broadcast::channel(4);
        assert!(route_message(message, &tx));

        match rx.try_recv().unwrap() {
            TickEvent::OptionTicker(tick) => {
                assert_eq!(tick.instrument, "BTC-29DEC23-40000-C");
                assert_eq!(tick.open_interest, 600.0);
                assert_eq!(tick.gamma, 0.00002);
                assert_eq!(tick.index_price, Some(42000.0));
            }
            other => panic!("expected option ticker, got {other:?}"),
        }
    }

    #[test]
    fn test_route_ticker_with_missing_greeks() {
        let raw = r#"{
            "params": {
                "channel": "ticker.BTC-29DEC23-40000-C.100ms",
                "data": {"instrument_name": "BTC-29DEC23-40000-C", "open_interest": 10.0}
            }
        }"#;
        let message: RpcMessage = serde_json::from_str(raw).unwrap();
        let (tx, mut rx) = broadcast::channel(4);
        assert!(route_message(message, &tx));

        match rx.try_recv().unwrap() {
            TickEvent::OptionTicker(tick) => {
                assert_eq!(tick.gamma, 0.0);
                assert_eq!(tick.index_price, None);
            }
            other => panic!("expected option ticker, got {other:?}"),
        }
    }

    #[test]
    fn test_route_index_message() {
        let raw = r#"{
            "params": {
                "channel": "deribit_price_index.btc_usd",
                "data": {"index_name": "btc_usd", "price": 42123.5}
            }
        }"#;
        let message: RpcMessage = serde_json::from_str(raw).unwrap();
        let (tx, mut rx) = broadcast::channel(4);
        assert!(route_message(message, &tx));

        match rx.try_recv().unwrap() {
            TickEvent::Index(tick) => {
                assert_eq!(tick.index, "btc_usd");
                assert_eq!(tick.price, 42123.5);
            }
            other => panic!("expected index tick, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_loop_survives_dropped_stop_sender() {
        let (event_tx, _intake) = broadcast::channel(8);
        let (status_tx, _status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut config = DeribitFeedConfig::new("BTC");
        config.rest_url = "http://127.0.0.1:9/api/v2".to_string();
        config.ws_url = "ws://127.0.0.1:9/ws/api/v2".to_string();
        let handle = spawn_deribit_feed(config, event_tx, status_tx, stop_rx);
        drop(stop_tx);

        // Without a stop sender the loop must keep backing off between
        // discovery attempts instead of spinning on the closed watch channel.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[test]
    fn test_subscribe_confirmation_is_ignored() {
        let raw = r#"{"jsonrpc": "2.0", "id": 1, "result": ["ticker.X.100ms"]}"#;
        let message: RpcMessage = serde_json::from_str(raw).unwrap();
        let (tx, _rx) = broadcast::channel(4);
        assert!(!route_message(message, &tx));
    }
}
