//! Normalized tick types shared by the feed adapters and the engine.
//!
//! Feed adapters translate exchange wire formats into these events; the
//! engine consumes them and never stores a tick beyond the scalar values
//! retained by the history ring.

use chrono::{DateTime, Utc};

/// One inbound market event, routed by the engine to the relevant aggregator.
#[derive(Debug, Clone)]
pub enum TickEvent {
    /// Top-of-book update from the price stream.
    Price(PriceTick),
    /// Per-instrument options ticker update (open interest + greeks).
    OptionTicker(OptionTickerEvent),
    /// Dedicated index price update.
    Index(IndexTick),
}

/// Normalized top-of-book tick.
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    /// Timestamp assigned by the exchange.
    pub time_exchange: DateTime<Utc>,
    /// Timestamp assigned locally on receipt, for latency tracking.
    pub time_received: DateTime<Utc>,
}

impl PriceTick {
    /// Mid price between best bid and best ask.
    pub fn mid(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }

    /// Rough exchange-to-local latency (clocks may not be synced).
    pub fn latency(&self) -> chrono::Duration {
        self.time_received - self.time_exchange
    }
}

/// Options ticker update for a single instrument.
///
/// The instrument name is kept raw here; parsing into
/// (underlying, expiry, strike, side) happens at routing time so that
/// non-option instruments can be counted as received-but-skipped.
#[derive(Debug, Clone)]
pub struct OptionTickerEvent {
    pub instrument: String,
    pub open_interest: f64,
    pub gamma: f64,
    /// Index price embedded on the ticker, when the venue provides it.
    pub index_price: Option<f64>,
}

/// Dedicated index (spot/reference) price update.
#[derive(Debug, Clone)]
pub struct IndexTick {
    pub index: String,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mid_price() {
        let tick = PriceTick {
            symbol: "BTCUSDT".into(),
            best_bid: 100.0,
            best_ask: 100.5,
            time_exchange: Utc::now(),
            time_received: Utc::now(),
        };
        assert!((tick.mid() - 100.25).abs() < 1e-12);
    }
}
