//! Tick dispatcher: routes events to the aggregators, drives the reporter
//! gate, and tracks the connection state machine and per-engine counters.
//!
//! One logical consumer per engine instance: every tick is fully processed
//! before the next is accepted, so no locks are needed inside an instance.
//! Instances never share mutable state.

use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::feed::ConnectionStatus;
use crate::gex::{Snapshot, SnapshotReporter, StrikeBook};
use crate::instrument::parse_instrument;
use crate::sma::{MultiWindowAggregator, SignalTally};
use crate::types::TickEvent;

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Streaming,
    Stopped,
}

/// Per-engine tick accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    /// Every tick taken off the intake, including skipped ones.
    pub ticks_received: u64,
    /// Received but not routed (non-option instrument, missing fields).
    pub ticks_skipped: u64,
    /// Lost to intake overflow (oldest dropped under overload).
    pub ticks_dropped: u64,
}

/// Owns the aggregators and the reporter; consumes one tick stream.
pub struct Engine {
    config: EngineConfig,
    state: EngineState,
    sma: MultiWindowAggregator,
    book: StrikeBook,
    reporter: SnapshotReporter,
    counters: EngineCounters,
    /// Start of the current streaming session; the rate-log basis.
    started: Instant,
    /// Ticks already received when the current session started.
    started_ticks: u64,
    last_price: f64,
    signals: SignalTally,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let sma = MultiWindowAggregator::new(
            config.window_start,
            config.window_count,
            config.resync_interval,
        );
        let reporter = SnapshotReporter::new(config.reporter.clone());
        Self {
            config,
            state: EngineState::Disconnected,
            sma,
            book: StrikeBook::new(),
            reporter,
            counters: EngineCounters::default(),
            started: Instant::now(),
            started_ticks: 0,
            last_price: 0.0,
            signals: SignalTally::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    pub fn sma(&self) -> &MultiWindowAggregator {
        &self.sma
    }

    pub fn strike_book(&self) -> &StrikeBook {
        &self.book
    }

    /// Band-signal counts from the most recent price tick.
    pub fn signal_tally(&self) -> SignalTally {
        self.signals
    }

    /// Apply a feed status update to the state machine.
    ///
    /// A reconnect after streaming restarts the SMA warm-up: the ring's
    /// history was lost while the connection was down.
    pub fn on_status(&mut self, status: ConnectionStatus) {
        if self.state == EngineState::Stopped {
            return;
        }
        let next = match status {
            ConnectionStatus::Reconnecting => EngineState::Connecting,
            ConnectionStatus::Connected => EngineState::Streaming,
            ConnectionStatus::Disconnected => EngineState::Disconnected,
        };
        if next == self.state {
            return;
        }
        info!(from = ?self.state, to = ?next, "engine state transition");
        if next == EngineState::Streaming {
            // New session: the tick rate is measured from here.
            self.started = Instant::now();
            self.started_ticks = self.counters.ticks_received;
            if self.counters.ticks_received > 0 {
                info!("reconnected with history lost, restarting warm-up");
                self.sma.reset();
            }
        }
        self.state = next;
    }

    /// Mark the engine stopped (cooperative shutdown).
    pub fn stop(&mut self) {
        if self.state != EngineState::Stopped {
            info!(counters = ?self.counters, "engine stopped");
            self.state = EngineState::Stopped;
        }
    }

    /// Process one tick; returns a snapshot when the reporter gate fires.
    ///
    /// `now` drives the gate and `today` the expiry eviction; both are
    /// passed in so dispatch stays testable without a live clock.
    pub fn handle_event(
        &mut self,
        event: TickEvent,
        now: Instant,
        today: NaiveDate,
    ) -> Option<Snapshot> {
        self.counters.ticks_received += 1;

        match event {
            TickEvent::Price(tick) => {
                if tick.best_bid <= 0.0 || tick.best_ask <= 0.0 {
                    self.counters.ticks_skipped += 1;
                    debug!(symbol = %tick.symbol, "skipping price tick with empty book side");
                } else {
                    let mid = tick.mid();
                    self.last_price = mid;
                    self.sma.update(mid);
                    self.signals = self.sma.signal_tally(mid, self.config.band_fraction);
                }
            }
            TickEvent::OptionTicker(tick) => {
                if let Some(price) = tick.index_price {
                    self.book.set_reference_price(price);
                }
                match parse_instrument(&tick.instrument) {
                    Some(instrument) => {
                        self.book.apply(&instrument, tick.open_interest, tick.gamma)
                    }
                    None => {
                        self.counters.ticks_skipped += 1;
                        debug!(instrument = %tick.instrument, "skipping non-option instrument");
                    }
                }
            }
            TickEvent::Index(tick) => self.book.set_reference_price(tick.price),
        }

        self.maybe_log_rate();
        self.reporter.check(now, today, &mut self.book)
    }

    /// Consume the bounded intake until the stream closes or the stop signal
    /// fires; snapshots flow out to the renderer channel.
    pub async fn run(
        &mut self,
        mut intake: broadcast::Receiver<TickEvent>,
        mut status_rx: watch::Receiver<ConnectionStatus>,
        mut stop: watch::Receiver<bool>,
        snapshots: mpsc::Sender<Snapshot>,
    ) {
        let mut status_open = true;
        let mut stop_open = true;
        loop {
            tokio::select! {
                result = intake.recv() => match result {
                    Ok(event) => {
                        let now = Instant::now();
                        let today = Utc::now().date_naive();
                        if let Some(snapshot) = self.handle_event(event, now, today) {
                            if snapshots.send(snapshot).await.is_err() {
                                warn!("snapshot receiver dropped, stopping engine");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.counters.ticks_dropped += n;
                        warn!(dropped = n, "intake overflow, oldest ticks dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("intake closed, stopping engine");
                        break;
                    }
                },
                changed = status_rx.changed(), if status_open => match changed {
                    Ok(()) => {
                        let status = *status_rx.borrow_and_update();
                        self.on_status(status);
                    }
                    Err(_) => status_open = false,
                },
                changed = stop.changed(), if stop_open => match changed {
                    Ok(()) => {
                        if *stop.borrow_and_update() {
                            info!("stop signal received");
                            break;
                        }
                    }
                    Err(_) => stop_open = false,
                }
            }
        }
        self.stop();
    }

    fn maybe_log_rate(&self) {
        if self.counters.ticks_received % self.config.rate_log_every != 0 {
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let session_ticks = self.counters.ticks_received - self.started_ticks;
        let rate = session_ticks as f64 / elapsed;
        let windows = self.sma.windows();
        let short = windows.first().and_then(|_| self.sma.mean(0));
        let long = windows.last().and_then(|_| self.sma.mean(windows.len() - 1));
        info!(
            ticks_per_s = rate,
            price = self.last_price,
            sma_short = ?short,
            sma_long = ?long,
            buy_windows = self.signals.buy,
            sell_windows = self.signals.sell,
            skipped = self.counters.ticks_skipped,
            dropped = self.counters.ticks_dropped,
            strikes = self.book.len(),
            "tick rate"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexTick, OptionTickerEvent, PriceTick};
    use chrono::{NaiveDate, Utc};
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        EngineConfig::default().with_windows(3, 3)
    }

    // Fixed date before the 27JUN26 fixture expiries so eviction never
    // depends on when the tests run.
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    fn price(bid: f64, ask: f64) -> TickEvent {
        TickEvent::Price(PriceTick {
            symbol: "BTCUSDT".into(),
            best_bid: bid,
            best_ask: ask,
            time_exchange: Utc::now(),
            time_received: Utc::now(),
        })
    }

    fn option(instrument: &str, oi: f64, gamma: f64) -> TickEvent {
        TickEvent::OptionTicker(OptionTickerEvent {
            instrument: instrument.into(),
            open_interest: oi,
            gamma,
            index_price: None,
        })
    }

    #[test]
    fn test_routes_price_ticks_to_sma_bank() {
        let mut engine = Engine::new(test_config());
        let now = Instant::now();
        for p in 1..=7 {
            engine.handle_event(price(p as f64, p as f64), now, today());
        }
        assert_eq!(engine.counters().ticks_received, 7);
        assert!((engine.sma().mean(0).unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_band_signals_tallied_per_price_tick() {
        let mut engine = Engine::new(test_config());
        let now = Instant::now();
        engine.handle_event(price(1.0, 1.0), now, today());
        // Not warm yet: every window holds.
        assert_eq!(engine.signal_tally().hold, 3);

        for p in 2..=7 {
            engine.handle_event(price(p as f64, p as f64), now, today());
        }
        // Rising tape: 7 sits above every band (means 6.0, 5.5, 5.0).
        let tally = engine.signal_tally();
        assert_eq!(tally.sell, 3);
        assert_eq!(tally.buy, 0);
    }

    #[test]
    fn test_non_option_skipped_but_counted() {
        let mut engine = Engine::new(test_config());
        let now = Instant::now();
        engine.handle_event(option("BTC-PERPETUAL", 100.0, 0.0), now, today());
        assert_eq!(engine.counters().ticks_received, 1);
        assert_eq!(engine.counters().ticks_skipped, 1);
        assert!(engine.strike_book().is_empty());
    }

    #[test]
    fn test_invalid_price_tick_skipped() {
        let mut engine = Engine::new(test_config());
        engine.handle_event(price(0.0, 100.0), Instant::now(), today());
        let counters = engine.counters();
        assert_eq!(counters.ticks_received, 1);
        assert_eq!(counters.ticks_skipped, 1);
        assert_eq!(engine.sma().ticks_seen(), 0);
    }

    #[test]
    fn test_embedded_and_dedicated_index_updates() {
        let mut engine = Engine::new(test_config());
        let now = Instant::now();
        engine.handle_event(
            TickEvent::OptionTicker(OptionTickerEvent {
                instrument: "BTC-27JUN26-40000-C".into(),
                open_interest: 600.0,
                gamma: 2e-5,
                index_price: Some(42000.0),
            }),
            now,
            today(),
        );
        assert_eq!(engine.strike_book().reference_price(), Some(42000.0));

        engine.handle_event(
            TickEvent::Index(IndexTick {
                index: "btc_usd".into(),
                price: 43000.0,
            }),
            now,
            today(),
        );
        assert_eq!(engine.strike_book().reference_price(), Some(43000.0));
    }

    #[test]
    fn test_snapshot_emitted_through_gate() {
        let mut engine = Engine::new(test_config());
        let start = Instant::now();

        // No reference price yet: no snapshot, gate not consumed.
        assert!(engine
            .handle_event(option("BTC-27JUN26-40000-C", 600.0, 2e-5), start, today())
            .is_none());

        let snapshot = engine.handle_event(
            TickEvent::Index(IndexTick {
                index: "btc_usd".into(),
                price: 42000.0,
            }),
            start,
            today(),
        );
        let snapshot = snapshot.expect("first gated check with a reference emits");
        assert_eq!(snapshot.rows.len(), 1);

        // 0.3s later the gate is closed.
        assert!(engine
            .handle_event(
                option("BTC-27JUN26-40000-C", 600.0, 2e-5),
                start + Duration::from_millis(300),
                today(),
            )
            .is_none());
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut engine = Engine::new(test_config());
        assert_eq!(engine.state(), EngineState::Disconnected);

        engine.on_status(ConnectionStatus::Reconnecting);
        assert_eq!(engine.state(), EngineState::Connecting);
        engine.on_status(ConnectionStatus::Connected);
        assert_eq!(engine.state(), EngineState::Streaming);
        engine.on_status(ConnectionStatus::Disconnected);
        assert_eq!(engine.state(), EngineState::Disconnected);

        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        // Stopped is terminal.
        engine.on_status(ConnectionStatus::Connected);
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_reconnect_restarts_warm_up() {
        let mut engine = Engine::new(test_config());
        engine.on_status(ConnectionStatus::Connected);
        let now = Instant::now();
        for p in 1..=7 {
            engine.handle_event(price(p as f64, p as f64), now, today());
        }
        assert!(engine.sma().is_warm());

        engine.on_status(ConnectionStatus::Disconnected);
        engine.on_status(ConnectionStatus::Reconnecting);
        engine.on_status(ConnectionStatus::Connected);
        assert!(!engine.sma().is_warm());
        assert_eq!(engine.sma().ticks_seen(), 0);
    }

    #[test]
    fn test_rate_basis_resets_on_reconnect() {
        let mut engine = Engine::new(test_config());
        engine.on_status(ConnectionStatus::Connected);
        let now = Instant::now();
        for p in 1..=7 {
            engine.handle_event(price(p as f64, p as f64), now, today());
        }
        assert_eq!(engine.started_ticks, 0);

        engine.on_status(ConnectionStatus::Disconnected);
        engine.on_status(ConnectionStatus::Connected);
        // Only ticks from the new session count towards the rate.
        assert_eq!(engine.started_ticks, 7);
        assert_eq!(engine.counters().ticks_received, 7);
    }

    #[tokio::test]
    async fn test_run_counts_dropped_on_intake_overflow() {
        let config = test_config().with_intake_capacity(4);
        let mut engine = Engine::new(config.clone());

        let (event_tx, intake) = broadcast::channel(config.intake_capacity);
        let (_status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (snapshot_tx, _snapshot_rx) = mpsc::channel(8);

        // Overflow the intake before the engine starts draining: the oldest
        // events are dropped and must be counted.
        for p in 1..=20 {
            let _ = event_tx.send(price(p as f64, p as f64));
        }
        drop(event_tx);

        let handle = tokio::spawn(async move {
            engine.run(intake, status_rx, stop_rx, snapshot_tx).await;
            engine
        });
        let engine = handle.await.expect("engine task");
        drop(stop_tx);

        let counters = engine.counters();
        assert_eq!(counters.ticks_dropped, 16);
        assert_eq!(counters.ticks_received, 4);
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_run_honours_stop_signal() {
        let mut engine = Engine::new(test_config());

        let (event_tx, intake) = broadcast::channel(16);
        let (_status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (snapshot_tx, _snapshot_rx) = mpsc::channel(8);

        let handle = tokio::spawn(async move {
            engine.run(intake, status_rx, stop_rx, snapshot_tx).await;
            engine
        });

        stop_tx.send(true).expect("stop signal");
        let engine = handle.await.expect("engine task");
        assert_eq!(engine.state(), EngineState::Stopped);
        drop(event_tx);
    }
}
