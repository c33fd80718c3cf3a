//! Feed adapters: exchange transports feeding the bounded tick intake.
//!
//! Each adapter owns its connection lifecycle: connect, subscribe, read,
//! and reconnect with bounded exponential backoff. Normalized ticks flow
//! into a `tokio::sync::broadcast` channel (the bounded intake; under
//! overload the oldest entries are dropped and counted by the engine), and
//! connection state flows through a `watch` channel.

use std::time::Duration;

pub mod binance;
pub mod deribit;

/// Connection status updates published by every feed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Bounded exponential reconnect backoff.
///
/// Doubles from `base` up to `max`; reset after a successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
