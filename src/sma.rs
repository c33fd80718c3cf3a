//! Bank of overlapping rolling-window means maintained incrementally.
//!
//! N independent running sums, one per configured window size, updated in
//! O(N) per tick: each window subtracts the value leaving it (read from the
//! history ring) and adds the new value. Window sizes and sums live in
//! contiguous vectors for cache locality.
//!
//! Running sums are recomputed exactly from the ring once at the
//! warm-up/steady-state transition and every `resync_interval` ticks
//! thereafter, which bounds floating-point drift over long sessions.

use crate::ring::HistoryRing;

/// Discrete per-window signal from the optional band check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// How many windows currently signal each side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalTally {
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
}

impl SignalTally {
    pub fn from_signals(signals: &[Signal]) -> Self {
        let mut tally = Self::default();
        for signal in signals {
            match signal {
                Signal::Buy => tally.buy += 1,
                Signal::Sell => tally.sell += 1,
                Signal::Hold => tally.hold += 1,
            }
        }
        tally
    }
}

/// Fixed bank of rolling-window means over a single price stream.
///
/// The set of window sizes is fixed at construction and never changes at
/// runtime.
#[derive(Debug, Clone)]
pub struct MultiWindowAggregator {
    /// Contiguous window sizes, ascending.
    windows: Vec<usize>,
    /// One running sum per window.
    sums: Vec<f64>,
    ring: HistoryRing,
    /// Largest window size; equals the ring capacity.
    capacity: usize,
    ticks_seen: u64,
    resync_interval: u64,
}

impl MultiWindowAggregator {
    /// Build a bank of `count` contiguous windows `start..start + count`.
    ///
    /// # Panics
    /// Panics if `start`, `count` or `resync_interval` is zero.
    pub fn new(start: usize, count: usize, resync_interval: u64) -> Self {
        assert!(start > 0, "window sizes must be positive");
        assert!(count > 0, "at least one window is required");
        assert!(resync_interval > 0, "resync_interval must be positive");

        let windows: Vec<usize> = (start..start + count).collect();
        let capacity = start + count - 1;
        Self {
            sums: vec![0.0; windows.len()],
            windows,
            ring: HistoryRing::new(capacity),
            capacity,
            ticks_seen: 0,
            resync_interval,
        }
    }

    /// Number of configured windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Configured window sizes, ascending.
    pub fn windows(&self) -> &[usize] {
        &self.windows
    }

    /// Total ticks consumed since construction or the last reset.
    pub fn ticks_seen(&self) -> u64 {
        self.ticks_seen
    }

    /// True once the ring holds a full largest-window of history.
    pub fn is_warm(&self) -> bool {
        self.ticks_seen >= self.capacity as u64
    }

    /// Consume one price observation. O(N) in the number of windows.
    pub fn update(&mut self, price: f64) {
        if self.ticks_seen < self.capacity as u64 {
            // Warm-up: nothing has left any window yet, accumulate everywhere.
            for sum in &mut self.sums {
                *sum += price;
            }
            self.ring.push(price);
            self.ticks_seen += 1;
            if self.ticks_seen == self.capacity as u64 {
                // Ring just filled: rebuild each sum as an exact windowed sum.
                self.resync();
            }
            return;
        }

        // Steady state. The value leaving window W sits W-1 steps behind the
        // newest retained value, so it must be read before the push below
        // overwrites the oldest slot.
        for (i, &w) in self.windows.iter().enumerate() {
            if let Some(old) = self.ring.get(w - 1) {
                self.sums[i] += price - old;
            }
        }
        self.ring.push(price);
        self.ticks_seen += 1;

        if self.ticks_seen % self.resync_interval == 0 {
            self.resync();
        }
    }

    /// Mean of the `idx`-th window, `None` until warm-up completes.
    ///
    /// Pre-warm-up sums are not valid windowed sums and must never be
    /// surfaced as signals.
    pub fn mean(&self, idx: usize) -> Option<f64> {
        if !self.is_warm() {
            return None;
        }
        let w = *self.windows.get(idx)?;
        Some(self.sums[idx] / w as f64)
    }

    /// All window means, `None` until warm-up completes.
    pub fn means(&self) -> Option<Vec<f64>> {
        if !self.is_warm() {
            return None;
        }
        Some(
            self.windows
                .iter()
                .zip(&self.sums)
                .map(|(&w, &sum)| sum / w as f64)
                .collect(),
        )
    }

    /// Per-window band signal against the current price.
    ///
    /// Bands are symmetric around each mean (`mean * (1 ± band_fraction)`).
    /// Price strictly below the lower band signals `Buy` (mean reversion),
    /// strictly above the upper band signals `Sell`; ties favour `Hold`.
    /// Deterministic, no hysteresis. All `Hold` before warm-up.
    pub fn signals(&self, price: f64, band_fraction: f64) -> Vec<Signal> {
        match self.means() {
            None => vec![Signal::Hold; self.windows.len()],
            Some(means) => means
                .iter()
                .map(|mean| {
                    let lower = mean * (1.0 - band_fraction);
                    let upper = mean * (1.0 + band_fraction);
                    if price < lower {
                        Signal::Buy
                    } else if price > upper {
                        Signal::Sell
                    } else {
                        Signal::Hold
                    }
                })
                .collect(),
        }
    }

    /// Band signals reduced to per-side counts.
    pub fn signal_tally(&self, price: f64, band_fraction: f64) -> SignalTally {
        SignalTally::from_signals(&self.signals(price, band_fraction))
    }

    /// Discard all state for a fresh warm-up (history lost on reconnect).
    pub fn reset(&mut self) {
        self.ring.clear();
        self.sums.fill(0.0);
        self.ticks_seen = 0;
    }

    /// Recompute every running sum directly from the ring.
    fn resync(&mut self) {
        for (i, &w) in self.windows.iter().enumerate() {
            if let Some(sum) = self.ring.sum_recent(w) {
                self.sums[i] = sum;
            }
        }
    }
}
