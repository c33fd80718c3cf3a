//! Engine configuration surface.
//!
//! Defaults mirror the recognized options of the production setup: window
//! range 10..1009, 1s reporter interval, ±15% proximity filter, 500/1000
//! wall thresholds, ±0.5M exposure classification.

use std::time::Duration;

use crate::error::EngineError;

/// Snapshot reporter tuning.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Minimum wall-clock time between snapshot emissions.
    pub interval: Duration,
    /// Keep strikes within this fraction of the reference price.
    pub proximity_fraction: f64,
    /// Net exposure (in $M) beyond which a strike is classified long/short gamma.
    pub exposure_threshold_m: f64,
    /// Total open interest above which a strike is marked as a wall.
    pub wall_threshold: f64,
    /// Total open interest above which a strike is marked as a super-wall.
    pub super_wall_threshold: f64,
    /// Absolute distance from the reference price for the near-the-money marker.
    pub near_money_width: f64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            proximity_fraction: 0.15,
            exposure_threshold_m: 0.5,
            wall_threshold: 500.0,
            super_wall_threshold: 1000.0,
            near_money_width: 250.0,
        }
    }
}

impl ReporterConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_proximity_fraction(mut self, fraction: f64) -> Self {
        self.proximity_fraction = fraction;
        self
    }

    pub fn with_exposure_threshold_m(mut self, threshold: f64) -> Self {
        self.exposure_threshold_m = threshold;
        self
    }

    pub fn with_wall_thresholds(mut self, wall: f64, super_wall: f64) -> Self {
        self.wall_threshold = wall;
        self.super_wall_threshold = super_wall;
        self
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Smallest rolling-window size.
    pub window_start: usize,
    /// Number of contiguous window sizes (windows are `start..start + count`).
    pub window_count: usize,
    /// Recompute running sums from the ring every this many ticks to bound
    /// floating-point drift.
    pub resync_interval: u64,
    /// Symmetric band fraction around each mean for {Buy, Sell, Hold} signals.
    pub band_fraction: f64,
    /// Emit a rate log line every this many received ticks.
    pub rate_log_every: u64,
    /// Bounded intake buffer between the transport and the engine.
    pub intake_capacity: usize,
    pub reporter: ReporterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_start: 10,
            window_count: 1000,
            resync_interval: 10_000,
            band_fraction: 0.005,
            rate_log_every: 50,
            intake_capacity: 1024,
            reporter: ReporterConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Ring capacity derived from the largest configured window.
    pub fn ring_capacity(&self) -> usize {
        self.window_start + self.window_count - 1
    }

    pub fn with_windows(mut self, start: usize, count: usize) -> Self {
        self.window_start = start;
        self.window_count = count;
        self
    }

    pub fn with_resync_interval(mut self, ticks: u64) -> Self {
        self.resync_interval = ticks;
        self
    }

    pub fn with_intake_capacity(mut self, capacity: usize) -> Self {
        self.intake_capacity = capacity;
        self
    }

    pub fn with_reporter(mut self, reporter: ReporterConfig) -> Self {
        self.reporter = reporter;
        self
    }

    /// Reject configurations the aggregators cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_start == 0 {
            return Err(EngineError::Config("window_start must be > 0".into()));
        }
        if self.window_count == 0 {
            return Err(EngineError::Config("window_count must be > 0".into()));
        }
        if self.resync_interval == 0 {
            return Err(EngineError::Config("resync_interval must be > 0".into()));
        }
        if self.intake_capacity == 0 {
            return Err(EngineError::Config("intake_capacity must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.reporter.proximity_fraction) {
            return Err(EngineError::Config(
                "proximity_fraction must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.window_start, 10);
        assert_eq!(config.window_count, 1000);
        assert_eq!(config.ring_capacity(), 1009);
        assert_eq!(config.reporter.interval, Duration::from_secs(1));
        assert!((config.reporter.proximity_fraction - 0.15).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .with_windows(3, 3)
            .with_resync_interval(100)
            .with_reporter(
                ReporterConfig::default()
                    .with_interval(Duration::from_millis(250))
                    .with_wall_thresholds(50.0, 100.0),
            );
        assert_eq!(config.ring_capacity(), 5);
        assert_eq!(config.reporter.interval, Duration::from_millis(250));
        assert_eq!(config.reporter.wall_threshold, 50.0);
    }

    #[test]
    fn test_validate_rejects_degenerate_windows() {
        assert!(EngineConfig::default().with_windows(0, 10).validate().is_err());
        assert!(EngineConfig::default().with_windows(10, 0).validate().is_err());
        assert!(EngineConfig::default()
            .with_resync_interval(0)
            .validate()
            .is_err());
    }
}
