//! Rate-limited snapshot pass over the strike book.
//!
//! The gate is checked on every routed tick rather than via a dedicated
//! timer, so it fires on the first tick *after* the interval elapses. The
//! reporter emits a structured [`Snapshot`]; rendering is the caller's
//! concern.

use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use super::book::StrikeBook;
use crate::config::ReporterConfig;

/// Sign/magnitude classification of a strike's net exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GammaBias {
    /// Net exposure above the positive threshold (dealer long gamma).
    Positive,
    /// Net exposure below the negative threshold (dealer short gamma).
    Negative,
    Neutral,
}

impl GammaBias {
    pub fn label(&self) -> &'static str {
        match self {
            GammaBias::Positive => "LONG",
            GammaBias::Negative => "SHORT",
            GammaBias::Neutral => "-",
        }
    }
}

/// Open-interest magnitude marker for a strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallLevel {
    None,
    Wall,
    SuperWall,
}

impl WallLevel {
    pub fn label(&self) -> &'static str {
        match self {
            WallLevel::None => "",
            WallLevel::Wall => "WALL",
            WallLevel::SuperWall => "SUPER WALL",
        }
    }
}

/// One classified row of a snapshot, ordered by ascending strike.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub strike: f64,
    /// Net gamma exposure in millions.
    pub net_exposure_m: f64,
    pub total_open_interest: f64,
    pub bias: GammaBias,
    pub wall: WallLevel,
    /// Within `near_money_width` of the reference price.
    pub near_money: bool,
}

/// Immutable point-in-time view of the strike book.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub time: DateTime<Utc>,
    pub reference_price: f64,
    pub rows: Vec<SnapshotRow>,
}

/// Time-gated filter/sort/classify pass producing [`Snapshot`] values.
#[derive(Debug, Clone)]
pub struct SnapshotReporter {
    config: ReporterConfig,
    last_emit: Option<Instant>,
}

impl SnapshotReporter {
    pub fn new(config: ReporterConfig) -> Self {
        Self {
            config,
            last_emit: None,
        }
    }

    /// Gate check, invoked on every routed tick.
    ///
    /// Emits when the interval has elapsed since the last emission (the very
    /// first check emits immediately). While the reference price is unset the
    /// check skips entirely without consuming the gate, so the first tick
    /// after a reference arrives produces a snapshot.
    ///
    /// `now` drives the gate and `today` the expiry eviction; both are passed
    /// in rather than read from the clock so the pass is testable.
    pub fn check(
        &mut self,
        now: Instant,
        today: NaiveDate,
        book: &mut StrikeBook,
    ) -> Option<Snapshot> {
        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) > self.config.interval);
        if !due {
            return None;
        }

        let reference = book.reference_price()?;

        let evicted = book.evict_expired(today);
        if evicted > 0 {
            debug!(evicted, "dropped expired strikes from the book");
        }

        self.last_emit = Some(now);
        Some(self.build(reference, book))
    }

    fn build(&self, reference: f64, book: &StrikeBook) -> Snapshot {
        let config = &self.config;
        let rows = book
            .iter()
            .filter_map(|(strike, record)| {
                let price = strike.price();
                if (price - reference).abs() / reference > config.proximity_fraction {
                    return None;
                }

                let exposure = book.net_exposure_millions(record);
                let bias = if exposure > config.exposure_threshold_m {
                    GammaBias::Positive
                } else if exposure < -config.exposure_threshold_m {
                    GammaBias::Negative
                } else {
                    GammaBias::Neutral
                };

                let oi = record.total_open_interest();
                let wall = if oi > config.super_wall_threshold {
                    WallLevel::SuperWall
                } else if oi > config.wall_threshold {
                    WallLevel::Wall
                } else {
                    WallLevel::None
                };

                Some(SnapshotRow {
                    strike: price,
                    net_exposure_m: exposure,
                    total_open_interest: oi,
                    bias,
                    wall,
                    near_money: (price - reference).abs() < config.near_money_width,
                })
            })
            .collect();

        Snapshot {
            time: Utc::now(),
            reference_price: reference,
            rows,
        }
    }
}
