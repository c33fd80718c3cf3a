//! Real-time incremental aggregation engines for live market tick streams.
//!
//! Two engines share one core: a bank of overlapping rolling-window means
//! updated from a single price stream, and a strike-keyed aggregation over
//! an options chain producing a derived gamma-exposure metric with a
//! rate-limited snapshot pass.
//!
//! The library is consumed by two thin binaries:
//! - `sma-bank`: ~1000 concurrent rolling means over a live futures stream
//! - `gex-heatmap`: per-strike gamma exposure snapshots over an options chain
//!
//! All aggregate state is bounded and in-memory for the life of the process;
//! snapshots are structured values, rendering is the caller's concern.

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod gex;
pub mod instrument;
pub mod ring;
pub mod sma;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{EngineConfig, ReporterConfig};
pub use engine::{Engine, EngineCounters, EngineState};
pub use error::EngineError;
pub use feed::ConnectionStatus;
pub use gex::{GammaBias, Snapshot, SnapshotReporter, SnapshotRow, StrikeBook, WallLevel};
pub use instrument::{parse_instrument, OptionInstrument, OptionKind, Strike};
pub use ring::HistoryRing;
pub use sma::{MultiWindowAggregator, Signal, SignalTally};
pub use types::{IndexTick, OptionTickerEvent, PriceTick, TickEvent};
