//! Options-chain aggregation: per-strike open interest / gamma state and the
//! rate-limited gamma-exposure snapshot pass.

mod book;
mod reporter;

pub use book::{StrikeBook, StrikeRecord};
pub use reporter::{GammaBias, Snapshot, SnapshotReporter, SnapshotRow, WallLevel};
