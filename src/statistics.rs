//! Derived player and global statistics.
//!
//! Everything here is computed on read from the raw rounds and sessions in the ledger,
//! so the numbers can never go stale relative to the recorded events.

pub mod aggregator;
pub mod metrics;
pub mod types;

pub use aggregator::StatsAggregator;
pub use types::{GlobalStatsView, UserStatsView};
