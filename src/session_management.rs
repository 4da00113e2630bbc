//! Session and round recording.
//!
//! Accepts per-round game outcomes from authenticated players and appends them to the
//! ledger, keeping each session's running totals in step with its rounds.

pub mod session_recorder;
pub mod types;

pub use session_recorder::SessionRecorder;
pub use types::{RiskReport, RoundReport};
