//! Engine-owned tables: transient presence logs, ledger, run markers and devices

pub mod devices;
pub mod ledger;
pub mod morning_log;
pub mod period_log;
pub mod runs;

pub use runs::{RunHistoryEntry, RunMarker, RunState, RunTally, RunTrigger, UnitFailure};
