//! Shared HTTP API types
//!
//! Contains only serializable types; no HTTP framework dependencies.
//! Services wrap these with framework-specific handlers.

pub mod types;

pub use types::{HardwareResponse, RejectReason, ScanStatus};
