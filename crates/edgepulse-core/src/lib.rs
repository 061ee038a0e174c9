//! EdgePulse Core - Shared state model for the simulated edge device
//!
//! This crate defines the records every duty cycle works on:
//! - Telemetry document (readings, event label, prediction map)
//! - Control state (mode and sampling cadence)
//! - Shared handles with atomic update / snapshot discipline
//! - Cooperative stop signal
//! - Error types

pub mod control;
pub mod error;
pub mod shared;
pub mod signal;
pub mod telemetry;

pub use control::*;
pub use error::*;
pub use shared::*;
pub use signal::*;
pub use telemetry::*;

/// Placeholder identity used before registration succeeds
pub const UNKNOWN_DEVICE: &str = "UNKNOWN";

/// Normalize a device identity (trimmed, upper case)
pub fn normalize_device_id(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Whether `raw` is a usable, non-placeholder identity
pub fn is_assigned_device_id(raw: &str) -> bool {
    let id = normalize_device_id(raw);
    !id.is_empty() && id != UNKNOWN_DEVICE
}
