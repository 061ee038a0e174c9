//! EdgePulse Runtime - the simulated device and its duty cycles
//!
//! This crate provides:
//! - Environment / env file configuration
//! - Structured logging setup
//! - Reading generator, predictor, local sink and remote send loop
//! - Registration and remote control polling
//! - Operator key handling and ordered shutdown

pub mod config;
pub mod device;
pub mod generator;
pub mod logging;
pub mod poller;
pub mod predictor;
pub mod registration;
pub mod shutdown;
pub mod sink;
pub mod streamer;

pub use config::*;
pub use device::*;
pub use generator::*;
pub use logging::*;
pub use poller::*;
pub use predictor::*;
pub use registration::*;
pub use shutdown::*;
pub use sink::*;
pub use streamer::*;

/// Counters returned by a duty cycle when it stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DutyStats {
    /// Completed cycles
    pub iterations: u64,
    /// Cycles that produced output (render, prediction write)
    pub writes: u64,
}
