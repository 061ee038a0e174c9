//! EdgePulse Test Harness - scripted collaborators for device tests
//!
//! This crate provides:
//! - Scripted control server and operator keys
//! - Loopback WebSocket collector
//! - Capturing render target and fixed-output models
//! - Device scenario builder

pub mod capture;
pub mod collector;
pub mod scenario;
pub mod scripted;

pub use capture::*;
pub use collector::*;
pub use scenario::*;
pub use scripted::*;
