//! EdgePulse Transport Layer - telemetry link and control channel
//!
//! This crate provides:
//! - Telemetry sink address parsing (plain / encrypted)
//! - TLS client policy
//! - WebSocket link with an explicit lifecycle state machine
//! - HTTP registration and control client

pub mod endpoint;
pub mod http;
pub mod link;
pub mod tls;

pub use endpoint::{Endpoint, Security};
pub use http::*;
pub use link::*;
pub use tls::{client_config, TlsPolicy};
