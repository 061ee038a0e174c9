//! Error types for EdgePulse

use thiserror::Error;

/// Core EdgePulse errors
#[derive(Error, Debug)]
pub enum EdgeError {
    // Startup errors
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),

    // Control channel errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Empty response from {0}")]
    EmptyResponse(&'static str),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch { expected: String, actual: String },

    // Transport errors
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Link closed")]
    LinkClosed,

    // Terminal errors
    #[error("Key input error: {0}")]
    KeyInput(String),

    #[error("Shutdown requested")]
    Shutdown,
}

impl EdgeError {
    /// Errors that abort startup rather than being retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EdgeError::MissingConfig(_) | EdgeError::InvalidConfig { .. }
        )
    }
}

/// Result type for EdgePulse operations
pub type EdgeResult<T> = Result<T, EdgeError>;
