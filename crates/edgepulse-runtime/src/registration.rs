//! Device registration
//!
//! Asks the control server for an identity until one is assigned.
//! Empty, malformed or placeholder replies and transport errors are
//! retried after a fixed backoff. Only the stop signal or a
//! configuration error ends the loop without an identity.

use std::time::Duration;

use tracing::{info, warn};

use edgepulse_core::{
    is_assigned_device_id, normalize_device_id, EdgeError, EdgeResult, SharedControl,
    SharedTelemetry, StopSignal,
};
use edgepulse_transport::{parse_registration, ControlApi};

/// Result of a completed registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Normalized identity
    pub device_id: String,
    /// Requests made, including the successful one
    pub attempts: u32,
}

impl Registration {
    /// Store the identity in the telemetry document and control state
    pub fn apply(&self, telemetry: &SharedTelemetry, control: &SharedControl) {
        telemetry.set_device_id(&self.device_id);
        control.set_device_id(&self.device_id);
    }
}

/// Register with the control server, retrying until an identity is
/// assigned. Returns `EdgeError::Shutdown` if stopped first.
pub async fn register_device<A: ControlApi>(
    api: &A,
    backoff: Duration,
    stop: &StopSignal,
) -> EdgeResult<Registration> {
    let mut attempts = 0u32;
    loop {
        if stop.is_stopped() {
            return Err(EdgeError::Shutdown);
        }
        attempts += 1;

        match api.register().await.and_then(|body| parse_registration(&body)) {
            Ok(reply) if is_assigned_device_id(&reply.device_id) => {
                let device_id = normalize_device_id(&reply.device_id);
                info!(device_id = %device_id, attempts, "Device registered");
                return Ok(Registration {
                    device_id,
                    attempts,
                });
            }
            Ok(reply) => {
                warn!(attempt = attempts, reply = %reply.device_id, "No identity assigned yet");
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(attempt = attempts, "Registration failed: {}", e);
            }
        }

        if !stop.sleep(backoff).await {
            return Err(EdgeError::Shutdown);
        }
    }
}
