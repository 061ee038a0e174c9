//! Control state: operating mode and sampling cadence
//!
//! The control state is steered remotely by the control poller and
//! locally by the operator toggle key. Every duty cycle reads it once
//! per iteration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::UNKNOWN_DEVICE;

/// Operating mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Safe,
    Prediction,
}

impl Mode {
    /// Parse a remote mode token. Unrecognized tokens map to `Safe`.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "PREDICTION" | "PREDICT" => Mode::Prediction,
            _ => Mode::Safe,
        }
    }

    /// Whether `token` names a known mode
    pub fn is_known_token(token: &str) -> bool {
        matches!(
            token.trim().to_ascii_uppercase().as_str(),
            "SAFE" | "PREDICTION" | "PREDICT"
        )
    }

    pub fn toggled(self) -> Self {
        match self {
            Mode::Safe => Mode::Prediction,
            Mode::Prediction => Mode::Safe,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Safe => "Safe",
            Mode::Prediction => "Prediction",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sampling speed. Each speed maps to a fixed cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Speed {
    #[default]
    Slow,
    Medium,
    Fast,
}

impl Speed {
    pub const SLOW_CADENCE: Duration = Duration::from_secs(1);
    pub const MEDIUM_CADENCE: Duration = Duration::from_millis(200);
    pub const FAST_CADENCE: Duration = Duration::from_millis(100);

    /// Parse a remote speed token. Unrecognized tokens map to `Slow`.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "MEDIUM" => Speed::Medium,
            "FAST" => Speed::Fast,
            _ => Speed::Slow,
        }
    }

    /// Whether `token` names a known speed
    pub fn is_known_token(token: &str) -> bool {
        matches!(
            token.trim().to_ascii_uppercase().as_str(),
            "SLOW" | "MEDIUM" | "FAST"
        )
    }

    /// Sleep interval between duty-cycle iterations
    #[inline]
    pub fn cadence(self) -> Duration {
        match self {
            Speed::Slow => Self::SLOW_CADENCE,
            Speed::Medium => Self::MEDIUM_CADENCE,
            Speed::Fast => Self::FAST_CADENCE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Speed::Slow => "Slow",
            Speed::Medium => "Medium",
            Speed::Fast => "Fast",
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared control record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlState {
    pub mode: Mode,
    pub speed: Speed,
    pub device_id: String,
}

impl ControlState {
    pub fn new() -> Self {
        ControlState {
            mode: Mode::Safe,
            speed: Speed::Slow,
            device_id: UNKNOWN_DEVICE.to_string(),
        }
    }

    #[inline]
    pub fn cadence(&self) -> Duration {
        self.speed.cadence()
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

/// A change applied to the control state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlTransition {
    pub from_mode: Mode,
    pub to_mode: Mode,
    pub from_speed: Speed,
    pub to_speed: Speed,
}

impl ControlTransition {
    pub fn mode_changed(&self) -> bool {
        self.from_mode != self.to_mode
    }

    pub fn speed_changed(&self) -> bool {
        self.from_speed != self.to_speed
    }
}

impl fmt::Display for ControlTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode {} -> {}, speed {} -> {}",
            self.from_mode, self.to_mode, self.from_speed, self.to_speed
        )
    }
}
