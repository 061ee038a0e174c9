//! Shared handles over the telemetry document and control state
//!
//! Each handle wraps its record in its own lock. Writers hold the lock
//! only for the duration of one update closure; readers copy out a
//! snapshot and release before doing any I/O.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{ControlState, ControlTransition, Mode, Speed, TelemetryDocument};

/// A consistent copy of the telemetry document
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Number of updates applied before this copy was taken
    pub version: u64,
    pub document: TelemetryDocument,
}

struct Versioned {
    version: u64,
    document: TelemetryDocument,
}

/// Shared, versioned telemetry document
#[derive(Clone)]
pub struct SharedTelemetry {
    inner: Arc<RwLock<Versioned>>,
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::with_document(TelemetryDocument::new())
    }

    pub fn with_document(document: TelemetryDocument) -> Self {
        SharedTelemetry {
            inner: Arc::new(RwLock::new(Versioned {
                version: 0,
                document,
            })),
        }
    }

    /// Apply one atomic update. Returns the new version.
    pub fn update<F>(&self, f: F) -> u64
    where
        F: FnOnce(&mut TelemetryDocument),
    {
        let mut guard = self.inner.write();
        f(&mut guard.document);
        guard.version += 1;
        guard.version
    }

    /// Copy out the current document with its version
    pub fn snapshot(&self) -> Snapshot {
        let guard = self.inner.read();
        Snapshot {
            version: guard.version,
            document: guard.document.clone(),
        }
    }

    /// Copy out the document as it may be shown under the current mode.
    ///
    /// The mode is read while the document lock is held, so the view
    /// reflects every toggle applied before the call. A toggle landing
    /// after the view is built takes effect on the next cycle.
    pub fn visible_under(&self, control: &SharedControl) -> Snapshot {
        let guard = self.inner.read();
        let mode = control.mode();
        Snapshot {
            version: guard.version,
            document: guard.document.visible(mode),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn set_device_id(&self, device_id: &str) {
        self.update(|doc| doc.device_id = device_id.to_string());
    }
}

impl Default for SharedTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared control state
#[derive(Clone)]
pub struct SharedControl {
    inner: Arc<RwLock<ControlState>>,
}

impl SharedControl {
    pub fn new() -> Self {
        Self::with_state(ControlState::new())
    }

    pub fn with_state(state: ControlState) -> Self {
        SharedControl {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn get(&self) -> ControlState {
        self.inner.read().clone()
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.inner.read().mode
    }

    #[inline]
    pub fn speed(&self) -> Speed {
        self.inner.read().speed
    }

    pub fn device_id(&self) -> String {
        self.inner.read().device_id.clone()
    }

    pub fn set_device_id(&self, device_id: &str) {
        self.inner.write().device_id = device_id.to_string();
    }

    /// Apply a desired mode and speed. Returns the transition if
    /// anything changed, `None` if the state already matched.
    pub fn apply(&self, mode: Mode, speed: Speed) -> Option<ControlTransition> {
        let mut state = self.inner.write();
        if state.mode == mode && state.speed == speed {
            return None;
        }

        let transition = ControlTransition {
            from_mode: state.mode,
            to_mode: mode,
            from_speed: state.speed,
            to_speed: speed,
        };
        state.mode = mode;
        state.speed = speed;
        Some(transition)
    }

    /// Flip the mode in place (operator override). Returns the new mode.
    pub fn toggle_mode(&self) -> Mode {
        let mut state = self.inner.write();
        state.mode = state.mode.toggled();
        state.mode
    }
}

impl Default for SharedControl {
    fn default() -> Self {
        Self::new()
    }
}
