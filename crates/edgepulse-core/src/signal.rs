//! Cooperative stop signal
//!
//! A single flag flipped at most once. Duty cycles check it at every
//! iteration boundary and sleep through `StopSignal::sleep`, which
//! wakes early when the flag is raised.

use std::time::Duration;

use tokio::sync::watch;

/// Shared stop flag
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        StopSignal {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Raise the flag. Returns true only for the call that raised it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is raised
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless stopped first.
    /// Returns true if the full duration elapsed, false on stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = self.stopped() => false,
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
