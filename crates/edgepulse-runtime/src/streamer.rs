//! Remote send loop
//!
//! Serializes the mode-visible document and queues it on the telemetry
//! link once per cadence period. Send failures are logged and counted;
//! the loop ends early only when the link is gone for good.

use tracing::{debug, info, warn};

use edgepulse_core::{EdgeError, SharedControl, SharedTelemetry, StopSignal};
use edgepulse_transport::LinkSender;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub iterations: u64,
    pub sent: u64,
    pub failed: u64,
}

pub struct Streamer {
    sender: LinkSender,
    telemetry: SharedTelemetry,
    control: SharedControl,
}

impl Streamer {
    pub fn new(sender: LinkSender, telemetry: SharedTelemetry, control: SharedControl) -> Self {
        Streamer {
            sender,
            telemetry,
            control,
        }
    }

    pub async fn run(self, stop: StopSignal) -> StreamStats {
        let mut stats = StreamStats::default();
        while !stop.is_stopped() {
            stats.iterations += 1;
            let view = self.telemetry.visible_under(&self.control);
            let result = view
                .document
                .to_json()
                .and_then(|text| self.sender.send(text));
            match result {
                Ok(()) => {
                    stats.sent += 1;
                    debug!(version = view.version, "Document queued");
                }
                Err(EdgeError::LinkClosed) if self.sender.state().is_terminal() => {
                    stats.failed += 1;
                    info!(state = %self.sender.state(), "Telemetry link ended, send loop stopping");
                    break;
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!("Send failed: {}", e);
                }
            }
            if !stop.sleep(self.control.speed().cadence()).await {
                break;
            }
        }
        stats
    }
}
