//! Local console rendering
//!
//! Renders the mode-visible view of the shared document once per
//! cadence period. Safe mode never shows predictions.

use std::io::Write;

use tracing::warn;

use edgepulse_core::{EdgeError, EdgeResult, SharedControl, SharedTelemetry, StopSignal};

use crate::DutyStats;

/// Where rendered documents go
pub trait RenderTarget: Send {
    fn render(&mut self, text: &str) -> EdgeResult<()>;
}

/// Writes each document to stdout
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleTarget;

impl RenderTarget for ConsoleTarget {
    fn render(&mut self, text: &str) -> EdgeResult<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", text)
            .and_then(|_| out.flush())
            .map_err(|e| EdgeError::Encode(e.to_string()))
    }
}

pub struct LocalSink {
    target: Box<dyn RenderTarget>,
    telemetry: SharedTelemetry,
    control: SharedControl,
}

impl LocalSink {
    pub fn new(
        target: Box<dyn RenderTarget>,
        telemetry: SharedTelemetry,
        control: SharedControl,
    ) -> Self {
        LocalSink {
            target,
            telemetry,
            control,
        }
    }

    /// Render the current view once
    pub fn render_once(&mut self) -> EdgeResult<()> {
        let view = self.telemetry.visible_under(&self.control);
        let text = view.document.to_pretty_json()?;
        self.target.render(&text)
    }

    pub async fn run(mut self, stop: StopSignal) -> DutyStats {
        let mut stats = DutyStats::default();
        while !stop.is_stopped() {
            match self.render_once() {
                Ok(()) => stats.writes += 1,
                Err(e) => warn!("Render failed: {}", e),
            }
            stats.iterations += 1;
            if !stop.sleep(self.control.speed().cadence()).await {
                break;
            }
        }
        stats
    }
}
