//! EdgePulse device - startup, worker supervision and ordered shutdown
//!
//! Startup order:
//! 1. Operator key coordinator (so `q` works during registration)
//! 2. Registration, retried until an identity is assigned
//! 3. Telemetry link handshake (failure leaves the device running
//!    without remote streaming)
//! 4. Duty cycles: generator, local sink, predictor, control poller,
//!    send loop
//!
//! Shutdown joins the duty cycles, closes the link with the disconnect
//! reason, waits for the link event loop, then for the coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use edgepulse_core::{EdgeResult, SharedControl, SharedTelemetry, StopSignal};
use edgepulse_transport::{
    ControlApi, LinkSender, LinkState, LinkStats, TelemetryLink, DISCONNECT_REASON,
};

use crate::config::{DeviceConfig, ENV_MODEL_PATH};
use crate::generator::Generator;
use crate::poller::{ControlPoller, PollerStats};
use crate::predictor::{JsonModelLoader, ModelLoader, Predictor};
use crate::registration::register_device;
use crate::shutdown::{KeySource, ShutdownCoordinator, ShutdownStats, TerminalKeys};
use crate::sink::{ConsoleTarget, LocalSink, RenderTarget};
use crate::streamer::{StreamStats, Streamer};
use crate::DutyStats;

/// Summary of one device run
#[derive(Clone, Debug)]
pub struct DeviceReport {
    pub device_id: String,
    pub registration_attempts: u32,
    pub generator: DutyStats,
    pub sink: DutyStats,
    /// `None` when no model was configured or it failed to load
    pub predictor: Option<DutyStats>,
    pub poller: PollerStats,
    /// `None` when the link never opened
    pub streamer: Option<StreamStats>,
    pub link_state: LinkState,
    pub link_stats: LinkStats,
    pub shutdown: Option<ShutdownStats>,
}

/// A simulated edge device
pub struct Device<A> {
    config: DeviceConfig,
    api: Arc<A>,
    telemetry: SharedTelemetry,
    control: SharedControl,
    stop: StopSignal,
    keys: Option<Box<dyn KeySource>>,
    render: Box<dyn RenderTarget>,
    loader: Arc<dyn ModelLoader>,
    seed: Option<u64>,
}

impl<A: ControlApi> Device<A> {
    /// Device reading operator keys from the terminal and rendering to stdout
    pub fn new(config: DeviceConfig, api: A) -> Self {
        Device {
            config,
            api: Arc::new(api),
            telemetry: SharedTelemetry::new(),
            control: SharedControl::new(),
            stop: StopSignal::new(),
            keys: Some(Box::new(TerminalKeys)),
            render: Box::new(ConsoleTarget),
            loader: Arc::new(JsonModelLoader),
            seed: None,
        }
    }

    /// Replace the operator key source. `None` disables key handling.
    pub fn with_key_source(mut self, keys: Option<Box<dyn KeySource>>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_render_target(mut self, render: Box<dyn RenderTarget>) -> Self {
        self.render = render;
        self
    }

    pub fn with_model_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Seed the reading generator
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[inline]
    pub fn telemetry(&self) -> SharedTelemetry {
        self.telemetry.clone()
    }

    #[inline]
    pub fn control(&self) -> SharedControl {
        self.control.clone()
    }

    #[inline]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until the stop signal is raised.
    ///
    /// Returns `EdgeError::Shutdown` if stopped before registration
    /// completed, and configuration errors as they occur.
    pub async fn run(self) -> EdgeResult<DeviceReport> {
        let Device {
            config,
            api,
            telemetry,
            control,
            stop,
            keys,
            render,
            loader,
            seed,
        } = self;

        let coordinator = keys.map(|keys| {
            ShutdownCoordinator::new(
                keys,
                control.clone(),
                stop.clone(),
                config.key_poll_interval,
            )
            .spawn()
        });

        let registration = match register_device(api.as_ref(), config.register_backoff, &stop)
            .instrument(info_span!("registration"))
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                stop.trigger();
                join_coordinator(coordinator).await;
                return Err(e);
            }
        };
        registration.apply(&telemetry, &control);

        let mut link = TelemetryLink::new(config.link_config());
        let sender: Option<LinkSender> = match link.open(&config.ws_uri).await {
            Ok(sender) => Some(sender),
            Err(e) => {
                error!("Telemetry link unavailable, streaming disabled: {}", e);
                None
            }
        };

        let generator = match seed {
            Some(seed) => Generator::with_seed(telemetry.clone(), control.clone(), seed),
            None => Generator::new(telemetry.clone(), control.clone()),
        };
        let generator = tokio::spawn(
            generator
                .run(stop.clone())
                .instrument(info_span!("generator")),
        );

        let sink = tokio::spawn(
            LocalSink::new(render, telemetry.clone(), control.clone())
                .run(stop.clone())
                .instrument(info_span!("sink")),
        );

        let predictor = config.model_path.clone().map(|path: PathBuf| {
            tokio::spawn(
                Predictor::new(loader, path, telemetry.clone(), control.clone())
                    .run(stop.clone())
                    .instrument(info_span!("predictor")),
            )
        });
        if predictor.is_none() {
            warn!(
                "No model configured ({} unset), Prediction mode will carry no scores",
                ENV_MODEL_PATH
            );
        }

        let poller = tokio::spawn(
            ControlPoller::new(api.clone(), control.clone(), config.control_poll_interval)
                .run(stop.clone())
                .instrument(info_span!("poller")),
        );

        let streamer = sender.map(|sender| {
            tokio::spawn(
                Streamer::new(sender, telemetry.clone(), control.clone())
                    .run(stop.clone())
                    .instrument(info_span!("streamer")),
            )
        });

        info!(device_id = %registration.device_id, "Device running");
        stop.stopped().await;
        info!("Stopping device");

        let generator = join_worker("generator", generator).await.unwrap_or_default();
        let sink = join_worker("sink", sink).await.unwrap_or_default();
        let predictor = match predictor {
            Some(handle) => join_worker("predictor", handle).await.and_then(Result::ok),
            None => None,
        };
        let poller = join_worker("poller", poller).await.unwrap_or_default();
        let streamer = match streamer {
            Some(handle) => join_worker("streamer", handle).await,
            None => None,
        };

        if let Err(e) = link.close(DISCONNECT_REASON).await {
            warn!("Link close failed: {}", e);
        }
        let shutdown = join_coordinator(coordinator).await;

        info!(state = %link.state(), "Device stopped");
        Ok(DeviceReport {
            device_id: registration.device_id,
            registration_attempts: registration.attempts,
            generator,
            sink,
            predictor,
            poller,
            streamer,
            link_state: link.state(),
            link_stats: link.stats().clone(),
            shutdown,
        })
    }
}

async fn join_worker<T>(name: &'static str, handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(worker = name, "Worker ended abnormally: {}", e);
            None
        }
    }
}

async fn join_coordinator(handle: Option<JoinHandle<ShutdownStats>>) -> Option<ShutdownStats> {
    match handle {
        Some(handle) => join_worker("shutdown", handle).await,
        None => None,
    }
}
