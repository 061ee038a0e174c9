//! Device scenarios
//!
//! Wires a `Device` to scripted collaborators so tests only describe
//! what differs from the defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use edgepulse_core::{Mode, Speed};
use edgepulse_runtime::{Device, DeviceConfig};

use crate::capture::{CaptureTarget, FixedLoader};
use crate::scripted::{ScriptedApi, ScriptedKeys};

/// Address nothing listens on, for runs without a collector
pub const UNREACHABLE_COLLECTOR: &str = "ws://127.0.0.1:9";

pub struct DeviceScenario {
    api: ScriptedApi,
    keys: Option<ScriptedKeys>,
    loader: Option<FixedLoader>,
    initial: Option<(Mode, Speed)>,
    register_backoff: Duration,
    control_poll_interval: Duration,
    seed: u64,
}

impl DeviceScenario {
    pub fn new(api: ScriptedApi) -> Self {
        DeviceScenario {
            api,
            keys: None,
            loader: None,
            initial: None,
            register_backoff: Duration::from_millis(50),
            control_poll_interval: Duration::from_millis(100),
            seed: 7,
        }
    }

    pub fn with_keys(mut self, keys: ScriptedKeys) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_model(mut self, loader: FixedLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Control state in effect before the first poll
    pub fn with_initial_control(mut self, mode: Mode, speed: Speed) -> Self {
        self.initial = Some((mode, speed));
        self
    }

    pub fn with_register_backoff(mut self, backoff: Duration) -> Self {
        self.register_backoff = backoff;
        self
    }

    pub fn with_control_poll(mut self, interval: Duration) -> Self {
        self.control_poll_interval = interval;
        self
    }

    pub fn config(&self, ws_uri: &str) -> DeviceConfig {
        let mut config = DeviceConfig::new(ws_uri, "http://127.0.0.1:9");
        config.register_backoff = self.register_backoff;
        config.control_poll_interval = self.control_poll_interval;
        config.key_poll_interval = Duration::from_millis(10);
        config.connect_timeout = Duration::from_secs(2);
        config.close_timeout = Duration::from_secs(1);
        if self.loader.is_some() {
            config.model_path = Some(PathBuf::from("fixed-model.json"));
        }
        config
    }

    /// Build the device and the target it renders into
    pub fn build(self, ws_uri: &str) -> (Device<ScriptedApi>, CaptureTarget) {
        let config = self.config(ws_uri);
        let capture = CaptureTarget::new();

        let mut device = Device::new(config, self.api)
            .with_render_target(Box::new(capture.clone()))
            .with_key_source(
                self.keys
                    .map(|keys| Box::new(keys) as Box<dyn edgepulse_runtime::KeySource>),
            )
            .with_seed(self.seed);
        if let Some(loader) = self.loader {
            device = device.with_model_loader(Arc::new(loader));
        }
        if let Some((mode, speed)) = self.initial {
            device.control().apply(mode, speed);
        }
        (device, capture)
    }
}
