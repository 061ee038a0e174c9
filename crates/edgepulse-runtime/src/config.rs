//! Device configuration
//!
//! Settings come from the process environment, optionally seeded from
//! an env file (`KEY=VALUE` lines, `#` comments). Variables already set
//! in the real environment take precedence over the file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use edgepulse_core::{EdgeError, EdgeResult};
use edgepulse_transport::{LinkConfig, TlsPolicy};

use crate::logging::{LogConfig, LogFormat};

pub const ENV_WS_URI: &str = "WS_URI";
pub const ENV_SERVER_URI: &str = "SERVER_URI";
pub const ENV_TLS_VERIFY: &str = "EDGEPULSE_TLS_VERIFY";
pub const ENV_MODEL_PATH: &str = "EDGEPULSE_MODEL_PATH";
pub const ENV_REGISTER_BACKOFF_MS: &str = "EDGEPULSE_REGISTER_BACKOFF_MS";
pub const ENV_CONTROL_POLL_MS: &str = "EDGEPULSE_CONTROL_POLL_MS";
pub const ENV_HTTP_TIMEOUT_MS: &str = "EDGEPULSE_HTTP_TIMEOUT_MS";
pub const ENV_LOG: &str = "EDGEPULSE_LOG";
pub const ENV_LOG_FORMAT: &str = "EDGEPULSE_LOG_FORMAT";

/// Env file read when none is named
pub const DEFAULT_ENV_FILE: &str = "example.env";

/// Runtime configuration for one device
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Telemetry sink address (`ws://` or `wss://`)
    pub ws_uri: String,
    /// Registration / control server base address
    pub server_uri: String,
    pub tls_verify: bool,
    /// Predictor artifact; the predictor is disabled when unset
    pub model_path: Option<PathBuf>,
    pub register_backoff: Duration,
    pub control_poll_interval: Duration,
    pub http_timeout: Duration,
    pub key_poll_interval: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    pub send_timeout: Duration,
    pub outbound_capacity: usize,
    pub log: LogConfig,
}

impl DeviceConfig {
    /// Configuration with defaults for everything but the two addresses
    pub fn new(ws_uri: impl Into<String>, server_uri: impl Into<String>) -> Self {
        let link = LinkConfig::default();
        DeviceConfig {
            ws_uri: ws_uri.into(),
            server_uri: server_uri.into(),
            tls_verify: true,
            model_path: None,
            register_backoff: Duration::from_secs(1),
            control_poll_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(5),
            key_poll_interval: Duration::from_millis(100),
            connect_timeout: link.connect_timeout,
            close_timeout: link.close_timeout,
            send_timeout: link.send_timeout,
            outbound_capacity: link.outbound_capacity,
            log: LogConfig::default(),
        }
    }

    /// Load from the process environment layered over `env_file`
    pub fn from_env(env_file: Option<&Path>) -> EdgeResult<Self> {
        let path = env_file.unwrap_or_else(|| Path::new(DEFAULT_ENV_FILE));
        let file_vars = load_env_file(path)?;
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Load through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> EdgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let ws_uri = get(ENV_WS_URI).ok_or(EdgeError::MissingConfig(ENV_WS_URI))?;
        let server_uri = get(ENV_SERVER_URI).ok_or(EdgeError::MissingConfig(ENV_SERVER_URI))?;
        let mut config = DeviceConfig::new(ws_uri, server_uri);

        if let Some(value) = get(ENV_TLS_VERIFY) {
            config.tls_verify = parse_bool(ENV_TLS_VERIFY, &value)?;
        }
        config.model_path = get(ENV_MODEL_PATH).map(PathBuf::from);
        if let Some(value) = get(ENV_REGISTER_BACKOFF_MS) {
            config.register_backoff = parse_millis(ENV_REGISTER_BACKOFF_MS, &value)?;
        }
        if let Some(value) = get(ENV_CONTROL_POLL_MS) {
            config.control_poll_interval = parse_millis(ENV_CONTROL_POLL_MS, &value)?;
        }
        if let Some(value) = get(ENV_HTTP_TIMEOUT_MS) {
            config.http_timeout = parse_millis(ENV_HTTP_TIMEOUT_MS, &value)?;
        }
        if let Some(level) = get(ENV_LOG) {
            config.log.level = level;
        }
        if let Some(value) = get(ENV_LOG_FORMAT) {
            config.log.format = LogFormat::parse(&value).ok_or_else(|| EdgeError::InvalidConfig {
                key: ENV_LOG_FORMAT,
                reason: format!("expected text or json, got {:?}", value),
            })?;
        }

        Ok(config)
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy::from_verify_flag(self.tls_verify)
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            tls: self.tls_policy(),
            connect_timeout: self.connect_timeout,
            close_timeout: self.close_timeout,
            send_timeout: self.send_timeout,
            outbound_capacity: self.outbound_capacity,
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> EdgeResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EdgeError::InvalidConfig {
            key,
            reason: format!("expected a boolean, got {:?}", value),
        }),
    }
}

fn parse_millis(key: &'static str, value: &str) -> EdgeResult<Duration> {
    value
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .ok_or_else(|| EdgeError::InvalidConfig {
            key,
            reason: format!("expected positive milliseconds, got {:?}", value),
        })
}

/// Parse env file contents. Malformed lines are logged and skipped.
pub fn parse_env(contents: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = number + 1, "Malformed env file line skipped");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            warn!(line = number + 1, "Env file line without key skipped");
            continue;
        }
        vars.insert(key.to_string(), value.trim().to_string());
    }
    vars
}

/// Read an env file. A missing file yields no variables.
pub fn load_env_file(path: &Path) -> EdgeResult<HashMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_env(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No env file");
            Ok(HashMap::new())
        }
        Err(e) => Err(EdgeError::InvalidConfig {
            key: "env file",
            reason: format!("{}: {}", path.display(), e),
        }),
    }
}
