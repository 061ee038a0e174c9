//! EdgePulse device
//!
//! Usage: `edgepulse-device [ENV_FILE]` (default `example.env`)
//!
//! Keys while running:
//! - `q` - stop
//! - `m` - toggle Safe / Prediction mode

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info, warn};

use edgepulse_core::{EdgeError, EdgeResult};
use edgepulse_runtime::{init_logging, Device, DeviceConfig, DeviceReport};
use edgepulse_transport::HttpControlApi;

#[tokio::main]
async fn main() -> ExitCode {
    let env_file = std::env::args_os().nth(1).map(PathBuf::from);

    let config = match DeviceConfig::from_env(env_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("edgepulse-device: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.log) {
        eprintln!("edgepulse-device: {}", e);
        return ExitCode::FAILURE;
    }

    let result = run(config).await;
    if let Err(e) = &result {
        if !matches!(e, EdgeError::Shutdown) {
            error!("Device failed: {}", e);
            eprintln!("edgepulse-device: {}", e);
        }
    }
    exit_code(&result)
}

async fn run(config: DeviceConfig) -> EdgeResult<DeviceReport> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                  EdgePulse Device Simulator                ║");
    println!("║        q + Enter: stop      m + Enter: toggle mode         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !config.tls_verify {
        warn!("TLS certificate verification is disabled");
    }
    info!(ws_uri = %config.ws_uri, server_uri = %config.server_uri, "Starting device");

    let api = HttpControlApi::new(&config.server_uri, config.http_timeout)?;
    let device = Device::new(config, api);

    let stop = device.stop_signal();
    let interrupt = stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    if interrupt.trigger() {
                        info!("Interrupt received, stopping");
                    }
                }
                Err(e) => warn!("Interrupt handler unavailable: {}", e),
            },
            _ = interrupt.stopped() => {}
        }
    });

    let report = device.run().await?;
    info!(
        device_id = %report.device_id,
        samples = report.generator.iterations,
        sent = report.streamer.as_ref().map_or(0, |s| s.sent),
        link = %report.link_state,
        "Device shut down"
    );
    Ok(report)
}

/// Normal shutdown, including a stop before registration finished,
/// exits 0. Everything else exits 1.
fn exit_code<T>(result: &EdgeResult<T>) -> ExitCode {
    if exit_status(result) == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn exit_status<T>(result: &EdgeResult<T>) -> u8 {
    match result {
        Ok(_) | Err(EdgeError::Shutdown) => 0,
        Err(_) => 1,
    }
}
