//! CLI Entry Point for thermolog
//!
//! Opens the serial thermometer, logs every `TEMP:` reading and keeps the
//! raw, hourly and daily logs trimmed until interrupted.
//!
//! # Usage
//!
//! ```bash
//! thermolog                    # default port (/dev/ttyS0, COM3 on Windows)
//! thermolog /dev/ttyUSB0 --baud 115200 --output-dir /var/log/thermolog
//! ```
//!
//! Exit status is 1 when the device cannot be opened or fails while
//! streaming, 0 after a clean shutdown (Ctrl-C or SIGTERM).

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use thermolog::aggregation::Granularity;
use thermolog::config::{default_device_path, MonitorConfig, DEFAULT_CONFIG_PATH};
use thermolog::error::ReadFault;
use thermolog::logging::{self, TracingConfig};
use thermolog::monitor::TemperatureMonitor;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "thermolog")]
#[command(about = "Serial temperature logger with retention-bounded history", long_about = None)]
struct Cli {
    /// Serial device to read from
    port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(long)]
    baud: Option<u32>,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory for the log files (overrides the config file)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = MonitorConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let port_given = cli.port.is_some() || config.device.port.is_some();
    if let Some(port) = cli.port {
        config.device.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.device.baud_rate = baud;
    }
    if let Some(dir) = cli.output_dir {
        config.storage.output_dir = dir;
    }
    config.validate()?;

    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_ansi(io::stdout().is_terminal());
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    if !port_given {
        println!("Usage: thermolog [PORT]");
        println!("Using default port: {}", default_device_path());
    }

    let device = config.device.port_or_default();
    let mut monitor = match TemperatureMonitor::new(&config) {
        Ok(monitor) => monitor,
        Err(e) => {
            eprintln!("❌ Failed to open {}: {}", device, e);
            return Ok(ExitCode::FAILURE);
        }
    };
    if let Err(e) = monitor.start() {
        eprintln!("❌ Failed to start reading from {}: {}", device, e);
        return Ok(ExitCode::FAILURE);
    }

    print_banner(&config, &monitor);

    let mut faults = monitor.subscribe_faults();
    let code = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            ExitCode::SUCCESS
        }
        fault = wait_for_fault(&mut faults) => {
            eprintln!("❌ {}", fault);
            ExitCode::FAILURE
        }
    };

    // Joining the reader thread blocks for up to one read timeout
    tokio::task::spawn_blocking(move || monitor.stop())
        .await
        .context("Monitor shutdown task failed")?;

    println!("👋 Stopped");
    Ok(code)
}

fn print_banner(config: &MonitorConfig, monitor: &TemperatureMonitor) {
    let retention = &config.retention;
    println!("🌡️  thermolog - reading {} at {} baud", monitor.device(), config.device.baud_rate);
    println!(
        "   Raw:    {} (last {} h)",
        monitor.log_path(Granularity::Raw).display(),
        retention.raw_hours
    );
    println!(
        "   Hourly: {} (last {} days)",
        monitor.log_path(Granularity::Hourly).display(),
        retention.hourly_days
    );
    println!(
        "   Daily:  {} (last {} days)",
        monitor.log_path(Granularity::Daily).display(),
        retention.daily_days
    );
    println!("Press Ctrl+C to stop");
    println!();
}

/// Resolves with the first fault the reader publishes.
async fn wait_for_fault(faults: &mut watch::Receiver<Option<ReadFault>>) -> ReadFault {
    loop {
        match faults.wait_for(Option::is_some).await {
            Ok(fault) => {
                if let Some(fault) = fault.clone() {
                    return fault;
                }
            }
            // Sender gone: no fault can arrive any more
            Err(_) => std::future::pending::<()>().await,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
