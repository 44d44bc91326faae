//! # IMU Logger
//!
//! Log accelerometer/gyroscope telemetry from a BLE peripheral to CSV.
//!
//! Connects to one peripheral (e.g. an ESP32-C3 + MPU6050 board streaming JSON
//! over the Nordic UART characteristic), records every notification as a CSV
//! row, and reconnects forever when the radio link drops.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use imu_logger::ble::btle::BtleTransport;
use imu_logger::ble::locator::report_discovered;
use imu_logger::ble::{DeviceLocator, Transport};
use imu_logger::config::Config;
use imu_logger::logging;
use imu_logger::session::{backoff, AcquisitionSession, SessionOptions};

/// Configuration file used when `--config` is not given and the file exists
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(name = "imu-logger", version)]
#[command(about = "Log IMU telemetry from a BLE peripheral to CSV")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect to the target device and log samples until Ctrl+C (default)
    Run(RunArgs),
    /// List nearby BLE devices and exit
    Scan(ScanArgs),
}

#[derive(Debug, Args, Default)]
struct RunArgs {
    /// Target device address, overrides `device.target`
    #[arg(long)]
    target: Option<String>,
    /// Directory for CSV output, overrides `sink.output_dir`
    #[arg(long = "output-dir")]
    output_dir: Option<String>,
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Scan duration in milliseconds, overrides `device.scan_timeout_ms`
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,
}

/// Main entry point for the IMU logger
///
/// # Control Flow
///
/// 1. Parse the command line and load configuration
/// 2. Set up logging (console + optional rolling file)
/// 3. Bind the first Bluetooth adapter
/// 4. `run`: drive an [`AcquisitionSession`] until Ctrl+C or a fatal sink error;
///    `scan`: list devices once
///
/// # Errors
///
/// Returns error if:
/// - The configuration is invalid
/// - No Bluetooth adapter is available
/// - The target device cannot be found at startup
/// - The CSV destination cannot be written
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let command = cli.command.unwrap_or(Commands::Run(RunArgs::default()));
    if let Commands::Run(args) = &command {
        apply_overrides(&mut config, args);
    }
    config.validate().context("Invalid configuration")?;

    let _log_guard = logging::init(&config.logging)?;

    info!("IMU Logger v{} starting...", env!("CARGO_PKG_VERSION"));

    let transport = BtleTransport::new(
        Duration::from_millis(config.session.connect_timeout_ms),
        config.session.notification_buffer,
    )
    .await
    .context("Bluetooth transport unavailable")?;

    match command {
        Commands::Run(_) => run(transport, &config).await,
        Commands::Scan(args) => {
            let timeout = args.timeout_ms.unwrap_or(config.device.scan_timeout_ms);
            scan(&transport, Duration::from_millis(timeout)).await
        }
    }
}

async fn run(transport: BtleTransport, config: &Config) -> Result<()> {
    let options = SessionOptions::from_config(config)?;
    let session = AcquisitionSession::new(
        transport,
        DeviceLocator::new(Duration::from_millis(config.device.scan_timeout_ms)),
        backoff::from_config(&config.session),
        options,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                signal_cancel.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
        }
    });

    info!("Press Ctrl+C to stop...");
    let summary = session.run(cancel).await?;
    info!(
        "Run finished: {} samples, {} reconnect(s)",
        summary.samples, summary.reconnects
    );
    Ok(())
}

async fn scan(transport: &BtleTransport, timeout: Duration) -> Result<()> {
    info!("Scanning for {:.1} seconds...", timeout.as_secs_f64());
    let devices = transport.scan(timeout).await?;
    report_discovered(&devices);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(target) = &args.target {
        config.device.target = target.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.sink.output_dir = dir.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["imu-logger"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "imu-logger",
            "--config",
            "custom.toml",
            "run",
            "--target",
            "AA:BB:CC:DD:EE:FF",
            "--output-dir",
            "/tmp/imu",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));

        let Some(Commands::Run(args)) = cli.command else {
            panic!("Expected run command");
        };
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.device.target, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.sink.output_dir, "/tmp/imu");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_timeout_flag() {
        let cli = Cli::try_parse_from(["imu-logger", "scan", "--timeout-ms", "2500"]).unwrap();
        match cli.command {
            Some(Commands::Scan(args)) => assert_eq!(args.timeout_ms, Some(2500)),
            other => panic!("Expected scan command, got: {:?}", other),
        }
    }

    #[test]
    fn test_load_config_explicit_missing_file_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/imu.toml"))).is_err());
    }
}
