//! Medsync Console - Bench Tool for the Medication Wearable
//!
//! Drives the sync engine from a terminal against a real wearable reached
//! through the BLE bridge.
//!
//! # Usage
//!
//! ```bash
//! # List wearables in range for 10 seconds
//! medsync-console scan --seconds 10
//!
//! # Print every event from a device as JSON lines
//! medsync-console watch C8:2E:18:4A:01:F2
//!
//! # Send one command and show what comes back
//! medsync-console send C8:2E:18:4A:01:F2 get-logs
//!
//! # Push a medication and wait for the wearer to accept it
//! medsync-console sync-med C8:2E:18:4A:01:F2 --name Lisinopril --dosage 10mg --time "8:30 AM"
//!
//! # Verbose logging
//! RUST_LOG=debug medsync-console watch C8:2E:18:4A:01:F2
//! ```
//!
//! Events and results go to stdout, logs to stderr.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use medsync_core::{
    create_radio, default_config_path, load_config_from_path, ConfigOverrides, DeviceSession,
};

use commands::DeviceCommand;

/// Medsync Console - bench tool for the medication wearable
#[derive(Parser, Debug)]
#[command(name = "medsync-console")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MEDSYNC_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Bridge socket directory (selects the bridge transport)
    #[arg(short = 'b', long, value_name = "DIR", global = true)]
    bridge_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "MEDSYNC_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List wearables in range
    Scan {
        /// How long to scan
        #[arg(short = 's', long, default_value_t = 10)]
        seconds: u64,
    },

    /// Connect and print every event until Ctrl-C or disconnect
    Watch {
        /// Device id
        device: String,
    },

    /// Send one command and print events for a while
    Send {
        /// Device id
        device: String,

        /// Command to send
        #[arg(value_enum)]
        command: DeviceCommand,

        /// How long to keep printing events afterwards
        #[arg(long, default_value_t = 3)]
        listen: u64,
    },

    /// Push a medication and wait for the wearer's answer
    SyncMed {
        /// Device id
        device: String,

        /// Medication name
        #[arg(long)]
        name: String,

        /// Dosage text, e.g. "10mg"
        #[arg(long)]
        dosage: String,

        /// Reminder time, e.g. "8:30 AM"
        #[arg(long)]
        time: String,

        /// Schedule frequency
        #[arg(long)]
        frequency: Option<String>,

        /// Schedule days
        #[arg(long)]
        days: Option<String>,

        /// Pills in the new supply
        #[arg(long)]
        pills: Option<u32>,
    },
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "medsync_console={level},medsync_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn open_session(args: &Args) -> Result<DeviceSession> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref dir) = args.bridge_dir {
        overrides = overrides.with_bridge_dir(dir.clone());
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = %config.source(),
        config_file = ?config.config_file_path,
        transport = ?config.transport.transport,
        "Configuration loaded"
    );

    let radio = create_radio(&config.transport).context("Failed to create radio")?;
    Ok(DeviceSession::new(radio, config.session_config()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let session = open_session(&args)?;

    let result = match args.command {
        Command::Scan { seconds } => commands::scan(&session, seconds).await,
        Command::Watch { ref device } => commands::watch(&session, device).await,
        Command::Send {
            ref device,
            command,
            listen,
        } => commands::send(&session, device, command, listen).await,
        Command::SyncMed {
            ref device,
            ref name,
            ref dosage,
            ref time,
            ref frequency,
            ref days,
            pills,
        } => {
            let record = medsync_core::MedicationRecord {
                name: name.clone(),
                dosage: dosage.clone(),
                reminder_times: vec![time.clone()],
                frequency: frequency.clone(),
                days: days.clone(),
                pill_quantity: pills,
            };
            commands::sync_med(&session, device, &record).await
        }
    };

    session.shutdown().await;
    result
}
