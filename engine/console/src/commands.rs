//! Console subcommands

use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use medsync_core::{DeviceSession, InboundEvent, MedicationRecord, OutboundCommand, SyncError};

/// Field-less commands the console can send
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DeviceCommand {
    /// `GET_ADHERENCE`
    GetAdherence,
    /// `GET_LOGS`
    GetLogs,
    /// `GET_STORAGE_LOGS`
    GetStorageLogs,
    /// `GET_SYNC_LOGS`
    GetSyncLogs,
    /// `GET_MEDS`
    GetMeds,
    /// `GET_ALL_DATA`
    GetAllData,
    /// `CLEAR_LOGS`
    ClearLogs,
    /// `CLEAR_STORAGE_LOGS`
    ClearStorageLogs,
    /// `CLEAR_SYNC_LOGS`
    ClearSyncLogs,
    /// `PING`
    Ping,
}

impl From<DeviceCommand> for OutboundCommand {
    fn from(cmd: DeviceCommand) -> Self {
        match cmd {
            DeviceCommand::GetAdherence => Self::GetAdherence,
            DeviceCommand::GetLogs => Self::GetLogs,
            DeviceCommand::GetStorageLogs => Self::GetStorageLogs,
            DeviceCommand::GetSyncLogs => Self::GetSyncLogs,
            DeviceCommand::GetMeds => Self::GetMeds,
            DeviceCommand::GetAllData => Self::GetAllData,
            DeviceCommand::ClearLogs => Self::ClearLogs,
            DeviceCommand::ClearStorageLogs => Self::ClearStorageLogs,
            DeviceCommand::ClearSyncLogs => Self::ClearSyncLogs,
            DeviceCommand::Ping => Self::Ping,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("Failed to serialize output")?;
    println!("{line}");
    Ok(())
}

/// Print discovered devices until `seconds` pass or Ctrl-C
pub async fn scan(session: &DeviceSession, seconds: u64) -> Result<()> {
    let mut devices = session.scan_stream().await.context("Failed to start scan")?;
    let deadline = Instant::now() + Duration::from_secs(seconds);

    loop {
        tokio::select! {
            next = tokio::time::timeout_at(deadline, devices.next()) => match next {
                Ok(Some(Ok(device))) => print_json(&device)?,
                Ok(Some(Err(e))) => return Err(e).context("Scan failed"),
                Ok(None) | Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.stop_scan().await;
    Ok(())
}

/// Print every event from `device` until Ctrl-C or disconnect
pub async fn watch(session: &DeviceSession, device: &str) -> Result<()> {
    let (tx, mut events) = mpsc::unbounded_channel();
    let _subscription = session.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    let info = session
        .connect(device)
        .await
        .with_context(|| format!("Failed to connect to {device}"))?;
    info!(device = %info, "Watching device, Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_json(&event)?;
                if event == InboundEvent::Disconnected {
                    warn!(device, "Device disconnected");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Send one command, then print events for `listen` seconds
pub async fn send(
    session: &DeviceSession,
    device: &str,
    command: DeviceCommand,
    listen: u64,
) -> Result<()> {
    let (tx, mut events) = mpsc::unbounded_channel();
    let _subscription = session.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    session
        .connect(device)
        .await
        .with_context(|| format!("Failed to connect to {device}"))?;

    let command = OutboundCommand::from(command);
    let name = command.name();
    session
        .send(command)
        .await
        .with_context(|| format!("Failed to send {name}"))?;
    info!(command = name, "Sent");

    let deadline = Instant::now() + Duration::from_secs(listen);
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        print_json(&event)?;
        if event == InboundEvent::Disconnected {
            break;
        }
    }
    Ok(())
}

/// Run a correlated medication sync and print the outcome
pub async fn sync_med(
    session: &DeviceSession,
    device: &str,
    record: &MedicationRecord,
) -> Result<()> {
    session
        .connect(device)
        .await
        .with_context(|| format!("Failed to connect to {device}"))?;

    info!(
        name = %record.name,
        timeout = ?session.config().call_timeout,
        "Waiting for the wearer to confirm on the device"
    );
    match session.sync_medication_to_device(record).await {
        Ok(response) => print_json(&response),
        Err(SyncError::DeviceDeclined { message, .. }) => {
            anyhow::bail!(
                "Device declined {}: {}",
                record.name,
                message.as_deref().unwrap_or("no reason given")
            )
        }
        Err(e) => Err(e).context("Medication sync failed"),
    }
}
