//! Unix Socket Bridge Transport
//!
//! Talks to a BLE bridge process that exposes every reachable peripheral as
//! a socket in one directory:
//!
//! ```text
//! $XDG_RUNTIME_DIR/medsync/bridge/
//!   ├── C8:2E:18:4A:01:F2.sock    <- connect here
//!   └── C8:2E:18:4A:01:F2.name    <- advertised name (optional)
//! ```
//!
//! Bytes read from a socket are notifications, bytes written are GATT
//! writes. EOF or a read error is a transport-initiated drop.
//!
//! The adapter reports `PoweredOff` while the bridge directory is missing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::default_bridge_dir;
use super::traits::{
    AdapterState, DeviceConnection, DeviceInfo, DeviceLink, DiscoveredDevice, LinkEvent,
    RadioAdapter, ScanEvent, TransportError,
};

const SOCKET_EXTENSION: &str = "sock";
const NAME_EXTENSION: &str = "name";
const READ_BUFFER_SIZE: usize = 4096;
const CHANNEL_CAPACITY: usize = 64;

/// Radio adapter backed by a bridge directory
pub struct SocketRadio {
    bridge_dir: PathBuf,
    scan_interval: Duration,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketRadio {
    /// Create an adapter for the bridge in `bridge_dir`
    #[must_use]
    pub fn new(bridge_dir: PathBuf, scan_interval: Duration) -> Self {
        Self {
            bridge_dir,
            scan_interval,
            scan_task: Mutex::new(None),
        }
    }

    /// Create an adapter using the default bridge directory
    #[must_use]
    pub fn with_default_dir(scan_interval: Duration) -> Self {
        Self::new(default_bridge_dir(), scan_interval)
    }

    /// Get the bridge directory
    #[must_use]
    pub fn bridge_dir(&self) -> &Path {
        &self.bridge_dir
    }

    fn socket_path(&self, device_id: &str) -> PathBuf {
        self.bridge_dir
            .join(format!("{device_id}.{SOCKET_EXTENSION}"))
    }
}

impl Drop for SocketRadio {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl RadioAdapter for SocketRadio {
    async fn permissions_granted(&self) -> bool {
        match tokio::fs::read_dir(&self.bridge_dir).await {
            Ok(_) => true,
            Err(e) => e.kind() != ErrorKind::PermissionDenied,
        }
    }

    async fn state(&self) -> AdapterState {
        match tokio::fs::metadata(&self.bridge_dir).await {
            Ok(meta) if meta.is_dir() => AdapterState::PoweredOn,
            Ok(_) => AdapterState::Unsupported,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => AdapterState::Unauthorized,
            Err(_) => AdapterState::PoweredOff,
        }
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<ScanEvent>, TransportError> {
        let state = self.state().await;
        if !state.is_powered_on() {
            return Err(TransportError::AdapterUnavailable(format!(
                "Bridge directory {} is {state:?}",
                self.bridge_dir.display()
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let dir = self.bridge_dir.clone();
        let period = self.scan_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match list_bridge(&dir).await {
                    Ok(devices) => {
                        for device in devices {
                            if tx.send(ScanEvent::Found(device)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "Bridge listing failed");
                        let _ = tx.send(ScanEvent::Failed(e.to_string())).await;
                        return;
                    }
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().replace(task) {
            previous.abort();
        }
        tracing::debug!(dir = %self.bridge_dir.display(), "Bridge scan started");
        Ok(rx)
    }

    async fn stop_scan(&self) {
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
            tracing::debug!("Bridge scan stopped");
        }
    }

    async fn connect(
        &self,
        device_id: &str,
        requested_mtu: u16,
    ) -> Result<DeviceConnection, TransportError> {
        let path = self.socket_path(device_id);
        let stream = UnixStream::connect(&path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to connect to {}: {e}",
                path.display()
            ))
        })?;

        let (mut read_half, write_half) = stream.into_split();
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let id = device_id.to_string();
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            let reason = loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => break "Bridge closed the connection".to_string(),
                    Ok(n) => {
                        if events_tx
                            .send(LinkEvent::Notification(buf[..n].to_vec()))
                            .await
                            .is_err()
                        {
                            tracing::debug!(device_id = %id, "Link event receiver dropped");
                            return;
                        }
                    }
                    Err(e) => break format!("Read error: {e}"),
                }
            };
            tracing::debug!(device_id = %id, reason = %reason, "Bridge link ended");
            let _ = events_tx
                .send(LinkEvent::Dropped {
                    reason: Some(reason),
                })
                .await;
        });

        let name = read_name(&self.bridge_dir, device_id).await;
        tracing::info!(device_id, path = %path.display(), "Connected through bridge");

        Ok(DeviceConnection {
            device: DeviceInfo {
                id: device_id.to_string(),
                name,
            },
            link: Arc::new(SocketLink {
                writer: tokio::sync::Mutex::new(Some(write_half)),
                reader: Mutex::new(Some(reader)),
                mtu: requested_mtu,
            }),
            events: events_rx,
        })
    }
}

/// One bridge socket connection
struct SocketLink {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    mtu: u16,
}

#[async_trait]
impl DeviceLink for SocketLink {
    async fn write(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let half = writer.as_mut().ok_or(TransportError::ConnectionClosed)?;
        half.write_all(chunk)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn cancel(&self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if let Some(mut half) = self.writer.lock().await.take() {
            half.shutdown().await?;
        }
        Ok(())
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn list_bridge(dir: &Path) -> std::io::Result<Vec<DiscoveredDevice>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut devices = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SOCKET_EXTENSION) {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        devices.push(DiscoveredDevice {
            id: id.to_string(),
            name: read_name(dir, id).await,
            rssi: None,
        });
    }
    devices.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(devices)
}

async fn read_name(dir: &Path, device_id: &str) -> Option<String> {
    let path = dir.join(format!("{device_id}.{NAME_EXTENSION}"));
    let text = tokio::fs::read_to_string(path).await.ok()?;
    let name = text.trim();
    (!name.is_empty()).then(|| name.to_string())
}
