//! Connection Manager
//!
//! Owns the radio lifecycle (scan, connect, disconnect) and the one live
//! connection, and pumps its notifications through
//! `FrameDecoder -> MessageRouter -> SubscriberRegistry`.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──start_scan──► Scanning ──stop_scan──► Idle
//!    │                                            ▲
//!    └──connect──► Connecting ──ok──► Connected ──┤ teardown
//!                      │                          │ (Disconnected, transient)
//!                      └──error/timeout───────────┘
//! ```
//!
//! Every way a connection can end (explicit `disconnect`, a transport drop
//! notice, the link's event channel closing, being replaced by a new
//! `connect`) goes through the same teardown: the connection and its
//! reassembly buffer are discarded, the state returns to `Idle` and a
//! `DISCONNECTED` event is published, which also fails every correlated
//! call still waiting.
//!
//! # Writes
//!
//! Outbound frames go through one async write lock. A frame is split into
//! `mtu - 3` byte chunks and all chunks are written while the lock is held,
//! so frames from concurrent callers never interleave.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::protocol::command::{OutboundCommand, OutboundFrame};
use crate::protocol::event::InboundEvent;
use crate::protocol::frame::{self, FrameDecoder};
use crate::protocol::router::{MessageRouter, Route};
use crate::registry::SubscriberRegistry;
use crate::transport::{
    DeviceConnection, DeviceInfo, DeviceLink, DiscoveredDevice, LinkEvent, RadioAdapter,
    ScanEvent,
};

/// Unique identifier for one connection
///
/// A reconnect to the same device gets a new id, so teardown of a stale
/// connection can never touch its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection, no scan
    Idle,
    /// Discovery running
    Scanning,
    /// Handshake in progress
    Connecting,
    /// Link up
    Connected,
    /// Link being torn down
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Snapshot of the connection for collaborators
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// Whether a link is up
    pub is_connected: bool,
    /// The connected device
    pub device: Option<DeviceInfo>,
    /// Lifecycle state
    pub state: ConnectionState,
    /// When the current link came up
    pub connected_since: Option<DateTime<Utc>>,
}

struct Connection {
    id: ConnectionId,
    device: DeviceInfo,
    link: Arc<dyn DeviceLink>,
    decoder: FrameDecoder,
    connected_since: DateTime<Utc>,
    driver: Option<JoinHandle<()>>,
}

struct ManagerState {
    phase: ConnectionState,
    connection: Option<Connection>,
    scan: Option<JoinHandle<()>>,
}

struct Shared {
    radio: Arc<dyn RadioAdapter>,
    registry: SubscriberRegistry,
    router: MessageRouter,
    requested_mtu: u16,
    connect_timeout: Duration,
    state: Mutex<ManagerState>,
    /// Single outbound write path
    write_lock: tokio::sync::Mutex<()>,
    /// Serializes connect/disconnect against each other
    lifecycle_lock: tokio::sync::Mutex<()>,
}

/// Owner of the radio and the live connection
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("requested_mtu", &self.shared.requested_mtu)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager publishing inbound events to `registry`
    #[must_use]
    pub fn new(
        radio: Arc<dyn RadioAdapter>,
        registry: SubscriberRegistry,
        requested_mtu: u16,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                radio,
                registry,
                router: MessageRouter::new(),
                requested_mtu,
                connect_timeout,
                state: Mutex::new(ManagerState {
                    phase: ConnectionState::Idle,
                    connection: None,
                    scan: None,
                }),
                write_lock: tokio::sync::Mutex::new(()),
                lifecycle_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().phase
    }

    /// Whether a link is up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let state = self.shared.state.lock();
        state.phase == ConnectionState::Connected && state.connection.is_some()
    }

    /// Snapshot of the connection
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let state = self.shared.state.lock();
        let live = state
            .connection
            .as_ref()
            .filter(|_| state.phase == ConnectionState::Connected);
        ConnectionStatus {
            is_connected: live.is_some(),
            device: live.map(|c| c.device.clone()),
            state: state.phase,
            connected_since: live.map(|c| c.connected_since),
        }
    }

    /// Id of the live connection
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared.state.lock().connection.as_ref().map(|c| c.id)
    }

    /// Partial frame buffered on the live connection
    #[must_use]
    pub fn pending_fragment(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .connection
            .as_ref()
            .map(|c| c.decoder.pending())
    }

    /// Begin discovery
    ///
    /// `on_found` runs once per distinct named device. `on_error` runs at
    /// most once, if discovery fails after it started; discovery is over
    /// at that point. A running scan is replaced.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` or `AdapterDisabled` when the platform
    /// preconditions are not met (discovery is not started), `ScanError`
    /// when the radio refuses to start.
    pub async fn start_scan<F, E>(&self, on_found: F, on_error: E) -> Result<(), SyncError>
    where
        F: Fn(DiscoveredDevice) + Send + 'static,
        E: FnOnce(SyncError) + Send + 'static,
    {
        let radio = &self.shared.radio;
        if !radio.permissions_granted().await {
            tracing::warn!("Scan refused: radio permissions not granted");
            return Err(SyncError::PermissionDenied);
        }
        let adapter = radio.state().await;
        if !adapter.is_powered_on() {
            tracing::warn!(adapter = ?adapter, "Scan refused: adapter not powered on");
            return Err(SyncError::AdapterDisabled);
        }

        self.stop_scan().await;
        let mut events = radio.start_scan().await.map_err(SyncError::from)?;

        let weak = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            let mut seen = HashSet::new();
            while let Some(event) = events.recv().await {
                match event {
                    ScanEvent::Found(device) => {
                        let named = device.name.as_deref().is_some_and(|n| !n.trim().is_empty());
                        if !named {
                            tracing::trace!(device_id = %device.id, "Skipping unnamed device");
                            continue;
                        }
                        if seen.insert(device.id.clone()) {
                            tracing::info!(
                                device_id = %device.id,
                                name = device.name.as_deref().unwrap_or_default(),
                                rssi = ?device.rssi,
                                "Device discovered"
                            );
                            on_found(device);
                        }
                    }
                    ScanEvent::Failed(reason) => {
                        tracing::error!(reason = %reason, "Scan failed");
                        on_error(SyncError::ScanError(reason));
                        break;
                    }
                }
            }
            if let Some(shared) = weak.upgrade() {
                let mut state = shared.state.lock();
                if state.phase == ConnectionState::Scanning {
                    state.phase = ConnectionState::Idle;
                }
            }
        });

        let mut state = self.shared.state.lock();
        state.scan = Some(task);
        if state.phase == ConnectionState::Idle {
            state.phase = ConnectionState::Scanning;
        }
        tracing::info!("Scan started");
        Ok(())
    }

    /// Stop discovery; a no-op when not scanning
    pub async fn stop_scan(&self) {
        let task = {
            let mut state = self.shared.state.lock();
            if state.phase == ConnectionState::Scanning {
                state.phase = ConnectionState::Idle;
            }
            state.scan.take()
        };
        if let Some(task) = task {
            task.abort();
            self.shared.radio.stop_scan().await;
            tracing::info!("Scan stopped");
        }
    }

    /// Connect to `device_id` and start streaming its notifications
    ///
    /// Any scan is stopped first. A live connection (to this or another
    /// device) is torn down through the normal teardown path before the
    /// new handshake starts.
    ///
    /// # Errors
    ///
    /// `ConnectionError` if the handshake fails or exceeds the connect
    /// timeout; the state is `Idle` afterwards.
    pub async fn connect(&self, device_id: &str) -> Result<DeviceInfo, SyncError> {
        let _lifecycle = self.shared.lifecycle_lock.lock().await;
        self.stop_scan().await;

        if let Some((id, link)) = self.live_link() {
            tracing::info!(connection_id = %id, "Replacing live connection");
            if let Err(e) = link.cancel().await {
                tracing::warn!(connection_id = %id, error = %e, "Cancel failed");
            }
            self.shared.teardown(id, Some("replaced by new connection"));
        }

        self.shared.state.lock().phase = ConnectionState::Connecting;
        tracing::info!(device_id, "Connecting");

        let attempt = tokio::time::timeout(
            self.shared.connect_timeout,
            self.shared
                .radio
                .connect(device_id, self.shared.requested_mtu),
        )
        .await;

        let DeviceConnection {
            device,
            link,
            events,
        } = match attempt {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                self.shared.state.lock().phase = ConnectionState::Idle;
                tracing::warn!(device_id, error = %e, "Connection failed");
                return Err(SyncError::ConnectionError(e.to_string()));
            }
            Err(_) => {
                self.shared.state.lock().phase = ConnectionState::Idle;
                tracing::warn!(device_id, timeout = ?self.shared.connect_timeout, "Connection timed out");
                return Err(SyncError::ConnectionError(format!(
                    "Handshake with {device_id} timed out after {}ms",
                    self.shared.connect_timeout.as_millis()
                )));
            }
        };

        let id = ConnectionId::new();
        let mtu = link.mtu();
        {
            let mut state = self.shared.state.lock();
            state.connection = Some(Connection {
                id,
                device: device.clone(),
                link,
                decoder: FrameDecoder::new(),
                connected_since: Utc::now(),
                driver: None,
            });
            state.phase = ConnectionState::Connected;
        }

        let driver = tokio::spawn(drive_inbound(Arc::downgrade(&self.shared), id, events));
        if let Some(conn) = self.shared.state.lock().connection.as_mut() {
            if conn.id == id {
                conn.driver = Some(driver);
            }
        }

        tracing::info!(connection_id = %id, device = %device, mtu, "Connected");
        Ok(device)
    }

    /// Disconnect `device_id` if it is the live device
    ///
    /// Returns whether a connection was torn down.
    pub async fn disconnect(&self, device_id: &str) -> bool {
        let _lifecycle = self.shared.lifecycle_lock.lock().await;

        let target = {
            let mut state = self.shared.state.lock();
            match state.connection.as_ref() {
                Some(conn) if conn.device.id == device_id => {
                    let target = (conn.id, Arc::clone(&conn.link));
                    state.phase = ConnectionState::Disconnected;
                    Some(target)
                }
                _ => None,
            }
        };

        let Some((id, link)) = target else {
            tracing::debug!(device_id, "Disconnect ignored: not the live device");
            return false;
        };

        if let Err(e) = link.cancel().await {
            tracing::warn!(connection_id = %id, error = %e, "Cancel failed");
        }
        // The driver may already have run teardown when cancel closed the link
        self.shared.teardown(id, Some("disconnect requested"));
        true
    }

    /// Stop scanning and disconnect the live device
    pub async fn shutdown(&self) {
        self.stop_scan().await;
        let device = self
            .shared
            .state
            .lock()
            .connection
            .as_ref()
            .map(|c| c.device.id.clone());
        if let Some(device_id) = device {
            self.disconnect(&device_id).await;
        }
    }

    /// Validate, encode and write one command
    ///
    /// # Errors
    ///
    /// `InvalidCommand` before anything is written, `NotConnected` without
    /// a live link, `Disconnected`/`ConnectionError` if the write fails.
    pub async fn send(&self, command: OutboundCommand) -> Result<(), SyncError> {
        command.validate()?;
        self.shared.send_frame(&OutboundFrame::from(command)).await
    }

    fn live_link(&self) -> Option<(ConnectionId, Arc<dyn DeviceLink>)> {
        self.shared
            .state
            .lock()
            .connection
            .as_ref()
            .map(|c| (c.id, Arc::clone(&c.link)))
    }
}

impl Shared {
    fn connected_link(&self) -> Option<(ConnectionId, Arc<dyn DeviceLink>)> {
        let state = self.state.lock();
        if state.phase != ConnectionState::Connected {
            return None;
        }
        state
            .connection
            .as_ref()
            .map(|c| (c.id, Arc::clone(&c.link)))
    }

    async fn send_frame(&self, frame: &OutboundFrame) -> Result<(), SyncError> {
        if self.connected_link().is_none() {
            return Err(SyncError::NotConnected);
        }
        let bytes = frame::encode(frame)?;

        let _write = self.write_lock.lock().await;
        let (id, link) = self.connected_link().ok_or(SyncError::NotConnected)?;
        for chunk in frame::write_chunks(&bytes, link.mtu()) {
            if let Err(e) = link.write(chunk).await {
                tracing::warn!(connection_id = %id, command = frame.name(), error = %e, "Write failed");
                return Err(e.into());
            }
        }
        tracing::debug!(connection_id = %id, command = frame.name(), bytes = bytes.len(), "Sent to device");
        Ok(())
    }

    async fn handle_chunk(&self, id: ConnectionId, chunk: &[u8]) {
        let lines = {
            let mut state = self.state.lock();
            match state.connection.as_mut() {
                Some(conn) if conn.id == id => conn.decoder.push(chunk),
                _ => return,
            }
        };

        for line in lines {
            match self.router.route(&line) {
                Route::Publish(event) => self.registry.publish(&event),
                Route::Reply(reply) => {
                    if let Err(e) = self.send_frame(&reply).await {
                        tracing::warn!(connection_id = %id, error = %e, "Keep-alive reply failed");
                    }
                }
                Route::Drop => {}
            }
        }
    }

    /// Tear down connection `id` if it is still the live one
    fn teardown(&self, id: ConnectionId, reason: Option<&str>) -> bool {
        let conn = {
            let mut state = self.state.lock();
            match state.connection.as_ref() {
                Some(conn) if conn.id == id => {}
                _ => return false,
            }
            state.phase = ConnectionState::Disconnected;
            state.connection.take()
        };

        if let Some(conn) = conn {
            if let Some(driver) = conn.driver {
                driver.abort();
            }
            tracing::info!(
                connection_id = %id,
                device = %conn.device,
                reason = reason.unwrap_or("link lost"),
                discarded_bytes = conn.decoder.available(),
                "Connection torn down"
            );
        }

        {
            let mut state = self.state.lock();
            if state.phase == ConnectionState::Disconnected {
                state.phase = ConnectionState::Idle;
            }
        }
        self.registry.publish(&InboundEvent::Disconnected);
        true
    }
}

/// Inbound pump for one connection; frames are handled strictly in order
async fn drive_inbound(
    weak: Weak<Shared>,
    id: ConnectionId,
    mut events: mpsc::Receiver<LinkEvent>,
) {
    let reason = loop {
        let Some(event) = events.recv().await else {
            break None;
        };
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match event {
            LinkEvent::Notification(chunk) => shared.handle_chunk(id, &chunk).await,
            LinkEvent::Dropped { reason } => break reason,
        }
    };

    if let Some(shared) = weak.upgrade() {
        if shared.teardown(id, Some(reason.as_deref().unwrap_or("link closed"))) {
            tracing::warn!(connection_id = %id, reason = ?reason, "Link dropped by transport");
        }
    }
}
