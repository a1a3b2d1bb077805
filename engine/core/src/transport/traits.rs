//! Transport Traits
//!
//! Core trait definitions for the radio link to the wearable.
//!
//! Two traits define the two levels of the transport:
//! - `RadioAdapter`: the central side (permissions, power, discovery, connect)
//! - `DeviceLink`: one live connection to a peripheral (write, cancel)
//!
//! Inbound traffic does not go through a trait method. A successful
//! [`RadioAdapter::connect`] hands back a [`DeviceConnection`] whose event
//! receiver carries raw notification chunks and the drop notice.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Power/availability state of the radio adapter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    /// Radio is on and usable
    PoweredOn,
    /// Radio is switched off
    PoweredOff,
    /// The platform refused radio access
    Unauthorized,
    /// No radio hardware
    Unsupported,
    /// State not yet known
    Unknown,
}

impl AdapterState {
    /// Whether discovery and connections are possible
    #[must_use]
    pub fn is_powered_on(self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

/// Identity of a peripheral
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform device id (MAC address, UUID, or bridge socket name)
    pub id: String,
    /// Advertised name
    pub name: Option<String>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A peripheral seen during discovery
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Platform device id
    pub id: String,
    /// Advertised name (unnamed advertisements are filtered out by the engine)
    pub name: Option<String>,
    /// Signal strength, if reported
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Identity part of the discovery result
    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Discovery output
#[derive(Clone, Debug)]
pub enum ScanEvent {
    /// A device advertisement
    Found(DiscoveredDevice),
    /// Discovery failed; no further events follow
    Failed(String),
}

/// Inbound traffic from a live link
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A notification chunk (arbitrary size, no framing guarantees)
    Notification(Vec<u8>),
    /// The transport lost the link (radio drop, device powered off)
    Dropped {
        /// Reason reported by the transport, if any
        reason: Option<String>,
    },
}

/// Result of a successful connect
pub struct DeviceConnection {
    /// Connected peripheral
    pub device: DeviceInfo,
    /// Write/cancel side of the link
    pub link: Arc<dyn DeviceLink>,
    /// Inbound notifications; a closed channel means the link is gone
    pub events: mpsc::Receiver<LinkEvent>,
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("device", &self.device)
            .field("mtu", &self.link.mtu())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Radio permissions not granted
    PermissionDenied,
    /// Radio is off or missing
    AdapterUnavailable(String),
    /// Discovery could not be started
    ScanFailed(String),
    /// Connection to peer failed
    ConnectionFailed(String),
    /// Connection was closed
    ConnectionClosed,
    /// Failed to write to the peer
    SendFailed(String),
    /// IO error from underlying transport
    IoError(std::io::Error),
    /// Transport not in expected state
    InvalidState(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "Permission denied"),
            Self::AdapterUnavailable(msg) => write!(f, "Adapter unavailable: {msg}"),
            Self::ScanFailed(msg) => write!(f, "Scan failed: {msg}"),
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

/// Central-side radio access
///
/// Implementations wrap a concrete radio stack. Platform preconditions
/// (permissions, power) are queried by the engine before discovery starts.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Whether the platform has granted the permissions discovery needs
    async fn permissions_granted(&self) -> bool;

    /// Current adapter power state
    async fn state(&self) -> AdapterState;

    /// Begin discovery
    ///
    /// Events flow until [`RadioAdapter::stop_scan`] is called or a
    /// `ScanEvent::Failed` is delivered.
    async fn start_scan(&self) -> Result<mpsc::Receiver<ScanEvent>, TransportError>;

    /// Stop discovery (no-op when not scanning)
    async fn stop_scan(&self);

    /// Connect to a peripheral and complete the handshake
    ///
    /// `requested_mtu` is a hint; the negotiated value is reported by
    /// [`DeviceLink::mtu`].
    async fn connect(
        &self,
        device_id: &str,
        requested_mtu: u16,
    ) -> Result<DeviceConnection, TransportError>;
}

/// One live link to a peripheral
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Write one chunk (at most `mtu() - 3` bytes) to the peripheral
    async fn write(&self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Close the link from the central side
    async fn cancel(&self) -> Result<(), TransportError>;

    /// Negotiated MTU
    fn mtu(&self) -> u16;
}
