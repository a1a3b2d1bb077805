//! Transport Configuration
//!
//! Configuration types for selecting and configuring the radio transport.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// MTU requested on connect
pub const DEFAULT_MTU: u16 = 512;

/// Transport type selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    /// Channel-backed simulated radio (tests and embedders)
    ///
    /// Must be constructed directly with `SimulatedRadio::new()`; the
    /// factory refuses it.
    Simulated,

    /// BLE bridge exposing each peripheral as a Unix socket
    #[cfg(unix)]
    UnixSocket {
        /// Bridge directory (None = use default)
        ///
        /// Default: $XDG_RUNTIME_DIR/medsync/bridge
        /// Fallback: /tmp/medsync-$UID/bridge
        bridge_dir: Option<PathBuf>,
    },
}

#[cfg(unix)]
impl Default for TransportType {
    fn default() -> Self {
        Self::UnixSocket { bridge_dir: None }
    }
}

#[cfg(not(unix))]
impl Default for TransportType {
    fn default() -> Self {
        Self::Simulated
    }
}

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport to use
    pub transport: TransportType,

    /// Connection timeout in milliseconds
    ///
    /// Bounds the whole connect handshake.
    pub connect_timeout_ms: u64,

    /// MTU requested when connecting
    pub mtu: u16,

    /// How often the bridge directory is listed while scanning
    pub scan_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport: TransportType::default(),
            connect_timeout_ms: 10_000,
            mtu: DEFAULT_MTU,
            scan_interval_ms: 1000,
        }
    }
}

impl TransportConfig {
    /// Configuration for the simulated radio
    #[must_use]
    pub fn simulated() -> Self {
        Self {
            transport: TransportType::Simulated,
            ..Default::default()
        }
    }

    /// Configuration for a bridge in `bridge_dir`
    #[cfg(unix)]
    #[must_use]
    pub fn bridge(bridge_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport: TransportType::UnixSocket {
                bridge_dir: Some(bridge_dir.into()),
            },
            ..Default::default()
        }
    }

    /// Check if this is the simulated radio
    #[must_use]
    pub fn is_simulated(&self) -> bool {
        matches!(self.transport, TransportType::Simulated)
    }

    /// Check if this is a Unix socket bridge configuration
    #[cfg(unix)]
    #[must_use]
    pub fn is_unix_socket(&self) -> bool {
        matches!(self.transport, TransportType::UnixSocket { .. })
    }
}

/// Get the default bridge directory
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp/medsync-$UID/
#[cfg(unix)]
#[must_use]
pub fn default_bridge_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("medsync").join("bridge")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/medsync-{uid}/bridge"))
    }
}
