//! Engine Errors
//!
//! The error taxonomy surfaced to callers of the sync engine. Transport
//! failures are reported by the transport layer as [`TransportError`] and
//! mapped into [`SyncError`] at the engine boundary.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::event::EventType;
use crate::transport::TransportError;

/// Errors returned by sync engine operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Radio permissions have not been granted by the platform
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    /// The radio adapter is off or unavailable
    #[error("Bluetooth is not enabled")]
    AdapterDisabled,

    /// Device discovery failed
    #[error("Scan failed: {0}")]
    ScanError(String),

    /// Establishing a connection failed
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    /// A write was attempted without a live connection
    #[error("Not connected to device")]
    NotConnected,

    /// The connection went away while the operation was outstanding
    #[error("Device disconnected")]
    Disconnected,

    /// No matching reply arrived before the deadline
    #[error("Device confirmation timeout ({:?})", .0)]
    Timeout(Duration),

    /// A frame could not be interpreted
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The device answered and declined the request
    #[error("Device declined the request: {}", .message.as_deref().unwrap_or("no reason given"))]
    DeviceDeclined {
        /// Device-assigned medication id, when the device reports one
        medication_id: Option<u32>,
        /// Human-readable reason from the device
        message: Option<String>,
    },

    /// A command failed validation and was never sent
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A correlated call for this response type is already outstanding
    #[error("A request awaiting {0} is already in flight")]
    RequestInFlight(EventType),
}

impl SyncError {
    /// Whether the caller could reasonably retry the same operation later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError(_)
                | Self::NotConnected
                | Self::Disconnected
                | Self::Timeout(_)
                | Self::RequestInFlight(_)
        )
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionClosed => Self::Disconnected,
            TransportError::PermissionDenied => Self::PermissionDenied,
            TransportError::AdapterUnavailable(_) => Self::AdapterDisabled,
            TransportError::ScanFailed(msg) => Self::ScanError(msg),
            TransportError::InvalidState(_) => Self::NotConnected,
            other => Self::ConnectionError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = SyncError::Timeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "Device confirmation timeout (60s)");

        let err = SyncError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "Device confirmation timeout (500ms)");
    }

    #[test]
    fn test_declined_display() {
        let err = SyncError::DeviceDeclined {
            medication_id: None,
            message: Some("user pressed no".to_string()),
        };
        assert!(err.to_string().contains("user pressed no"));

        let err = SyncError::DeviceDeclined {
            medication_id: Some(3),
            message: None,
        };
        assert!(err.to_string().contains("no reason given"));
    }

    #[test]
    fn test_from_transport_error() {
        assert!(matches!(
            SyncError::from(TransportError::ConnectionClosed),
            SyncError::Disconnected
        ));
        assert!(matches!(
            SyncError::from(TransportError::PermissionDenied),
            SyncError::PermissionDenied
        ));
        assert!(matches!(
            SyncError::from(TransportError::AdapterUnavailable("off".into())),
            SyncError::AdapterDisabled
        ));
        assert!(matches!(
            SyncError::from(TransportError::ConnectionFailed("refused".into())),
            SyncError::ConnectionError(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(!SyncError::PermissionDenied.is_retryable());
        assert!(!SyncError::InvalidCommand("bad".into()).is_retryable());
    }
}
