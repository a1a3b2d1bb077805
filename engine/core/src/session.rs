//! Device Session
//!
//! The explicitly constructed engine object: one per logical wearable
//! session. It wires the [`ConnectionManager`], [`SubscriberRegistry`] and
//! [`Correlator`] together and exposes the operations the app screens use.
//!
//! ```ignore
//! let session = DeviceSession::new(radio, SessionConfig::default());
//! let _sub = session.subscribe(|event| println!("{event:?}"));
//!
//! session.connect("C8:2E:18:4A:01:F2").await?;
//! session.request_logs().await?;
//!
//! let reply = session.sync_medication_to_device(&record).await?;
//! session.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::DEFAULT_CALL_TIMEOUT;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::correlator::Correlator;
use crate::error::SyncError;
use crate::protocol::command::{
    MedicationRecord, MedicationUpdate, NewMedication, OutboundCommand, SyncMedication,
};
use crate::protocol::event::{EventType, InboundEvent, SyncResponse};
use crate::registry::{SubscriberRegistry, Subscription};
use crate::transport::{DeviceInfo, DiscoveredDevice, RadioAdapter, DEFAULT_MTU};

/// Default bound on the connect handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// MTU requested on connect
    pub mtu: u16,
    /// Bound on the connect handshake
    pub connect_timeout: Duration,
    /// Deadline used by `sync_medication_to_device`
    pub call_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Scan results as a stream; ends after a scan failure
pub type ScanStream = UnboundedReceiverStream<Result<DiscoveredDevice, SyncError>>;

/// One wearable sync session
#[derive(Clone, Debug)]
pub struct DeviceSession {
    manager: ConnectionManager,
    registry: SubscriberRegistry,
    correlator: Correlator,
    config: SessionConfig,
}

impl DeviceSession {
    /// Create a session over `radio`
    #[must_use]
    pub fn new(radio: Arc<dyn RadioAdapter>, config: SessionConfig) -> Self {
        let registry = SubscriberRegistry::new();
        let manager = ConnectionManager::new(
            radio,
            registry.clone(),
            config.mtu,
            config.connect_timeout,
        );
        let correlator = Correlator::new(registry.clone());
        Self {
            manager,
            registry,
            correlator,
            config,
        }
    }

    /// Session settings
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stop scanning, disconnect, and drop every subscriber
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        self.registry.clear();
        tracing::info!("Session shut down");
    }

    // =========================================================================
    // Subscribers and status
    // =========================================================================

    /// Observe every inbound event
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.registry.subscribe(callback)
    }

    /// Number of registered subscribers, including pending calls
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.count()
    }

    /// Connection snapshot
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    /// The live device, if any
    #[must_use]
    pub fn connected_devices(&self) -> Vec<DeviceInfo> {
        self.manager.status().device.into_iter().collect()
    }

    /// Partial frame buffered on the live connection
    #[must_use]
    pub fn pending_fragment(&self) -> Option<String> {
        self.manager.pending_fragment()
    }

    // =========================================================================
    // Discovery and lifecycle
    // =========================================================================

    /// Begin discovery with callbacks
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::start_scan`].
    pub async fn start_scan<F, E>(&self, on_found: F, on_error: E) -> Result<(), SyncError>
    where
        F: Fn(DiscoveredDevice) + Send + 'static,
        E: FnOnce(SyncError) + Send + 'static,
    {
        self.manager.start_scan(on_found, on_error).await
    }

    /// Begin discovery, yielding results as a stream
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::start_scan`].
    pub async fn scan_stream(&self) -> Result<ScanStream, SyncError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let error_tx = tx.clone();
        self.manager
            .start_scan(
                move |device| {
                    let _ = tx.send(Ok(device));
                },
                move |error| {
                    let _ = error_tx.send(Err(error));
                },
            )
            .await?;
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Stop discovery
    pub async fn stop_scan(&self) {
        self.manager.stop_scan().await;
    }

    /// Connect to a device
    ///
    /// # Errors
    ///
    /// `ConnectionError` if the handshake fails.
    pub async fn connect(&self, device_id: &str) -> Result<DeviceInfo, SyncError> {
        self.manager.connect(device_id).await
    }

    /// Disconnect `device_id` if it is the live device
    pub async fn disconnect(&self, device_id: &str) -> bool {
        self.manager.disconnect(device_id).await
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Send one command without waiting for a reply
    ///
    /// # Errors
    ///
    /// `InvalidCommand`, `NotConnected`, or a write failure.
    pub async fn send(&self, command: OutboundCommand) -> Result<(), SyncError> {
        self.manager.send(command).await
    }

    /// Send `command` and wait for the first `expected` event
    ///
    /// # Errors
    ///
    /// See [`Correlator::call`]; send failures are returned as is.
    pub async fn call(
        &self,
        command: OutboundCommand,
        expected: EventType,
        timeout: Duration,
    ) -> Result<InboundEvent, SyncError> {
        command.validate()?;
        self.correlator
            .call(expected, timeout, self.manager.send(command))
            .await
    }

    /// Push a medication to the device and wait for the wearer's answer
    ///
    /// # Errors
    ///
    /// `InvalidCommand` if the record has no usable reminder time,
    /// `DeviceDeclined` if the device answers `accepted: false`, and the
    /// `call` failures (`Timeout`, `Disconnected`, `NotConnected`, ...).
    pub async fn sync_medication_to_device(
        &self,
        record: &MedicationRecord,
    ) -> Result<SyncResponse, SyncError> {
        let medication = SyncMedication::try_from(record)?;
        tracing::info!(
            name = %medication.name,
            hour = medication.hour,
            minute = medication.minute,
            "Syncing medication to device"
        );

        let reply = self
            .call(
                OutboundCommand::SyncMed(medication),
                EventType::SyncResponse,
                self.config.call_timeout,
            )
            .await?;

        match reply {
            InboundEvent::SyncResponse(response) if response.accepted => Ok(response),
            InboundEvent::SyncResponse(response) => Err(SyncError::DeviceDeclined {
                medication_id: response.medication_id,
                message: response.message,
            }),
            other => Err(SyncError::ProtocolError(format!(
                "Expected SYNC_RESPONSE, got {}",
                other.event_type()
            ))),
        }
    }

    /// Ask for adherence statistics (`ADHERENCE_DATA` follows)
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn request_adherence(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::GetAdherence).await
    }

    /// Ask for alarm logs (`LOGS_DATA` follows)
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn request_logs(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::GetLogs).await
    }

    /// Ask for pill storage logs
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn request_storage_logs(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::GetStorageLogs).await
    }

    /// Ask for medication sync logs
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn request_sync_logs(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::GetSyncLogs).await
    }

    /// Ask for the medications stored on the device
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn request_medications(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::GetMeds).await
    }

    /// Ask for everything (`ALL_DATA_SENT_CONFIRM` ends the transfer)
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn request_all_data(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::GetAllData).await
    }

    /// Store a new medication on the device
    ///
    /// # Errors
    ///
    /// `InvalidCommand`, `NotConnected`, or a write failure.
    pub async fn add_medication(&self, medication: NewMedication) -> Result<(), SyncError> {
        self.send(OutboundCommand::AddMed(medication)).await
    }

    /// Replace a stored medication
    ///
    /// # Errors
    ///
    /// `InvalidCommand`, `NotConnected`, or a write failure.
    pub async fn update_medication(&self, update: MedicationUpdate) -> Result<(), SyncError> {
        self.send(OutboundCommand::UpdateMed(update)).await
    }

    /// Remove a stored medication
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn delete_medication(&self, id: u32) -> Result<(), SyncError> {
        self.send(OutboundCommand::DeleteMed { id }).await
    }

    /// Set the remaining pill count of a stored medication
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn update_pill_count(&self, id: u32, pill_count: u32) -> Result<(), SyncError> {
        self.send(OutboundCommand::UpdatePillCount { id, pill_count })
            .await
    }

    /// Erase alarm logs on the device
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn clear_logs(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::ClearLogs).await
    }

    /// Erase storage logs on the device
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn clear_storage_logs(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::ClearStorageLogs).await
    }

    /// Erase sync logs on the device
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn clear_sync_logs(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::ClearSyncLogs).await
    }

    /// Ping the device (`PONG` follows)
    ///
    /// # Errors
    ///
    /// `NotConnected` or a write failure.
    pub async fn ping(&self) -> Result<(), SyncError> {
        self.send(OutboundCommand::Ping).await
    }
}
