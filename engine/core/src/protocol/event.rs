//! Inbound Events
//!
//! Typed events produced by the router from device frames, plus the
//! engine-originated `Disconnected`. These are what subscribers see.
//!
//! Serialized form matches what application screens consume:
//!
//! ```text
//! {"type":"LOGS_DATA","logs":[...],"count":3}
//! {"type":"SYNC_RESPONSE","accepted":true,"medication_id":4,"message":null}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events delivered to subscribers
///
/// Payload fields the device may omit carry the same defaults the app has
/// always applied (`[]` for lists, `0` for counts).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundEvent {
    /// Alarm log entries
    LogsData {
        /// Log records as sent by the device
        logs: Vec<Value>,
        /// Number of records the device reports
        count: u64,
    },

    /// Pill storage log entries
    StorageLogsData {
        /// Log records as sent by the device
        logs: Vec<Value>,
        /// Number of records the device reports
        count: u64,
    },

    /// Medication sync log entries
    SyncLogsData {
        /// Log records as sent by the device
        logs: Vec<Value>,
        /// Number of records the device reports
        count: u64,
    },

    /// Adherence statistics
    AdherenceData {
        /// Opaque adherence object
        data: Value,
    },

    /// Medications stored on the device
    MedsData {
        /// Medication records
        medications: Vec<Value>,
        /// Number of records the device reports
        count: u64,
    },

    /// Device confirmed alarm logs were sent
    LogsSentConfirm {
        /// Records sent
        count: Option<u64>,
        /// Whether the transfer succeeded
        success: Option<bool>,
    },

    /// Device confirmed storage logs were sent
    StorageLogsSentConfirm {
        /// Records sent
        count: Option<u64>,
        /// Whether the transfer succeeded
        success: Option<bool>,
    },

    /// Device confirmed sync logs were sent
    SyncLogsSentConfirm {
        /// Records sent
        count: Option<u64>,
        /// Whether the transfer succeeded
        success: Option<bool>,
    },

    /// Device finished a `GET_ALL_DATA` transfer
    AllDataSentConfirm {
        /// Transfer status string
        status: Option<String>,
        /// Human-readable summary
        message: Option<String>,
        /// Per-category counts
        breakdown: Option<Value>,
        /// Items transferred
        items_sent: Option<u64>,
        /// Items available
        items_total: Option<u64>,
    },

    /// Device answered a `SYNC_MED` request
    SyncResponse(SyncResponse),

    /// Device answered an app-initiated `PING`
    Pong,

    /// Device acknowledged a command
    Success {
        /// The acknowledged command, when the device names it
        command: Option<String>,
    },

    /// Device reported a failure
    Error {
        /// Failure description
        message: Option<String>,
    },

    /// The connection was torn down
    Disconnected,
}

/// Reply to a medication sync request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Whether the wearer accepted the medication
    #[serde(default)]
    pub accepted: bool,
    /// Device-assigned medication id
    #[serde(default)]
    pub medication_id: Option<u32>,
    /// Optional note from the device
    #[serde(default)]
    pub message: Option<String>,
}

impl InboundEvent {
    /// Discriminator of this event
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::LogsData { .. } => EventType::LogsData,
            Self::StorageLogsData { .. } => EventType::StorageLogsData,
            Self::SyncLogsData { .. } => EventType::SyncLogsData,
            Self::AdherenceData { .. } => EventType::AdherenceData,
            Self::MedsData { .. } => EventType::MedsData,
            Self::LogsSentConfirm { .. } => EventType::LogsSentConfirm,
            Self::StorageLogsSentConfirm { .. } => EventType::StorageLogsSentConfirm,
            Self::SyncLogsSentConfirm { .. } => EventType::SyncLogsSentConfirm,
            Self::AllDataSentConfirm { .. } => EventType::AllDataSentConfirm,
            Self::SyncResponse(_) => EventType::SyncResponse,
            Self::Pong => EventType::Pong,
            Self::Success { .. } => EventType::Success,
            Self::Error { .. } => EventType::Error,
            Self::Disconnected => EventType::Disconnected,
        }
    }
}

/// Field-less discriminator of [`InboundEvent`]
///
/// Used as the key for correlated calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// `LOGS_DATA`
    LogsData,
    /// `STORAGE_LOGS_DATA`
    StorageLogsData,
    /// `SYNC_LOGS_DATA`
    SyncLogsData,
    /// `ADHERENCE_DATA`
    AdherenceData,
    /// `MEDS_DATA`
    MedsData,
    /// `LOGS_SENT_CONFIRM`
    LogsSentConfirm,
    /// `STORAGE_LOGS_SENT_CONFIRM`
    StorageLogsSentConfirm,
    /// `SYNC_LOGS_SENT_CONFIRM`
    SyncLogsSentConfirm,
    /// `ALL_DATA_SENT_CONFIRM`
    AllDataSentConfirm,
    /// `SYNC_RESPONSE`
    SyncResponse,
    /// `PONG`
    Pong,
    /// `status: success`
    Success,
    /// `status: error`
    Error,
    /// Connection teardown
    Disconnected,
}

impl EventType {
    /// Wire/display name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogsData => "LOGS_DATA",
            Self::StorageLogsData => "STORAGE_LOGS_DATA",
            Self::SyncLogsData => "SYNC_LOGS_DATA",
            Self::AdherenceData => "ADHERENCE_DATA",
            Self::MedsData => "MEDS_DATA",
            Self::LogsSentConfirm => "LOGS_SENT_CONFIRM",
            Self::StorageLogsSentConfirm => "STORAGE_LOGS_SENT_CONFIRM",
            Self::SyncLogsSentConfirm => "SYNC_LOGS_SENT_CONFIRM",
            Self::AllDataSentConfirm => "ALL_DATA_SENT_CONFIRM",
            Self::SyncResponse => "SYNC_RESPONSE",
            Self::Pong => "PONG",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
