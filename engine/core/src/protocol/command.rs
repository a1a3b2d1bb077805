//! Outbound Commands
//!
//! Commands the app sends to the wearable. Each serializes to one JSON
//! object tagged by `cmd`; the keep-alive reply is the only frame tagged by
//! `status` instead.
//!
//! ```text
//! {"cmd":"GET_LOGS"}
//! {"cmd":"UPDATE_PILL_COUNT","id":3,"pill_count":28}
//! {"status":"pong"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Default schedule frequency sent when the caller gives none
pub const DEFAULT_FREQUENCY: &str = "Daily";

/// Default schedule days sent when the caller gives none
pub const DEFAULT_DAYS: &str = "Daily";

/// Commands understood by the wearable firmware
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundCommand {
    /// Request adherence statistics
    GetAdherence,
    /// Request alarm logs
    GetLogs,
    /// Request storage logs
    GetStorageLogs,
    /// Request sync logs
    GetSyncLogs,
    /// Request stored medications
    GetMeds,
    /// Request every data set in one transfer
    GetAllData,
    /// Add a medication schedule
    AddMed(NewMedication),
    /// Update a medication schedule
    UpdateMed(MedicationUpdate),
    /// Delete a medication
    DeleteMed {
        /// Device medication id
        id: u32,
    },
    /// Set remaining pill count
    UpdatePillCount {
        /// Device medication id
        id: u32,
        /// Pills remaining
        pill_count: u32,
    },
    /// Clear alarm logs
    ClearLogs,
    /// Clear storage logs
    ClearStorageLogs,
    /// Clear sync logs
    ClearSyncLogs,
    /// App-initiated keep-alive; the device answers with `PONG`
    Ping,
    /// Propose a medication for the wearer to accept on the device
    SyncMed(SyncMedication),
}

impl OutboundCommand {
    /// Wire name of the command
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAdherence => "GET_ADHERENCE",
            Self::GetLogs => "GET_LOGS",
            Self::GetStorageLogs => "GET_STORAGE_LOGS",
            Self::GetSyncLogs => "GET_SYNC_LOGS",
            Self::GetMeds => "GET_MEDS",
            Self::GetAllData => "GET_ALL_DATA",
            Self::AddMed(_) => "ADD_MED",
            Self::UpdateMed(_) => "UPDATE_MED",
            Self::DeleteMed { .. } => "DELETE_MED",
            Self::UpdatePillCount { .. } => "UPDATE_PILL_COUNT",
            Self::ClearLogs => "CLEAR_LOGS",
            Self::ClearStorageLogs => "CLEAR_STORAGE_LOGS",
            Self::ClearSyncLogs => "CLEAR_SYNC_LOGS",
            Self::Ping => "PING",
            Self::SyncMed(_) => "SYNC_MED",
        }
    }

    /// Check field ranges before the command is encoded
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidCommand` describing the first bad field.
    pub fn validate(&self) -> Result<(), SyncError> {
        match self {
            Self::AddMed(med) => validate_schedule(&med.name, med.hour, med.minute),
            Self::UpdateMed(med) => validate_schedule(&med.name, med.hour, med.minute),
            Self::SyncMed(med) => validate_schedule(&med.name, med.hour, med.minute),
            _ => Ok(()),
        }
    }
}

fn validate_schedule(name: &str, hour: u8, minute: u8) -> Result<(), SyncError> {
    if name.trim().is_empty() {
        return Err(SyncError::InvalidCommand(
            "medication name is empty".to_string(),
        ));
    }
    if hour > 23 {
        return Err(SyncError::InvalidCommand(format!(
            "hour {hour} out of range 0-23"
        )));
    }
    if minute > 59 {
        return Err(SyncError::InvalidCommand(format!(
            "minute {minute} out of range 0-59"
        )));
    }
    Ok(())
}

/// Frames the engine writes: commands plus the status-tagged keep-alive reply
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    /// A `cmd`-tagged command
    Command(OutboundCommand),
    /// A `status`-tagged reply
    Status {
        /// Reply status
        status: StatusReply,
    },
}

impl OutboundFrame {
    /// The `{"status":"pong"}` reply to a device-initiated `PING`
    #[must_use]
    pub fn pong() -> Self {
        Self::Status {
            status: StatusReply::Pong,
        }
    }

    /// Name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command(cmd) => cmd.name(),
            Self::Status { status } => status.as_str(),
        }
    }
}

impl From<OutboundCommand> for OutboundFrame {
    fn from(cmd: OutboundCommand) -> Self {
        Self::Command(cmd)
    }
}

/// Status values the app sends unprompted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusReply {
    /// Keep-alive reply
    Pong,
}

impl StatusReply {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pong => "pong",
        }
    }
}

/// Fields of `ADD_MED`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedication {
    /// Medication name
    pub name: String,
    /// Dosage text, e.g. "500mg"
    pub dosage: String,
    /// Alarm hour (0-23)
    pub hour: u8,
    /// Alarm minute (0-59)
    pub minute: u8,
    /// Schedule frequency
    pub frequency: String,
    /// Schedule days
    pub days: String,
    /// Pills loaded
    pub pill_count: u32,
}

impl NewMedication {
    /// Daily schedule with an empty pill count
    pub fn new(name: impl Into<String>, dosage: impl Into<String>, hour: u8, minute: u8) -> Self {
        Self {
            name: name.into(),
            dosage: dosage.into(),
            hour,
            minute,
            frequency: DEFAULT_FREQUENCY.to_string(),
            days: DEFAULT_DAYS.to_string(),
            pill_count: 0,
        }
    }

    /// Set the schedule frequency
    #[must_use]
    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = frequency.into();
        self
    }

    /// Set the schedule days
    #[must_use]
    pub fn with_days(mut self, days: impl Into<String>) -> Self {
        self.days = days.into();
        self
    }

    /// Set the pill count
    #[must_use]
    pub fn with_pill_count(mut self, pill_count: u32) -> Self {
        self.pill_count = pill_count;
        self
    }
}

/// Fields of `UPDATE_MED`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationUpdate {
    /// Device medication id
    pub id: u32,
    /// Medication name
    pub name: String,
    /// Dosage text
    pub dosage: String,
    /// Alarm hour (0-23)
    pub hour: u8,
    /// Alarm minute (0-59)
    pub minute: u8,
    /// Whether the alarm is enabled
    pub active: bool,
}

impl MedicationUpdate {
    /// Update that keeps the alarm active
    pub fn new(
        id: u32,
        name: impl Into<String>,
        dosage: impl Into<String>,
        hour: u8,
        minute: u8,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            dosage: dosage.into(),
            hour,
            minute,
            active: true,
        }
    }

    /// Set whether the alarm is enabled
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Fields of `SYNC_MED`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMedication {
    /// Medication name
    pub name: String,
    /// Dosage text
    pub dosage: String,
    /// First reminder hour (0-23)
    pub hour: u8,
    /// First reminder minute (0-59)
    pub minute: u8,
    /// Schedule frequency
    pub frequency: String,
    /// Schedule days
    pub days: String,
    /// Pills in the new supply
    pub pill_quantity: u32,
}

/// A medication as the app stores it
///
/// Reminder times are 12-hour strings such as `"8:30 PM"`; the device only
/// takes the first one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationRecord {
    /// Medication name
    pub name: String,
    /// Dosage text
    pub dosage: String,
    /// Reminder times, 12-hour clock
    #[serde(default, rename = "reminderTimes")]
    pub reminder_times: Vec<String>,
    /// Schedule frequency
    #[serde(default)]
    pub frequency: Option<String>,
    /// Schedule days
    #[serde(default)]
    pub days: Option<String>,
    /// Pills in the supply
    #[serde(default)]
    pub pill_quantity: Option<u32>,
}

impl TryFrom<&MedicationRecord> for SyncMedication {
    type Error = SyncError;

    fn try_from(record: &MedicationRecord) -> Result<Self, Self::Error> {
        let first = record.reminder_times.first().ok_or_else(|| {
            SyncError::InvalidCommand(format!("{} has no reminder time", record.name))
        })?;
        let (hour, minute) = parse_reminder_time(first)?;

        Ok(Self {
            name: record.name.clone(),
            dosage: record.dosage.clone(),
            hour,
            minute,
            frequency: record
                .frequency
                .clone()
                .unwrap_or_else(|| DEFAULT_FREQUENCY.to_string()),
            days: record
                .days
                .clone()
                .unwrap_or_else(|| DEFAULT_DAYS.to_string()),
            pill_quantity: record.pill_quantity.unwrap_or(0),
        })
    }
}

/// Convert a 12-hour reminder time (`"8:30 PM"`) to 24-hour `(hour, minute)`
///
/// A time without a meridiem is read as 24-hour.
///
/// # Errors
///
/// Returns `SyncError::InvalidCommand` if the string is not a valid time.
pub fn parse_reminder_time(text: &str) -> Result<(u8, u8), SyncError> {
    let invalid = || SyncError::InvalidCommand(format!("invalid reminder time {text:?}"));

    let mut parts = text.split_whitespace();
    let clock = parts.next().ok_or_else(invalid)?;
    let meridiem = parts.next();
    if parts.next().is_some() {
        return Err(invalid());
    }

    let (h, m) = clock.split_once(':').ok_or_else(invalid)?;
    let hour: u8 = h.parse().map_err(|_| invalid())?;
    let minute: u8 = m.parse().map_err(|_| invalid())?;
    if minute > 59 {
        return Err(invalid());
    }

    let hour = match meridiem.map(str::to_ascii_uppercase).as_deref() {
        Some("AM") if (1..=12).contains(&hour) => hour % 12,
        Some("PM") if (1..=12).contains(&hour) => hour % 12 + 12,
        None if hour < 24 => hour,
        _ => return Err(invalid()),
    };

    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn wire(cmd: OutboundCommand) -> Value {
        serde_json::to_value(OutboundFrame::from(cmd)).unwrap()
    }

    #[test]
    fn test_fieldless_commands() {
        let cases = [
            (OutboundCommand::GetAdherence, "GET_ADHERENCE"),
            (OutboundCommand::GetLogs, "GET_LOGS"),
            (OutboundCommand::GetStorageLogs, "GET_STORAGE_LOGS"),
            (OutboundCommand::GetSyncLogs, "GET_SYNC_LOGS"),
            (OutboundCommand::GetMeds, "GET_MEDS"),
            (OutboundCommand::GetAllData, "GET_ALL_DATA"),
            (OutboundCommand::ClearLogs, "CLEAR_LOGS"),
            (OutboundCommand::ClearStorageLogs, "CLEAR_STORAGE_LOGS"),
            (OutboundCommand::ClearSyncLogs, "CLEAR_SYNC_LOGS"),
            (OutboundCommand::Ping, "PING"),
        ];
        for (cmd, name) in cases {
            assert_eq!(cmd.name(), name);
            assert_eq!(wire(cmd), json!({ "cmd": name }));
        }
    }

    #[test]
    fn test_add_med_carries_every_field() {
        let cmd = OutboundCommand::AddMed(
            NewMedication::new("Metformin", "500mg", 8, 30).with_pill_count(60),
        );
        assert_eq!(
            wire(cmd),
            json!({
                "cmd": "ADD_MED",
                "name": "Metformin",
                "dosage": "500mg",
                "hour": 8,
                "minute": 30,
                "frequency": "Daily",
                "days": "Daily",
                "pill_count": 60
            })
        );
    }

    #[test]
    fn test_update_med_defaults_active() {
        let cmd = OutboundCommand::UpdateMed(MedicationUpdate::new(2, "Aspirin", "81mg", 21, 0));
        assert_eq!(
            wire(cmd),
            json!({
                "cmd": "UPDATE_MED",
                "id": 2,
                "name": "Aspirin",
                "dosage": "81mg",
                "hour": 21,
                "minute": 0,
                "active": true
            })
        );
    }

    #[test]
    fn test_id_commands() {
        assert_eq!(
            wire(OutboundCommand::DeleteMed { id: 7 }),
            json!({"cmd": "DELETE_MED", "id": 7})
        );
        assert_eq!(
            wire(OutboundCommand::UpdatePillCount {
                id: 7,
                pill_count: 12
            }),
            json!({"cmd": "UPDATE_PILL_COUNT", "id": 7, "pill_count": 12})
        );
    }

    #[test]
    fn test_pong_reply_is_status_tagged() {
        let frame = crate::protocol::frame::encode(&OutboundFrame::pong()).unwrap();
        assert_eq!(frame, b"{\"status\":\"pong\"}\n".to_vec());
        assert_eq!(OutboundFrame::pong().name(), "pong");
    }

    #[test]
    fn test_sync_med_from_record() {
        let record = MedicationRecord {
            name: "Lisinopril".to_string(),
            dosage: "10mg".to_string(),
            reminder_times: vec!["8:05 PM".to_string(), "9:00 AM".to_string()],
            frequency: None,
            days: Some("Mon,Wed".to_string()),
            pill_quantity: Some(30),
        };
        let sync = SyncMedication::try_from(&record).unwrap();
        assert_eq!(
            wire(OutboundCommand::SyncMed(sync)),
            json!({
                "cmd": "SYNC_MED",
                "name": "Lisinopril",
                "dosage": "10mg",
                "hour": 20,
                "minute": 5,
                "frequency": "Daily",
                "days": "Mon,Wed",
                "pill_quantity": 30
            })
        );
    }

    #[test]
    fn test_sync_med_requires_reminder_time() {
        let record = MedicationRecord {
            name: "Lisinopril".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SyncMedication::try_from(&record),
            Err(SyncError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_parse_reminder_time() {
        assert_eq!(parse_reminder_time("8:30 AM").unwrap(), (8, 30));
        assert_eq!(parse_reminder_time("8:30 PM").unwrap(), (20, 30));
        assert_eq!(parse_reminder_time("12:00 AM").unwrap(), (0, 0));
        assert_eq!(parse_reminder_time("12:15 PM").unwrap(), (12, 15));
        assert_eq!(parse_reminder_time("7:45 pm").unwrap(), (19, 45));
        assert_eq!(parse_reminder_time("18:10").unwrap(), (18, 10));

        for bad in ["", "8 PM", "13:00 PM", "0:30 AM", "8:60 AM", "24:00", "8:30 XM", "a:b"] {
            assert!(parse_reminder_time(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_ranges() {
        assert!(OutboundCommand::AddMed(NewMedication::new("A", "1", 23, 59))
            .validate()
            .is_ok());
        assert!(OutboundCommand::AddMed(NewMedication::new("A", "1", 24, 0))
            .validate()
            .is_err());
        assert!(OutboundCommand::UpdateMed(MedicationUpdate::new(1, "A", "1", 0, 60))
            .validate()
            .is_err());
        assert!(OutboundCommand::AddMed(NewMedication::new("  ", "1", 8, 0))
            .validate()
            .is_err());
        assert!(OutboundCommand::GetLogs.validate().is_ok());
    }
}
