//! Message Router
//!
//! Parses each complete line as JSON and classifies it by its discriminator
//! (`cmd`, falling back to `status`) into an [`InboundEvent`].
//!
//! A malformed line is logged and dropped; it never ends the stream.
//!
//! `PING` is the one inbound frame with a mandatory side effect: the device
//! expects an immediate `{"status":"pong"}` and subscribers never see the
//! ping itself. The router reports that as [`Route::Reply`] and the
//! connection driver writes the reply through the normal outbound path.

use serde_json::{Map, Value};

use super::command::OutboundFrame;
use super::event::{InboundEvent, SyncResponse};

/// What the connection driver must do with a routed line
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    /// Publish this event to subscribers
    Publish(InboundEvent),
    /// Write this frame back to the device; publish nothing
    Reply(OutboundFrame),
    /// Nothing to do
    Drop,
}

/// Stateless line classifier
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageRouter;

impl MessageRouter {
    /// Create a router
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify one decoded line
    #[must_use]
    pub fn route(&self, line: &str) -> Route {
        let json: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, frame = line, "Dropping malformed frame");
                return Route::Drop;
            }
        };

        let Some(obj) = json.as_object() else {
            tracing::warn!(frame = line, "Dropping frame that is not a JSON object");
            return Route::Drop;
        };

        let cmd = str_field(obj, "cmd");
        tracing::debug!(
            cmd = cmd.unwrap_or_default(),
            status = str_field(obj, "status").unwrap_or_default(),
            "Received from device"
        );

        match cmd {
            Some("LOGS_DATA") => Route::Publish(InboundEvent::LogsData {
                logs: logs(obj),
                count: count(obj),
            }),
            Some("STORAGE_LOGS_DATA") => Route::Publish(InboundEvent::StorageLogsData {
                logs: logs(obj),
                count: count(obj),
            }),
            Some("SYNC_LOGS_DATA") => Route::Publish(InboundEvent::SyncLogsData {
                logs: logs(obj),
                count: count(obj),
            }),
            Some("ADHERENCE_DATA") => Route::Publish(InboundEvent::AdherenceData {
                data: obj.get("data").cloned().unwrap_or(Value::Null),
            }),
            Some("MEDS_DATA") => Route::Publish(InboundEvent::MedsData {
                medications: array_field(obj, "medications"),
                count: count(obj),
            }),
            Some("LOGS_SENT_CONFIRM") => {
                tracing::info!(count = ?u64_field(obj, "count"), "Alarm logs confirmed by device");
                Route::Publish(InboundEvent::LogsSentConfirm {
                    count: u64_field(obj, "count"),
                    success: bool_field(obj, "success"),
                })
            }
            Some("STORAGE_LOGS_SENT_CONFIRM") => {
                tracing::info!(count = ?u64_field(obj, "count"), "Storage logs confirmed by device");
                Route::Publish(InboundEvent::StorageLogsSentConfirm {
                    count: u64_field(obj, "count"),
                    success: bool_field(obj, "success"),
                })
            }
            Some("SYNC_LOGS_SENT_CONFIRM") => {
                tracing::info!(count = ?u64_field(obj, "count"), "Sync logs confirmed by device");
                Route::Publish(InboundEvent::SyncLogsSentConfirm {
                    count: u64_field(obj, "count"),
                    success: bool_field(obj, "success"),
                })
            }
            Some("ALL_DATA_SENT_CONFIRM") => {
                tracing::info!("All data confirmed by device");
                Route::Publish(InboundEvent::AllDataSentConfirm {
                    status: str_field(obj, "status").map(str::to_string),
                    message: str_field(obj, "message").map(str::to_string),
                    breakdown: obj.get("breakdown").cloned(),
                    items_sent: u64_field(obj, "items_sent"),
                    items_total: u64_field(obj, "items_total"),
                })
            }
            Some("SYNC_RESPONSE") => {
                let response = SyncResponse {
                    accepted: bool_field(obj, "accepted").unwrap_or(false),
                    medication_id: u64_field(obj, "medication_id")
                        .and_then(|id| u32::try_from(id).ok()),
                    message: str_field(obj, "message").map(str::to_string),
                };
                tracing::info!(
                    accepted = response.accepted,
                    medication_id = ?response.medication_id,
                    "Medication sync response"
                );
                Route::Publish(InboundEvent::SyncResponse(response))
            }
            Some("PING") => {
                tracing::debug!("Ping from device, replying with pong");
                Route::Reply(OutboundFrame::pong())
            }
            Some("PONG") => Route::Publish(InboundEvent::Pong),
            other => Self::route_by_status(obj, other, line),
        }
    }

    fn route_by_status(obj: &Map<String, Value>, cmd: Option<&str>, line: &str) -> Route {
        match str_field(obj, "status") {
            Some("success") => Route::Publish(InboundEvent::Success {
                command: cmd.map(str::to_string),
            }),
            Some("error") => Route::Publish(InboundEvent::Error {
                message: str_field(obj, "message").map(str::to_string),
            }),
            Some("pong") => {
                tracing::debug!("Device responded to ping");
                Route::Drop
            }
            _ => {
                tracing::info!(frame = line, "Ignoring unrecognized frame");
                Route::Drop
            }
        }
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn u64_field(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    obj.get(key).and_then(Value::as_u64)
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    obj.get(key).and_then(Value::as_bool)
}

fn array_field(obj: &Map<String, Value>, key: &str) -> Vec<Value> {
    obj.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn count(obj: &Map<String, Value>) -> u64 {
    u64_field(obj, "count").unwrap_or(0)
}

/// Log lists live under `data.logs`
fn logs(obj: &Map<String, Value>) -> Vec<Value> {
    obj.get("data")
        .and_then(Value::as_object)
        .and_then(|data| data.get("logs"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
