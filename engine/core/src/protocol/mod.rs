//! Wearable Wire Protocol
//!
//! Everything between raw notification bytes and typed values:
//!
//! - `frame`: newline framing, streaming decoder, MTU chunking
//! - `command`: outbound commands and their payload types
//! - `event`: inbound events as subscribers see them
//! - `router`: classification of decoded lines into events

pub mod command;
pub mod event;
pub mod frame;
pub mod router;

pub use command::{
    parse_reminder_time, MedicationRecord, MedicationUpdate, NewMedication, OutboundCommand,
    OutboundFrame, StatusReply, SyncMedication,
};
pub use event::{EventType, InboundEvent, SyncResponse};
pub use frame::{encode, write_chunks, FrameDecoder};
pub use router::{MessageRouter, Route};
