//! Medsync Core - Headless Sync Engine for the Medication Wearable
//!
//! This crate holds the protocol engine that talks to the medication
//! reminder wearable over a low-energy radio link. It knows nothing about
//! screens, storage or the cloud: application code drives it through a
//! [`DeviceSession`] and observes it through subscriber callbacks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Application screens                          │
//! │        subscribe(callback)          request_* / sync_medication   │
//! └───────────────▲─────────────────────────────────┬─────────────────┘
//!                 │ InboundEvent                    │ OutboundCommand
//! ┌───────────────┼─────────────────────────────────┼─────────────────┐
//! │               │          DEVICE SESSION          │                 │
//! │  ┌────────────┴───────┐   ┌───────────────┐      │                 │
//! │  │ SubscriberRegistry │◄──│  Correlator   │◄─────┤                 │
//! │  └────────────▲───────┘   └───────────────┘      │                 │
//! │               │                                  ▼                 │
//! │  ┌────────────┴──────────────────────────────────────────────────┐ │
//! │  │                     ConnectionManager                          │ │
//! │  │  chunks ─► FrameDecoder ─► MessageRouter ─► publish / reply    │ │
//! │  │  command ─► encode ─► write_chunks(mtu) ─► single write path   │ │
//! │  └────────────────────────────┬──────────────────────────────────┘ │
//! └───────────────────────────────┼────────────────────────────────────┘
//!                                 │ RadioAdapter / DeviceLink
//!                   ┌─────────────┴──────────────┐
//!                   │ SocketRadio │ SimulatedRadio│
//!                   └────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use medsync_core::{create_radio, load_config, DeviceSession};
//!
//! let config = load_config()?;
//! let radio = create_radio(&config.transport)?;
//! let session = DeviceSession::new(radio, config.session_config());
//!
//! let _events = session.subscribe(|event| println!("{event:?}"));
//! session.connect("C8:2E:18:4A:01:F2").await?;
//! session.request_all_data().await?;
//! ```
//!
//! # Module Overview
//!
//! - [`connection`]: radio lifecycle, inbound pump and the write path
//! - [`protocol`]: framing, commands, events and routing
//! - [`correlator`]: request/response pairing with deadlines
//! - [`registry`]: subscriber callbacks
//! - [`session`]: the facade tying them together
//! - [`transport`]: radio abstraction (bridge sockets, simulation)
//! - [`config`]: TOML and environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use connection::{ConnectionId, ConnectionManager, ConnectionState, ConnectionStatus};
pub use correlator::Correlator;
pub use error::SyncError;
pub use protocol::{
    EventType, FrameDecoder, InboundEvent, MedicationRecord, MedicationUpdate, MessageRouter,
    NewMedication, OutboundCommand, OutboundFrame, Route, SyncMedication, SyncResponse,
};
pub use registry::{Callback, SubscriberRegistry, Subscription, SubscriptionId};
pub use session::{DeviceSession, ScanStream, SessionConfig};
pub use transport::{
    create_radio, AdapterState, DeviceInfo, DiscoveredDevice, RadioAdapter, SimulatedPeripheral,
    SimulatedRadio, TransportConfig, TransportError, TransportType,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, EngineConfig, EngineToml,
};
