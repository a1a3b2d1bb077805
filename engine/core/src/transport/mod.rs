//! Transport Layer for the Wearable Link
//!
//! Provides abstraction over the radio that reaches the wearable:
//! - `in_process`: simulated radio and peripherals driven over channels
//! - `unix_socket`: a BLE bridge process exposing peripherals as sockets
//!
//! # Design Philosophy
//!
//! The transport moves opaque byte chunks. Framing, routing and
//! correlation live above it, so the engine behaves identically on every
//! radio.

pub mod config;
pub mod factory;
pub mod in_process;
pub mod traits;
#[cfg(unix)]
pub mod unix_socket;

// Re-exports for convenience
pub use config::{TransportConfig, TransportType, DEFAULT_MTU};
pub use factory::create_radio;
pub use in_process::{SimulatedPeripheral, SimulatedRadio};
pub use traits::{
    AdapterState, DeviceConnection, DeviceInfo, DeviceLink, DiscoveredDevice, LinkEvent,
    RadioAdapter, ScanEvent, TransportError,
};

#[cfg(unix)]
pub use config::default_bridge_dir;
#[cfg(unix)]
pub use unix_socket::SocketRadio;
