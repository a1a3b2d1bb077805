//! Transport Factory
//!
//! Builds the radio adapter named by configuration.

use std::sync::Arc;
use std::time::Duration;

use super::{
    config::{TransportConfig, TransportType},
    traits::{RadioAdapter, TransportError},
};

#[cfg(unix)]
use super::unix_socket::SocketRadio;

/// Create a radio adapter based on configuration
///
/// # Errors
///
/// Returns `TransportError::InvalidState` if the simulated radio is
/// requested. It has no meaning without the test harness that plays the
/// peripherals; construct `SimulatedRadio::new()` directly instead.
pub fn create_radio(config: &TransportConfig) -> Result<Arc<dyn RadioAdapter>, TransportError> {
    match &config.transport {
        TransportType::Simulated => Err(TransportError::InvalidState(
            "Simulated radio must be constructed directly with SimulatedRadio::new()".into(),
        )),

        #[cfg(unix)]
        TransportType::UnixSocket { bridge_dir } => {
            let interval = Duration::from_millis(config.scan_interval_ms.max(1));
            let radio = match bridge_dir {
                Some(dir) => SocketRadio::new(dir.clone(), interval),
                None => SocketRadio::with_default_dir(interval),
            };
            tracing::debug!(bridge_dir = %radio.bridge_dir().display(), "Using bridge transport");
            Ok(Arc::new(radio))
        }
    }
}
