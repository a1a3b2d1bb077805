//! In-Process Transport
//!
//! A channel-backed radio for tests and embedders. No hardware, no IPC.
//!
//! # Usage
//!
//! ```ignore
//! let radio = SimulatedRadio::new();
//! let watch = radio.add_peripheral("AA:01", Some("PillWatch"));
//!
//! // Hand the radio to the engine
//! let session = DeviceSession::new(Arc::new(radio.clone()), SessionConfig::default());
//! session.connect("AA:01").await?;
//!
//! // Play the device's side of the conversation
//! watch.notify_line(r#"{"cmd":"PONG"}"#).await?;
//! let written = watch.next_written_line().await;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::traits::{
    AdapterState, DeviceConnection, DeviceInfo, DeviceLink, DiscoveredDevice, LinkEvent,
    RadioAdapter, ScanEvent, TransportError,
};

/// Capacity of scan and link event channels
const CHANNEL_CAPACITY: usize = 64;

/// Largest MTU a simulated peripheral accepts unless told otherwise
const DEFAULT_PERIPHERAL_MTU: u16 = 512;

/// Signal strength reported for simulated advertisements
const DEFAULT_RSSI: i16 = -60;

struct RadioState {
    adapter: AdapterState,
    permissions: bool,
    peripherals: HashMap<String, Arc<Peripheral>>,
    scan: Option<mpsc::Sender<ScanEvent>>,
}

/// Simulated central radio
#[derive(Clone)]
pub struct SimulatedRadio {
    inner: Arc<Mutex<RadioState>>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    /// Create a powered-on radio with permissions granted and no peripherals
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RadioState {
                adapter: AdapterState::PoweredOn,
                permissions: true,
                peripherals: HashMap::new(),
                scan: None,
            })),
        }
    }

    /// Register a peripheral in range
    ///
    /// If a scan is running the peripheral is announced immediately.
    pub fn add_peripheral(&self, id: &str, name: Option<&str>) -> SimulatedPeripheral {
        let peripheral = Arc::new(Peripheral {
            info: DeviceInfo {
                id: id.to_string(),
                name: name.map(str::to_string),
            },
            radio: Arc::downgrade(&self.inner),
            state: Mutex::new(PeripheralState::default()),
            written_signal: Notify::new(),
        });
        self.inner
            .lock()
            .peripherals
            .insert(id.to_string(), Arc::clone(&peripheral));

        let handle = SimulatedPeripheral { inner: peripheral };
        handle.advertise();
        handle
    }

    /// Change adapter power state
    ///
    /// Leaving `PoweredOn` drops every live link, as a real stack would.
    pub fn set_state(&self, state: AdapterState) {
        let peripherals: Vec<Arc<Peripheral>> = {
            let mut inner = self.inner.lock();
            inner.adapter = state;
            if !state.is_powered_on() {
                inner.scan = None;
            }
            inner.peripherals.values().cloned().collect()
        };
        if !state.is_powered_on() {
            for peripheral in peripherals {
                peripheral.drop_link(Some("adapter powered off"));
            }
        }
    }

    /// Grant or revoke radio permissions
    pub fn set_permissions(&self, granted: bool) {
        self.inner.lock().permissions = granted;
    }

    /// Deliver a scan failure to the running scan, ending it
    pub fn fail_scan(&self, reason: &str) {
        if let Some(tx) = self.inner.lock().scan.take() {
            let _ = tx.try_send(ScanEvent::Failed(reason.to_string()));
        }
    }

    /// Whether a scan is running
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.inner
            .lock()
            .scan
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl RadioAdapter for SimulatedRadio {
    async fn permissions_granted(&self) -> bool {
        self.inner.lock().permissions
    }

    async fn state(&self) -> AdapterState {
        self.inner.lock().adapter
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<ScanEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let peripherals: Vec<Arc<Peripheral>> = {
            let mut inner = self.inner.lock();
            if !inner.adapter.is_powered_on() {
                return Err(TransportError::AdapterUnavailable(format!(
                    "{:?}",
                    inner.adapter
                )));
            }
            inner.scan = Some(tx.clone());
            inner.peripherals.values().cloned().collect()
        };
        for peripheral in peripherals {
            let _ = tx.try_send(ScanEvent::Found(peripheral.advertisement()));
        }
        Ok(rx)
    }

    async fn stop_scan(&self) {
        self.inner.lock().scan = None;
    }

    async fn connect(
        &self,
        device_id: &str,
        requested_mtu: u16,
    ) -> Result<DeviceConnection, TransportError> {
        let peripheral = {
            let inner = self.inner.lock();
            if !inner.adapter.is_powered_on() {
                return Err(TransportError::AdapterUnavailable(format!(
                    "{:?}",
                    inner.adapter
                )));
            }
            inner.peripherals.get(device_id).cloned().ok_or_else(|| {
                TransportError::ConnectionFailed(format!("Device {device_id} not in range"))
            })?
        };

        let (generation, events, mtu, unresponsive) = {
            let mut state = peripheral.state.lock();
            state.connect_attempts += 1;
            if let Some(reason) = &state.reject {
                return Err(TransportError::ConnectionFailed(reason.clone()));
            }
            if state.unresponsive {
                (0, None, 0, true)
            } else {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                state.generation += 1;
                state.live = Some(LiveLink {
                    generation: state.generation,
                    events: tx,
                });
                let mtu = requested_mtu.min(state.max_mtu.unwrap_or(DEFAULT_PERIPHERAL_MTU));
                (state.generation, Some(rx), mtu, false)
            }
        };

        if unresponsive {
            // Handshake never completes; the caller's timeout decides
            std::future::pending::<()>().await;
        }
        let events = events.ok_or(TransportError::ConnectionClosed)?;

        Ok(DeviceConnection {
            device: peripheral.info.clone(),
            link: Arc::new(SimulatedLink {
                peripheral,
                generation,
                mtu,
            }),
            events,
        })
    }
}

struct LiveLink {
    generation: u64,
    events: mpsc::Sender<LinkEvent>,
}

#[derive(Default)]
struct PeripheralState {
    live: Option<LiveLink>,
    generation: u64,
    reject: Option<String>,
    unresponsive: bool,
    max_mtu: Option<u16>,
    connect_attempts: usize,
    written: Vec<u8>,
    chunk_sizes: Vec<usize>,
}

struct Peripheral {
    info: DeviceInfo,
    radio: Weak<Mutex<RadioState>>,
    state: Mutex<PeripheralState>,
    written_signal: Notify,
}

impl Peripheral {
    fn advertisement(&self) -> DiscoveredDevice {
        DiscoveredDevice {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            rssi: Some(DEFAULT_RSSI),
        }
    }

    fn drop_link(&self, reason: Option<&str>) -> bool {
        let live = self.state.lock().live.take();
        match live {
            Some(link) => {
                if let Some(reason) = reason {
                    let _ = link.events.try_send(LinkEvent::Dropped {
                        reason: Some(reason.to_string()),
                    });
                }
                true
            }
            None => false,
        }
    }
}

/// The device side of a simulated peripheral
///
/// Cloneable handle used to play the wearable in tests.
#[derive(Clone)]
pub struct SimulatedPeripheral {
    inner: Arc<Peripheral>,
}

impl SimulatedPeripheral {
    /// Peripheral id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.info.id
    }

    /// Whether a central currently holds a link
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().live.is_some()
    }

    /// Number of connect attempts seen, successful or not
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.state.lock().connect_attempts
    }

    /// Send one notification chunk to the connected central
    ///
    /// # Errors
    ///
    /// `InvalidState` when no central is connected, `ConnectionClosed` when
    /// the central has stopped reading.
    pub async fn notify(&self, chunk: impl AsRef<[u8]>) -> Result<(), TransportError> {
        let tx = self
            .inner
            .state
            .lock()
            .live
            .as_ref()
            .map(|live| live.events.clone())
            .ok_or_else(|| TransportError::InvalidState("Peripheral not connected".to_string()))?;
        tx.send(LinkEvent::Notification(chunk.as_ref().to_vec()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send one complete frame (`line` plus the delimiter) as a single chunk
    ///
    /// # Errors
    ///
    /// Same as [`SimulatedPeripheral::notify`].
    pub async fn notify_line(&self, line: &str) -> Result<(), TransportError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.notify(bytes).await
    }

    /// Device powers off: the central sees a transport drop
    pub fn power_off(&self) {
        if self.inner.drop_link(Some("peripheral powered off")) {
            tracing::debug!(device_id = %self.inner.info.id, "Simulated peripheral powered off");
        }
    }

    /// Close the link without any drop notice
    pub fn close_link(&self) {
        self.inner.drop_link(None);
    }

    /// Refuse future connections with `reason`, or accept them again with `None`
    pub fn reject_connections(&self, reason: Option<&str>) {
        self.inner.state.lock().reject = reason.map(str::to_string);
    }

    /// Never complete future connection handshakes
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.inner.state.lock().unresponsive = unresponsive;
    }

    /// Cap the MTU this peripheral negotiates
    pub fn set_max_mtu(&self, mtu: u16) {
        self.inner.state.lock().max_mtu = Some(mtu);
    }

    /// Announce this peripheral to a running scan
    pub fn advertise(&self) {
        let Some(radio) = self.inner.radio.upgrade() else {
            return;
        };
        let scan = radio.lock().scan.clone();
        if let Some(tx) = scan {
            let _ = tx.try_send(ScanEvent::Found(self.inner.advertisement()));
        }
    }

    /// Complete lines written by the central so far, consuming them
    #[must_use]
    pub fn written_lines(&self) -> Vec<String> {
        let mut state = self.inner.state.lock();
        let mut lines = Vec::new();
        while let Some(line) = take_line(&mut state.written) {
            lines.push(line);
        }
        lines
    }

    /// Wait for the next complete line written by the central
    pub async fn next_written_line(&self) -> String {
        loop {
            let notified = self.inner.written_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(line) = take_line(&mut self.inner.state.lock().written) {
                return line;
            }
            notified.await;
        }
    }

    /// Sizes of every write the central made, in order
    #[must_use]
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.inner.state.lock().chunk_sizes.clone()
    }
}

fn take_line(written: &mut Vec<u8>) -> Option<String> {
    let end = written.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = written.drain(..=end).collect();
    Some(String::from_utf8_lossy(&line[..end]).into_owned())
}

struct SimulatedLink {
    peripheral: Arc<Peripheral>,
    generation: u64,
    mtu: u16,
}

impl SimulatedLink {
    fn is_current(state: &PeripheralState, generation: u64) -> bool {
        state
            .live
            .as_ref()
            .is_some_and(|live| live.generation == generation)
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn write(&self, chunk: &[u8]) -> Result<(), TransportError> {
        {
            let mut state = self.peripheral.state.lock();
            if !Self::is_current(&state, self.generation) {
                return Err(TransportError::ConnectionClosed);
            }
            state.written.extend_from_slice(chunk);
            state.chunk_sizes.push(chunk.len());
        }
        self.peripheral.written_signal.notify_waiters();
        Ok(())
    }

    async fn cancel(&self) -> Result<(), TransportError> {
        let mut state = self.peripheral.state.lock();
        if Self::is_current(&state, self.generation) {
            state.live = None;
        }
        Ok(())
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_scan_announces_peripherals() {
        let radio = SimulatedRadio::new();
        radio.add_peripheral("AA:01", Some("PillWatch"));

        let mut rx = radio.start_scan().await.unwrap();
        match rx.recv().await {
            Some(ScanEvent::Found(device)) => {
                assert_eq!(device.id, "AA:01");
                assert_eq!(device.name.as_deref(), Some("PillWatch"));
            }
            other => panic!("unexpected scan event: {other:?}"),
        }

        radio.add_peripheral("AA:02", None);
        assert!(matches!(rx.recv().await, Some(ScanEvent::Found(d)) if d.id == "AA:02"));

        radio.fail_scan("radio reset");
        assert!(matches!(rx.recv().await, Some(ScanEvent::Failed(r)) if r == "radio reset"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_scan_requires_power() {
        let radio = SimulatedRadio::new();
        radio.set_state(AdapterState::PoweredOff);
        assert!(matches!(
            radio.start_scan().await,
            Err(TransportError::AdapterUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_roundtrip() {
        let radio = SimulatedRadio::new();
        let watch = radio.add_peripheral("AA:01", Some("PillWatch"));

        let mut conn = radio.connect("AA:01", 512).await.unwrap();
        assert_eq!(conn.device.id, "AA:01");
        assert!(watch.is_connected());

        watch.notify_line(r#"{"cmd":"PONG"}"#).await.unwrap();
        assert_eq!(
            conn.events.recv().await,
            Some(LinkEvent::Notification(b"{\"cmd\":\"PONG\"}\n".to_vec()))
        );

        conn.link.write(b"{\"cmd\":").await.unwrap();
        assert!(watch.written_lines().is_empty());
        conn.link.write(b"\"PING\"}\n").await.unwrap();
        assert_eq!(watch.next_written_line().await, r#"{"cmd":"PING"}"#);
        assert_eq!(watch.chunk_sizes(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_negotiated_mtu() {
        let radio = SimulatedRadio::new();
        let watch = radio.add_peripheral("AA:01", Some("PillWatch"));
        watch.set_max_mtu(185);

        let conn = radio.connect("AA:01", 512).await.unwrap();
        assert_eq!(conn.link.mtu(), 185);
    }

    #[tokio::test]
    async fn test_connect_failures() {
        let radio = SimulatedRadio::new();
        let watch = radio.add_peripheral("AA:01", Some("PillWatch"));

        assert!(matches!(
            radio.connect("ZZ:99", 512).await,
            Err(TransportError::ConnectionFailed(_))
        ));

        watch.reject_connections(Some("pairing rejected"));
        match radio.connect("AA:01", 512).await {
            Err(TransportError::ConnectionFailed(reason)) => assert_eq!(reason, "pairing rejected"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(watch.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_power_off_drops_link() {
        let radio = SimulatedRadio::new();
        let watch = radio.add_peripheral("AA:01", Some("PillWatch"));
        let mut conn = radio.connect("AA:01", 512).await.unwrap();

        watch.power_off();
        assert!(matches!(
            conn.events.recv().await,
            Some(LinkEvent::Dropped { reason: Some(_) })
        ));
        assert!(conn.events.recv().await.is_none());
        assert!(matches!(
            conn.link.write(b"x").await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancel_closes_events() {
        let radio = SimulatedRadio::new();
        let watch = radio.add_peripheral("AA:01", Some("PillWatch"));
        let mut conn = radio.connect("AA:01", 512).await.unwrap();

        conn.link.cancel().await.unwrap();
        assert!(!watch.is_connected());
        assert!(conn.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stale_link_cannot_cancel_new_connection() {
        let radio = SimulatedRadio::new();
        let watch = radio.add_peripheral("AA:01", Some("PillWatch"));
        let old = radio.connect("AA:01", 512).await.unwrap();
        let _new = radio.connect("AA:01", 512).await.unwrap();

        old.link.cancel().await.unwrap();
        assert!(watch.is_connected());
    }
}
