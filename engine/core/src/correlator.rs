//! Request-Response Correlator
//!
//! Turns the asynchronous send/publish pair into one awaitable call: send a
//! command, wait for the first event of the expected type.
//!
//! # Settle Paths
//!
//! A pending call settles exactly once, on whichever comes first:
//!
//! ```text
//!   matching event ──► Ok(event)
//!   DISCONNECTED   ──► Err(Disconnected)
//!   deadline       ──► Err(Timeout)
//! ```
//!
//! The settle sender sits in a shared slot and every path `take()`s it, so
//! a late event racing the deadline finds the slot empty and does nothing.
//! The one-shot subscription is dropped when the call returns on any path.
//!
//! Replies carry no correlation id, so at most one call per expected event
//! type may be outstanding. A second call for the same type fails with
//! [`SyncError::RequestInFlight`] before anything is written.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::SyncError;
use crate::protocol::event::{EventType, InboundEvent};
use crate::registry::SubscriberRegistry;

type SettleSlot = Arc<Mutex<Option<oneshot::Sender<Result<InboundEvent, SyncError>>>>>;

/// Pairs outbound commands with their replies
#[derive(Clone, Debug)]
pub struct Correlator {
    registry: SubscriberRegistry,
    in_flight: Arc<DashMap<EventType, Instant>>,
}

impl Correlator {
    /// Create a correlator listening on `registry`
    #[must_use]
    pub fn new(registry: SubscriberRegistry) -> Self {
        Self {
            registry,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Send via `send` and wait for the first `expected` event
    ///
    /// The reply subscription is in place before `send` is polled, so a
    /// reply cannot slip past between the write and the wait. A reply whose
    /// payload declines the request still resolves the call.
    ///
    /// # Errors
    ///
    /// - `RequestInFlight` if a call awaiting `expected` is already pending
    /// - whatever `send` fails with (nothing is awaited in that case)
    /// - `Timeout` if no matching event arrives within `timeout`
    /// - `Disconnected` if the connection is torn down first
    pub async fn call<F>(
        &self,
        expected: EventType,
        timeout: Duration,
        send: F,
    ) -> Result<InboundEvent, SyncError>
    where
        F: Future<Output = Result<(), SyncError>>,
    {
        let _guard = self.claim(expected)?;

        let (tx, rx) = oneshot::channel();
        let slot: SettleSlot = Arc::new(Mutex::new(Some(tx)));

        let settle = Arc::clone(&slot);
        let subscription = self.registry.subscribe(move |event| {
            let outcome = match event.event_type() {
                ty if ty == expected => Ok(event.clone()),
                EventType::Disconnected => Err(SyncError::Disconnected),
                _ => return,
            };
            if let Some(tx) = settle.lock().take() {
                // Receiver gone means the call already returned
                let _ = tx.send(outcome);
            }
        });

        tracing::debug!(expected = %expected, timeout = ?timeout, "Correlated call started");
        let deadline = Instant::now() + timeout;
        send.await?;

        let result = match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SyncError::Disconnected),
            Err(_) => {
                slot.lock().take();
                Err(SyncError::Timeout(timeout))
            }
        };
        drop(subscription);

        match &result {
            Ok(_) => tracing::debug!(expected = %expected, "Correlated call resolved"),
            Err(e) => tracing::warn!(expected = %expected, error = %e, "Correlated call failed"),
        }
        result
    }

    /// Whether a call awaiting `expected` is pending
    #[must_use]
    pub fn is_pending(&self, expected: EventType) -> bool {
        self.in_flight.contains_key(&expected)
    }

    /// Number of pending calls
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    fn claim(&self, expected: EventType) -> Result<InFlightGuard, SyncError> {
        match self.in_flight.entry(expected) {
            Entry::Occupied(entry) => {
                tracing::warn!(
                    expected = %expected,
                    pending_for = ?entry.get().elapsed(),
                    "Rejecting concurrent call for the same reply type"
                );
                Err(SyncError::RequestInFlight(expected))
            }
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                Ok(InFlightGuard {
                    map: Arc::clone(&self.in_flight),
                    key: expected,
                })
            }
        }
    }
}

struct InFlightGuard {
    map: Arc<DashMap<EventType, Instant>>,
    key: EventType,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}
