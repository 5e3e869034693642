//! Subscriber Registry
//!
//! Tracks every connected subscriber: its outbound frame channel, its symbol
//! filter, and when it was last heard from. The broadcast loop iterates the
//! registry each tick; connection tasks register on handshake and are
//! unregistered either by their own exit path or by the registry when a send
//! fails or the subscriber goes idle.
//!
//! Unregistration is idempotent, so the connection task and the broadcast
//! loop can race to remove the same subscriber safely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::SymbolFilter;
use crate::infrastructure::subscribers::protocol::ServerMessage;

/// Registry-assigned subscriber identifier, unique for the process lifetime.
pub type SubscriberId = u64;

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The subscriber's channel was already closed at registration time.
    #[error("subscriber channel closed before registration")]
    ChannelClosed,
}

/// One connected subscriber's registry entry.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    /// Outbound frames to the connection task.
    pub frames: mpsc::Sender<ServerMessage>,
    /// Cancels the connection task.
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct SubscriberRecord {
    handle: SubscriberHandle,
    filter: SymbolFilter,
    last_activity: Instant,
}

/// Shared registry of connected subscribers.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, SubscriberRecord>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with its initial filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame channel is already closed.
    pub fn register(
        &self,
        handle: SubscriberHandle,
        filter: SymbolFilter,
    ) -> Result<SubscriberId, RegistryError> {
        if handle.frames.is_closed() {
            return Err(RegistryError::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().insert(
            id,
            SubscriberRecord {
                handle,
                filter,
                last_activity: Instant::now(),
            },
        );

        tracing::debug!(subscriber_id = id, "subscriber registered");
        Ok(id)
    }

    /// Remove a subscriber and cancel its connection task. Idempotent.
    pub fn unregister(&self, id: SubscriberId) {
        if let Some(record) = self.subscribers.write().remove(&id) {
            record.handle.cancel.cancel();
            tracing::debug!(subscriber_id = id, "subscriber unregistered");
        }
    }

    /// Replace a subscriber's filter. No-op if the subscriber is gone.
    pub fn update_filter(&self, id: SubscriberId, filter: SymbolFilter) {
        if let Some(record) = self.subscribers.write().get_mut(&id) {
            record.filter = filter;
            record.last_activity = Instant::now();
        }
    }

    /// Mark a subscriber as recently active.
    pub fn touch(&self, id: SubscriberId) {
        if let Some(record) = self.subscribers.write().get_mut(&id) {
            record.last_activity = Instant::now();
        }
    }

    /// Call `f` for every registered subscriber, over a stable snapshot of
    /// the membership taken at the start of the pass.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(SubscriberId, &SubscriberHandle, &SymbolFilter),
    {
        let guard = self.subscribers.read();
        for (id, record) in guard.iter() {
            f(*id, &record.handle, &record.filter);
        }
    }

    /// Remove every subscriber idle longer than `timeout`, cancelling their
    /// connection tasks. Returns how many were removed.
    pub fn sweep_idle(&self, timeout: std::time::Duration) -> usize {
        self.sweep_idle_at(timeout, Instant::now())
    }

    fn sweep_idle_at(&self, timeout: std::time::Duration, now: Instant) -> usize {
        let mut guard = self.subscribers.write();
        let before = guard.len();

        guard.retain(|id, record| {
            if now.duration_since(record.last_activity) <= timeout {
                return true;
            }
            record.handle.cancel.cancel();
            tracing::info!(subscriber_id = id, "dropping idle subscriber");
            false
        });

        before - guard.len()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether the registry has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}
