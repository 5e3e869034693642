//! Feed Status
//!
//! Shared connection-state snapshot for the ingestion path, read by the
//! health endpoint. Written by the feed supervisor and the active session.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::source::FeedSourceId;

/// Coarse connection state of the ingestion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeedConnectionState {
    /// No connection and not currently retrying (startup/shutdown).
    Disconnected = 0,
    /// Between attempts, waiting out backoff.
    Reconnecting = 1,
    /// One live upstream connection.
    Connected = 2,
    /// Both sources exhausted; probing the primary indefinitely.
    Degraded = 3,
}

impl FeedConnectionState {
    /// Get the state name for `/health` and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Reconnecting,
            2 => Self::Connected,
            3 => Self::Degraded,
            _ => Self::Disconnected,
        }
    }
}

/// Lock-free counters and state for the feed, shared with `/health`.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: AtomicU8,
    active_source: AtomicU8,
    reconnect_attempts: AtomicU32,
    failovers: AtomicU64,
    frames_received: AtomicU64,
    quotes_applied: AtomicU64,
    quotes_stale: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl FeedStatus {
    /// Create a fresh status (disconnected, no source).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coarse connection state.
    pub fn set_state(&self, state: FeedConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Current coarse connection state.
    #[must_use]
    pub fn state(&self) -> FeedConnectionState {
        FeedConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Set (or clear) the active upstream source.
    pub fn set_active_source(&self, source: Option<FeedSourceId>) {
        let v = match source {
            None => 0,
            Some(FeedSourceId::Primary) => 1,
            Some(FeedSourceId::Secondary) => 2,
        };
        self.active_source.store(v, Ordering::SeqCst);
    }

    /// The source currently serving quotes, if any.
    #[must_use]
    pub fn active_source(&self) -> Option<FeedSourceId> {
        match self.active_source.load(Ordering::SeqCst) {
            1 => Some(FeedSourceId::Primary),
            2 => Some(FeedSourceId::Secondary),
            _ => None,
        }
    }

    /// Count a connection attempt.
    pub fn increment_reconnects(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
    }

    /// Total connection attempts since startup.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Count a source switch (either direction).
    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::SeqCst);
    }

    /// Total source switches since startup.
    #[must_use]
    pub fn failovers(&self) -> u64 {
        self.failovers.load(Ordering::SeqCst)
    }

    /// Count an inbound frame.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::SeqCst);
    }

    /// Total inbound frames since startup.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::SeqCst)
    }

    /// Count a quote accepted into the cache.
    pub fn record_quote_applied(&self) {
        self.quotes_applied.fetch_add(1, Ordering::SeqCst);
    }

    /// Total quotes accepted since startup.
    #[must_use]
    pub fn quotes_applied(&self) -> u64 {
        self.quotes_applied.load(Ordering::SeqCst)
    }

    /// Count a quote dropped as out-of-order or duplicate.
    pub fn record_quote_stale(&self) {
        self.quotes_stale.fetch_add(1, Ordering::SeqCst);
    }

    /// Total stale-dropped quotes since startup.
    #[must_use]
    pub fn quotes_stale(&self) -> u64 {
        self.quotes_stale.load(Ordering::SeqCst)
    }

    /// Record the most recent connection-level error.
    pub fn set_last_error(&self, error: String) {
        *self.last_error.write() = Some(error);
    }

    /// The most recent connection-level error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}
