//! Feed Source Descriptors
//!
//! Exactly two sources exist for the lifetime of the process: primary and
//! secondary. Health fields are mutated only by the failover controller;
//! the feed client records successes (`consecutive_failures` reset,
//! `last_success` refresh) on each parsed frame.

use std::time::Instant;

use parking_lot::RwLock;

use crate::domain::quote::QuoteSource;

/// Identifies one of the two upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedSourceId {
    /// The preferred provider.
    Primary,
    /// The fallback provider.
    Secondary,
}

impl FeedSourceId {
    /// Get the source name for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// The quote source tag stamped onto quotes from this provider.
    #[must_use]
    pub const fn quote_source(self) -> QuoteSource {
        match self {
            Self::Primary => QuoteSource::Primary,
            Self::Secondary => QuoteSource::Secondary,
        }
    }
}

/// Health assessment of a feed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceHealth {
    /// Connected, or not yet tried.
    #[default]
    Healthy,
    /// Recent failures, still considered usable.
    Degraded,
    /// Sustained failures; not the active source.
    Down,
}

impl SourceHealth {
    /// Get the health name for logs and `/health`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

/// State tracked per upstream provider.
#[derive(Debug, Clone)]
pub struct FeedSourceDescriptor {
    /// Which provider this is.
    pub id: FeedSourceId,
    /// Stream endpoint URL.
    pub url: String,
    /// Current health assessment.
    pub health: SourceHealth,
    /// Failures since the last successful frame.
    pub consecutive_failures: u32,
    /// When a frame was last parsed successfully from this source.
    pub last_success: Option<Instant>,
}

impl FeedSourceDescriptor {
    fn new(id: FeedSourceId, url: String) -> Self {
        Self {
            id,
            url,
            health: SourceHealth::default(),
            consecutive_failures: 0,
            last_success: None,
        }
    }
}

/// The two descriptors, shared between the feed client (success recording)
/// and the failover controller (health decisions).
#[derive(Debug)]
pub struct SourceDescriptors {
    primary: RwLock<FeedSourceDescriptor>,
    secondary: RwLock<FeedSourceDescriptor>,
}

impl SourceDescriptors {
    /// Create descriptors for the two configured endpoints.
    #[must_use]
    pub fn new(primary_url: String, secondary_url: String) -> Self {
        Self {
            primary: RwLock::new(FeedSourceDescriptor::new(FeedSourceId::Primary, primary_url)),
            secondary: RwLock::new(FeedSourceDescriptor::new(
                FeedSourceId::Secondary,
                secondary_url,
            )),
        }
    }

    fn slot(&self, id: FeedSourceId) -> &RwLock<FeedSourceDescriptor> {
        match id {
            FeedSourceId::Primary => &self.primary,
            FeedSourceId::Secondary => &self.secondary,
        }
    }

    /// Snapshot of one descriptor.
    #[must_use]
    pub fn get(&self, id: FeedSourceId) -> FeedSourceDescriptor {
        self.slot(id).read().clone()
    }

    /// Endpoint URL for one source.
    #[must_use]
    pub fn url(&self, id: FeedSourceId) -> String {
        self.slot(id).read().url.clone()
    }

    /// Record a successfully parsed frame: failures reset, `last_success`
    /// refreshed. Called by the feed client on the ingest path.
    pub fn record_success(&self, id: FeedSourceId) {
        self.record_success_at(id, Instant::now());
    }

    pub(crate) fn record_success_at(&self, id: FeedSourceId, now: Instant) {
        let mut d = self.slot(id).write();
        d.consecutive_failures = 0;
        d.last_success = Some(now);
    }

    /// Record a connection-level failure. Returns the new consecutive count.
    pub fn record_failure(&self, id: FeedSourceId) -> u32 {
        let mut d = self.slot(id).write();
        d.consecutive_failures = d.consecutive_failures.saturating_add(1);
        d.consecutive_failures
    }

    /// Set the health assessment. Only the failover controller calls this.
    pub fn set_health(&self, id: FeedSourceId, health: SourceHealth) {
        self.slot(id).write().health = health;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors() -> SourceDescriptors {
        SourceDescriptors::new(
            "wss://primary.example/stream".to_string(),
            "wss://secondary.example/stream".to_string(),
        )
    }

    #[test]
    fn initial_state() {
        let descs = descriptors();
        let primary = descs.get(FeedSourceId::Primary);
        assert_eq!(primary.health, SourceHealth::Healthy);
        assert_eq!(primary.consecutive_failures, 0);
        assert!(primary.last_success.is_none());
    }

    #[test]
    fn failures_accumulate_and_reset_on_success() {
        let descs = descriptors();

        assert_eq!(descs.record_failure(FeedSourceId::Primary), 1);
        assert_eq!(descs.record_failure(FeedSourceId::Primary), 2);

        descs.record_success(FeedSourceId::Primary);
        let primary = descs.get(FeedSourceId::Primary);
        assert_eq!(primary.consecutive_failures, 0);
        assert!(primary.last_success.is_some());
    }

    #[test]
    fn sources_are_tracked_independently() {
        let descs = descriptors();
        descs.record_failure(FeedSourceId::Primary);
        assert_eq!(descs.get(FeedSourceId::Secondary).consecutive_failures, 0);
    }

    #[test]
    fn health_is_settable_per_source() {
        let descs = descriptors();
        descs.set_health(FeedSourceId::Primary, SourceHealth::Down);
        assert_eq!(descs.get(FeedSourceId::Primary).health, SourceHealth::Down);
        assert_eq!(
            descs.get(FeedSourceId::Secondary).health,
            SourceHealth::Healthy
        );
    }
}
