//! Broadcast Loop
//!
//! On a fixed interval, takes one snapshot of the quote cache and fans the
//! matching subset out to every subscriber. All subscribers in a pass see
//! the same snapshot. A slow or dead subscriber affects only itself: its
//! send times out and it is unregistered, while the rest of the pass
//! continues.
//!
//! The idle-subscriber sweep runs on the same tick, so keep-alive handling
//! needs no timer of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::QuoteCache;
use crate::infrastructure::metrics;
use crate::infrastructure::subscribers::protocol::ServerMessage;
use crate::infrastructure::subscribers::registry::{SubscriberId, SubscriberRegistry};

/// Tuning for the broadcast loop.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Time between fan-out passes.
    pub interval: Duration,
    /// How long one subscriber's send may block before it is dropped.
    pub send_timeout: Duration,
    /// Idle window after which a silent subscriber is removed.
    pub subscriber_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            send_timeout: Duration::from_millis(250),
            subscriber_timeout: Duration::from_secs(60),
        }
    }
}

/// Periodic cache-to-subscribers fan-out.
pub struct BroadcastLoop {
    cache: Arc<QuoteCache>,
    registry: Arc<SubscriberRegistry>,
    config: BroadcastConfig,
    cancel: CancellationToken,
}

impl BroadcastLoop {
    /// Create a loop broadcasting `cache` snapshots to `registry`.
    #[must_use]
    pub const fn new(
        cache: Arc<QuoteCache>,
        registry: Arc<SubscriberRegistry>,
        config: BroadcastConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            registry,
            config,
            cancel,
        }
    }

    /// Run until shutdown.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("broadcast loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One fan-out pass: sweep idle subscribers, snapshot the cache, and
    /// send each subscriber its filtered subset.
    pub async fn tick(&self) {
        let swept = self.registry.sweep_idle(self.config.subscriber_timeout);
        if swept > 0 {
            metrics::record_subscribers_dropped("idle", swept);
        }

        let snapshot = self.cache.snapshot();
        if snapshot.is_empty() {
            return;
        }

        // Collect the outgoing sends under the registry read lock, then
        // perform them without holding it.
        let mut outgoing = Vec::new();
        self.registry.for_each(|id, handle, filter| {
            let matching: Vec<&crate::domain::quote::Quote> = snapshot
                .values()
                .filter(|q| filter.matches(&q.symbol))
                .collect();

            if let Some(frame) = ServerMessage::price_update(&matching) {
                outgoing.push((id, handle.frames.clone(), frame));
            }
        });

        let mut sent = 0_u64;
        for (id, tx, frame) in outgoing {
            match tx.send_timeout(frame, self.config.send_timeout).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    self.drop_subscriber(id, &e);
                }
            }
        }

        if sent > 0 {
            metrics::record_broadcast_frames(sent);
        }
    }

    fn drop_subscriber(
        &self,
        id: SubscriberId,
        error: &tokio::sync::mpsc::error::SendTimeoutError<ServerMessage>,
    ) {
        let reason = match error {
            tokio::sync::mpsc::error::SendTimeoutError::Timeout(_) => "slow",
            tokio::sync::mpsc::error::SendTimeoutError::Closed(_) => "closed",
        };
        tracing::warn!(subscriber_id = id, reason, "dropping subscriber");
        metrics::record_subscribers_dropped(reason, 1);
        self.registry.unregister(id);
    }
}
