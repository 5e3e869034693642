//! Source Failover Integration Tests
//!
//! Drives the feed supervisor with a scripted connector to exercise the
//! primary-to-secondary switch and the make-before-break recovery probe.
//! Each scripted session writes a quote tagged with its source into a real
//! cache, so the tests observe both the shared feed status (the way the
//! health endpoint does) and the data path (the way the broadcast loop
//! does).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use quote_hub::{
    BackoffConfig, FailoverConfig, FailoverController, FeedClientError, FeedConnector, FeedHandle,
    FeedSourceId, FeedStatus, FeedSupervisor, Quote, QuoteCache, QuoteSource, SessionEnd,
    SourceDescriptors,
};

const SYMBOL: &str = "BTC";

/// Connector whose primary succeeds or fails on demand. Each session writes
/// one source-tagged quote into the cache on connect, then stays open until
/// its cancellation token fires, like the real client's.
struct ScriptedConnector {
    cache: Arc<QuoteCache>,
    primary_up: AtomicBool,
    primary_attempts: AtomicU32,
    secondary_attempts: AtomicU32,
    next_ts: AtomicI64,
}

impl ScriptedConnector {
    fn new(cache: Arc<QuoteCache>, primary_up: bool) -> Self {
        Self {
            cache,
            primary_up: AtomicBool::new(primary_up),
            primary_attempts: AtomicU32::new(0),
            secondary_attempts: AtomicU32::new(0),
            next_ts: AtomicI64::new(1),
        }
    }

    fn open_session(&self, source: FeedSourceId) -> FeedHandle {
        // Later sessions get later timestamps so the cache accepts them.
        let ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
        self.cache.set(Quote::new(
            SYMBOL.to_string(),
            Decimal::from_str("50000").unwrap(),
            Utc.timestamp_opt(ts, 0).unwrap(),
            source.quote_source(),
        ));

        let cancel = CancellationToken::new();
        let (end_tx, end_rx) = oneshot::channel();
        let token = cancel.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            let _ = end_tx.send(SessionEnd::Cancelled);
        });
        FeedHandle::new(cancel, end_rx)
    }
}

#[async_trait]
impl FeedConnector for ScriptedConnector {
    async fn start(&self, source: FeedSourceId) -> Result<FeedHandle, FeedClientError> {
        match source {
            FeedSourceId::Primary => {
                self.primary_attempts.fetch_add(1, Ordering::SeqCst);
                if self.primary_up.load(Ordering::SeqCst) {
                    Ok(self.open_session(source))
                } else {
                    Err(FeedClientError::ConnectionClosed)
                }
            }
            FeedSourceId::Secondary => {
                self.secondary_attempts.fetch_add(1, Ordering::SeqCst);
                Ok(self.open_session(source))
            }
        }
    }
}

fn test_failover_config() -> FailoverConfig {
    FailoverConfig {
        failure_threshold: 3,
        probe_interval: Duration::from_secs(5),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..FailoverConfig::default()
    }
}

struct Harness {
    cache: Arc<QuoteCache>,
    connector: Arc<ScriptedConnector>,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn spawn_supervisor(primary_up: bool) -> Harness {
    // Generous TTL so freshness only lapses if the feed truly stops.
    let cache = Arc::new(QuoteCache::new(Duration::from_secs(3600)));
    let connector = Arc::new(ScriptedConnector::new(Arc::clone(&cache), primary_up));
    let descriptors = Arc::new(SourceDescriptors::new(
        "wss://primary.test/stream".to_string(),
        "wss://secondary.test/stream".to_string(),
    ));
    let status = Arc::new(FeedStatus::new());
    let cancel = CancellationToken::new();
    let controller = FailoverController::new(test_failover_config(), descriptors);
    let supervisor = FeedSupervisor::new(
        Arc::clone(&connector),
        controller,
        Arc::clone(&status),
        cancel.clone(),
    );
    let task = tokio::spawn(supervisor.run());
    Harness {
        cache,
        connector,
        status,
        cancel,
        task,
    }
}

async fn wait_for_source(status: &FeedStatus, want: FeedSourceId) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while status.active_source() != Some(want) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never connected to {}", want.as_str()));
}

/// Like [`wait_for_source`], but asserts the cache keeps at least one fresh
/// quote on every poll of the switchover.
async fn wait_for_source_without_gap(status: &FeedStatus, cache: &QuoteCache, want: FeedSourceId) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while status.active_source() != Some(want) {
            assert!(
                cache.fresh_len() > 0,
                "cache went empty during the switch to {}",
                want.as_str()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never connected to {}", want.as_str()));
}

#[tokio::test(start_paused = true)]
async fn primary_failures_switch_to_secondary() {
    let h = spawn_supervisor(false);

    wait_for_source(&h.status, FeedSourceId::Secondary).await;

    // The primary was given its full failure budget before the switch.
    assert_eq!(h.connector.primary_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(h.connector.secondary_attempts.load(Ordering::SeqCst), 1);

    // Quotes flow through the cache tagged with the active source.
    let quote = h.cache.get(SYMBOL).expect("secondary session wrote a quote");
    assert_eq!(quote.source, QuoteSource::Secondary);

    h.cancel.cancel();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn probe_switches_back_when_primary_recovers() {
    let h = spawn_supervisor(false);

    wait_for_source(&h.status, FeedSourceId::Secondary).await;
    assert_eq!(
        h.cache.get(SYMBOL).expect("a cached quote").source,
        QuoteSource::Secondary
    );

    // Primary comes back; the next probe should find it and switch over.
    // The probe connects before the secondary is torn down, so the cache
    // must never be without a fresh quote in between.
    h.connector.primary_up.store(true, Ordering::SeqCst);
    wait_for_source_without_gap(&h.status, &h.cache, FeedSourceId::Primary).await;

    assert_eq!(h.status.failovers(), 1);
    assert_eq!(
        h.cache.get(SYMBOL).expect("a cached quote").source,
        QuoteSource::Primary
    );

    h.cancel.cancel();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_supervisor_cleanly() {
    let h = spawn_supervisor(true);

    wait_for_source(&h.status, FeedSourceId::Primary).await;

    h.cancel.cancel();
    h.task.await.unwrap();
    assert!(h.status.active_source().is_none());
}
