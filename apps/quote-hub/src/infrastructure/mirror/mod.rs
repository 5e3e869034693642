//! Distributed Cache Mirror
//!
//! Best-effort write-through of accepted quotes to Redis so that sibling
//! processes (and operators with `redis-cli`) can read recent prices. The
//! mirror is fed asynchronously from the cache through a bounded channel;
//! the hot ingestion path never waits on Redis, and mirror failures never
//! affect the in-process cache.
//!
//! Keys are `{prefix}{symbol}` with the quote serialized as JSON and a TTL
//! matching the cache's freshness window, so Redis expires entries on the
//! same schedule the local cache does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::domain::quote::{Quote, Symbol};
use crate::infrastructure::metrics;

/// Errors from the mirror store.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Redis command or connection error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Quote could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Port for the external quote store. The writer task is generic over this
/// so tests can capture writes in memory.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Store one quote with the given expiry.
    async fn store(&self, quote: &Quote, ttl: Duration) -> Result<(), MirrorError>;
}

/// Redis-backed [`MirrorStore`].
///
/// The multiplexed connection is established lazily on first write and
/// dropped on any error, so the next write reconnects.
pub struct RedisMirror {
    client: redis::Client,
    key_prefix: String,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisMirror {
    /// Create a mirror for the given Redis URL and key prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed. No connection is
    /// attempted here.
    pub fn new(redis_url: &str, key_prefix: String) -> Result<Self, MirrorError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            key_prefix,
            conn: Mutex::new(None),
        })
    }

    fn key_for(&self, symbol: &str) -> String {
        format!("{}{symbol}", self.key_prefix)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, MirrorError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn invalidate_connection(&self) {
        *self.conn.lock().await = None;
    }

    /// Read a mirrored quote back. Not used on the hot path; exists for
    /// sibling processes and operational tooling.
    ///
    /// # Errors
    ///
    /// Returns an error on connection failure or if the stored payload does
    /// not deserialize.
    pub async fn fetch(&self, symbol: &Symbol) -> Result<Option<Quote>, MirrorError> {
        let mut conn = self.connection().await?;
        let result: Result<Option<String>, redis::RedisError> = redis::cmd("GET")
            .arg(self.key_for(symbol))
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(json)) => Ok(Some(serde_json::from_str(&json)?)),
            Ok(None) => Ok(None),
            Err(e) => {
                self.invalidate_connection().await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl MirrorStore for RedisMirror {
    async fn store(&self, quote: &Quote, ttl: Duration) -> Result<(), MirrorError> {
        let payload = serde_json::to_string(quote)?;
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.connection().await?;
        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(self.key_for(&quote.symbol))
            .arg(payload)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await;

        if result.is_err() {
            self.invalidate_connection().await;
        }
        result.map_err(MirrorError::from)
    }
}

/// Drains accepted quotes from the cache's mirror channel into a store.
///
/// Failures are logged and counted, never propagated; a quote that cannot
/// be mirrored is simply absent from Redis until the symbol next ticks.
pub struct MirrorWriter<S> {
    store: Arc<S>,
    rx: mpsc::Receiver<Quote>,
    ttl: Duration,
    cancel: CancellationToken,
}

impl<S: MirrorStore> MirrorWriter<S> {
    /// Create a writer draining `rx` into `store`.
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        rx: mpsc::Receiver<Quote>,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            rx,
            ttl,
            cancel,
        }
    }

    /// Run until shutdown or until the sending side is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("mirror writer shutting down");
                    return;
                }
                quote = self.rx.recv() => {
                    let Some(quote) = quote else {
                        tracing::info!("mirror channel closed");
                        return;
                    };
                    if let Err(e) = self.store.store(&quote, self.ttl).await {
                        metrics::record_mirror_error();
                        tracing::warn!(
                            symbol = %quote.symbol,
                            error = %e,
                            "failed to mirror quote"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex as SyncMutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::quote::QuoteSource;

    struct RecordingStore {
        written: SyncMutex<Vec<(Symbol, Duration)>>,
        fail: bool,
    }

    impl RecordingStore {
        fn new(fail: bool) -> Self {
            Self {
                written: SyncMutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl MirrorStore for RecordingStore {
        async fn store(&self, quote: &Quote, ttl: Duration) -> Result<(), MirrorError> {
            if self.fail {
                return Err(MirrorError::Serialize(serde::de::Error::custom(
                    "injected failure",
                )));
            }
            self.written.lock().push((quote.symbol.clone(), ttl));
            Ok(())
        }
    }

    fn quote(symbol: &str) -> Quote {
        Quote::new(
            symbol.to_string(),
            Decimal::new(50_000, 0),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            QuoteSource::Primary,
        )
    }

    #[tokio::test]
    async fn writer_drains_quotes_into_store() {
        let store = Arc::new(RecordingStore::new(false));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let writer = MirrorWriter::new(
            Arc::clone(&store),
            rx,
            Duration::from_secs(30),
            cancel.clone(),
        );

        let task = tokio::spawn(writer.run());
        tx.send(quote("BTC")).await.unwrap();
        tx.send(quote("ETH")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let written = store.written.lock();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].0, "BTC");
        assert_eq!(written[0].1, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn store_failures_do_not_stop_the_writer() {
        let store = Arc::new(RecordingStore::new(true));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let writer = MirrorWriter::new(
            Arc::clone(&store),
            rx,
            Duration::from_secs(30),
            cancel.clone(),
        );

        let task = tokio::spawn(writer.run());
        tx.send(quote("BTC")).await.unwrap();
        tx.send(quote("ETH")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(store.written.lock().is_empty());
    }

    #[tokio::test]
    async fn writer_stops_on_cancellation() {
        let store = Arc::new(RecordingStore::new(false));
        let (_tx, rx) = mpsc::channel::<Quote>(8);
        let cancel = CancellationToken::new();
        let writer = MirrorWriter::new(
            Arc::clone(&store),
            rx,
            Duration::from_secs(30),
            cancel.clone(),
        );

        let task = tokio::spawn(writer.run());
        cancel.cancel();
        task.await.unwrap();
    }
}
