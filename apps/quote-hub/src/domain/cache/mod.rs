//! Quote Cache
//!
//! Authoritative latest-quote store with TTL-based freshness.
//!
//! # Contract
//!
//! - `set` applies a quote unless an equal-or-newer timestamp is already
//!   cached for that symbol (out-of-order and duplicate frames are dropped
//!   silently). Accepted quotes get a fresh `expires_at = now + ttl`.
//! - `get` returns a quote only while it is fresh; an expired entry behaves
//!   as absent without being deleted (a later `set` simply overwrites it).
//! - `snapshot` is a consistent point-in-time copy of all fresh entries,
//!   never a live view, so a broadcast pass cannot observe a mutation
//!   mid-iteration.
//!
//! The cache is the single synchronization boundary between the ingestion
//! path (one writer) and the fan-out/lookup paths (many readers). Each quote
//! is replaced as one atomic unit under the write lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::domain::quote::{Quote, Symbol};

/// A cached quote plus its freshness deadline.
#[derive(Debug, Clone)]
struct CacheEntry {
    quote: Quote,
    expires_at: Instant,
}

/// Latest-quote store shared between the feed client, the broadcast loop,
/// and current-price lookups.
#[derive(Debug)]
pub struct QuoteCache {
    ttl: Duration,
    entries: RwLock<HashMap<Symbol, CacheEntry>>,
    /// Best-effort hand-off to the distributed mirror writer. Quotes are
    /// offered with `try_send`; a full or closed channel is never an error
    /// for the caller.
    mirror_tx: RwLock<Option<mpsc::Sender<Quote>>>,
}

impl QuoteCache {
    /// Create a cache whose entries stay fresh for `ttl` after each `set`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            mirror_tx: RwLock::new(None),
        }
    }

    /// Attach the distributed mirror channel. Accepted quotes are forwarded
    /// to it best-effort from then on.
    pub fn attach_mirror(&self, tx: mpsc::Sender<Quote>) {
        *self.mirror_tx.write() = Some(tx);
    }

    /// The configured freshness window.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Apply a quote. Returns `false` if it was dropped because the cached
    /// entry for the symbol already carries an equal-or-newer timestamp.
    pub fn set(&self, quote: Quote) -> bool {
        self.set_at(quote, Instant::now())
    }

    /// Get the cached quote for `symbol`, if still fresh.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.get_at(symbol, Instant::now())
    }

    /// Point-in-time copy of every fresh entry.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Symbol, Quote> {
        self.snapshot_at(Instant::now())
    }

    /// Number of symbols with a fresh quote.
    #[must_use]
    pub fn fresh_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| now <= e.expires_at)
            .count()
    }

    fn set_at(&self, quote: Quote, now: Instant) -> bool {
        {
            let mut entries = self.entries.write();

            if let Some(existing) = entries.get(&quote.symbol)
                && quote.timestamp <= existing.quote.timestamp
            {
                return false;
            }

            entries.insert(
                quote.symbol.clone(),
                CacheEntry {
                    quote: quote.clone(),
                    expires_at: now + self.ttl,
                },
            );
        }

        if let Some(tx) = self.mirror_tx.read().as_ref()
            && let Err(e) = tx.try_send(quote)
        {
            tracing::debug!(error = %e, "mirror channel full or closed, quote not mirrored");
        }

        true
    }

    fn get_at(&self, symbol: &str, now: Instant) -> Option<Quote> {
        self.entries
            .read()
            .get(symbol)
            .filter(|e| now <= e.expires_at)
            .map(|e| e.quote.clone())
    }

    fn snapshot_at(&self, now: Instant) -> HashMap<Symbol, Quote> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| now <= e.expires_at)
            .map(|(s, e)| (s.clone(), e.quote.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::quote::QuoteSource;

    fn quote(symbol: &str, price: &str, ts_secs: i64) -> Quote {
        Quote::new(
            symbol.to_string(),
            Decimal::from_str(price).unwrap(),
            Utc.timestamp_opt(ts_secs, 0).unwrap(),
            QuoteSource::Primary,
        )
    }

    #[test]
    fn get_returns_fresh_quote() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(cache.set_at(quote("BTC", "50000", 0), t0));

        let got = cache.get_at("BTC", t0 + Duration::from_secs(20)).unwrap();
        assert_eq!(got.price, Decimal::from_str("50000").unwrap());
    }

    #[test]
    fn get_returns_none_after_ttl() {
        // Concrete scenario: ttl = 30s, quote at t=0, fresh at t=20, gone at t=31.
        let cache = QuoteCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        cache.set_at(quote("BTC", "50000", 0), t0);

        assert!(cache.get_at("BTC", t0 + Duration::from_secs(20)).is_some());
        assert!(cache.get_at("BTC", t0 + Duration::from_secs(31)).is_none());
    }

    #[test]
    fn expiry_is_time_based_not_eviction_based() {
        let cache = QuoteCache::new(Duration::from_secs(10));
        let t0 = Instant::now();

        cache.set_at(quote("ETH", "3000", 0), t0);
        let late = t0 + Duration::from_secs(11);

        // Expired for reads, but a later set still overwrites cleanly.
        assert!(cache.get_at("ETH", late).is_none());
        assert!(cache.set_at(quote("ETH", "3001", 5), late));
        assert!(cache.get_at("ETH", late).is_some());
    }

    #[test]
    fn out_of_order_quote_is_rejected() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(cache.set_at(quote("BTC", "50000", 10), t0));
        assert!(!cache.set_at(quote("BTC", "49000", 5), t0));

        let got = cache.get_at("BTC", t0).unwrap();
        assert_eq!(got.price, Decimal::from_str("50000").unwrap());
    }

    #[test]
    fn duplicate_timestamp_is_rejected() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert!(cache.set_at(quote("BTC", "50000", 10), t0));
        assert!(!cache.set_at(quote("BTC", "50001", 10), t0));
    }

    #[test]
    fn newer_quote_refreshes_expiry() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        cache.set_at(quote("BTC", "50000", 0), t0);
        cache.set_at(quote("BTC", "50100", 10), t0 + Duration::from_secs(25));

        // Fresh relative to the second set, not the first.
        let got = cache.get_at("BTC", t0 + Duration::from_secs(50)).unwrap();
        assert_eq!(got.price, Decimal::from_str("50100").unwrap());
    }

    #[test]
    fn snapshot_excludes_expired_entries() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        cache.set_at(quote("BTC", "50000", 0), t0);
        cache.set_at(quote("ETH", "3000", 0), t0 + Duration::from_secs(20));

        let snap = cache.snapshot_at(t0 + Duration::from_secs(40));
        assert!(!snap.contains_key("BTC"));
        assert!(snap.contains_key("ETH"));
    }

    #[test]
    fn snapshot_is_a_copy_not_a_view() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let t0 = Instant::now();

        cache.set_at(quote("BTC", "50000", 0), t0);
        let snap = cache.snapshot_at(t0);

        cache.set_at(quote("BTC", "60000", 10), t0);

        assert_eq!(
            snap.get("BTC").unwrap().price,
            Decimal::from_str("50000").unwrap()
        );
    }

    #[test]
    fn fresh_len_counts_only_fresh() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        cache.set(quote("BTC", "50000", 0));
        cache.set(quote("ETH", "3000", 0));
        assert_eq!(cache.fresh_len(), 2);
    }

    #[tokio::test]
    async fn accepted_quotes_are_offered_to_the_mirror() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let (tx, mut rx) = mpsc::channel(4);
        cache.attach_mirror(tx);

        cache.set(quote("BTC", "50000", 10));
        // Rejected quotes must not reach the mirror.
        cache.set(quote("BTC", "49000", 5));

        let mirrored = rx.recv().await.unwrap();
        assert_eq!(mirrored.symbol, "BTC");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mirror_failure_never_surfaces() {
        let cache = QuoteCache::new(Duration::from_secs(30));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        cache.attach_mirror(tx);

        // Channel is closed; set still succeeds.
        assert!(cache.set(quote("BTC", "50000", 0)));
    }
}
