//! Current-Price Lookup
//!
//! The one interface this subsystem exposes to the surrounding application:
//! read the latest fresh quote for a symbol. Callers that need a price after
//! the cache TTL has lapsed get `None` rather than a silently stale value.

use std::sync::Arc;

use crate::domain::cache::QuoteCache;
use crate::domain::quote::Quote;

/// Read-only view over the quote cache for external collaborators.
#[derive(Debug, Clone)]
pub struct PriceLookup {
    cache: Arc<QuoteCache>,
}

impl PriceLookup {
    /// Create a lookup over the given cache.
    #[must_use]
    pub const fn new(cache: Arc<QuoteCache>) -> Self {
        Self { cache }
    }

    /// Latest fresh quote for `symbol`, if any.
    #[must_use]
    pub fn get_price(&self, symbol: &str) -> Option<Quote> {
        self.cache.get(symbol)
    }

    /// Number of symbols currently holding a fresh quote.
    #[must_use]
    pub fn fresh_symbol_count(&self) -> usize {
        self.cache.fresh_len()
    }

    /// The cache's configured freshness window.
    #[must_use]
    pub fn cache_ttl(&self) -> std::time::Duration {
        self.cache.ttl()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::quote::{Quote, QuoteSource};

    #[test]
    fn lookup_reads_through_to_cache() {
        let cache = Arc::new(QuoteCache::new(Duration::from_secs(30)));
        let lookup = PriceLookup::new(Arc::clone(&cache));

        assert!(lookup.get_price("BTC").is_none());
        assert_eq!(lookup.fresh_symbol_count(), 0);

        cache.set(Quote::new(
            "BTC".to_string(),
            Decimal::from_str("50000").unwrap(),
            Utc::now(),
            QuoteSource::Primary,
        ));

        assert!(lookup.get_price("BTC").is_some());
        assert_eq!(lookup.fresh_symbol_count(), 1);
    }
}
