//! Quote Types
//!
//! The canonical internal representation of a live price: one symbol, one
//! price, the provider timestamp, and which feed source produced it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol string (e.g. "BTC", "ETH").
pub type Symbol = String;

/// Which upstream feed source produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    /// The preferred provider.
    Primary,
    /// The fallback provider, used only while the primary is down.
    Secondary,
}

impl QuoteSource {
    /// Get the source name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

/// A single normalized price quote.
///
/// Quotes are immutable values: a newer quote for the same symbol replaces
/// the cached one wholesale, it never mutates it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last known price.
    pub price: Decimal,
    /// Provider timestamp for this price.
    pub timestamp: DateTime<Utc>,
    /// Feed source that produced the quote.
    pub source: QuoteSource,
}

impl Quote {
    /// Create a new quote.
    #[must_use]
    pub const fn new(
        symbol: Symbol,
        price: Decimal,
        timestamp: DateTime<Utc>,
        source: QuoteSource,
    ) -> Self {
        Self {
            symbol,
            price,
            timestamp,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn source_as_str() {
        assert_eq!(QuoteSource::Primary.as_str(), "primary");
        assert_eq!(QuoteSource::Secondary.as_str(), "secondary");
    }

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&QuoteSource::Primary).unwrap(),
            "\"primary\""
        );
        assert_eq!(
            serde_json::to_string(&QuoteSource::Secondary).unwrap(),
            "\"secondary\""
        );
    }

    #[test]
    fn quote_round_trips_through_json() {
        let quote = Quote::new(
            "BTC".to_string(),
            Decimal::from_str("50000.25").unwrap(),
            Utc::now(),
            QuoteSource::Primary,
        );

        let json = serde_json::to_string(&quote).unwrap();
        let back: Quote = serde_json::from_str(&json).unwrap();
        assert_eq!(quote, back);
    }
}
