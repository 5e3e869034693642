//! Provider Frame Normalizers
//!
//! Each provider has its own wire shape; a normalizer translates one inbound
//! text frame into zero or more `Quote`s. The set of providers is closed, so
//! dispatch is a tagged enum rather than trait objects.
//!
//! # Formats
//!
//! - **Primary**: envelope object with a batch of ticks:
//!   `{"type":"tick","data":[{"symbol":"BTC","price":"50123.45","ts":1700000000123}]}`
//! - **Secondary**: flat symbol-to-price map: `{"BTC":50123.45,"ETH":"3010.2"}`
//!
//! Both providers give no schema guarantees beyond "roughly continuous while
//! healthy": unknown fields, unknown envelope types, and entries that fail to
//! parse are skipped without failing the connection. Only malformed JSON or a
//! wrong top-level shape is an error.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::quote::Quote;
use crate::infrastructure::feed::source::FeedSourceId;

/// Normalizer errors. Anything recoverable is skipped, not raised.
#[derive(Debug, thiserror::Error)]
pub enum NormalizerError {
    /// Frame was not valid JSON.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame parsed but had the wrong top-level shape.
    #[error("invalid frame shape: {0}")]
    InvalidShape(String),
}

/// One variant per provider wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameNormalizer {
    /// Primary provider's envelope/batch format.
    Primary,
    /// Secondary provider's flat map format.
    Secondary,
}

impl FrameNormalizer {
    /// The normalizer for a feed source.
    #[must_use]
    pub const fn for_source(source: FeedSourceId) -> Self {
        match source {
            FeedSourceId::Primary => Self::Primary,
            FeedSourceId::Secondary => Self::Secondary,
        }
    }

    /// Parse one text frame into quotes. `received_at` is used for entries
    /// that carry no provider timestamp, and the quotes are stamped with
    /// this normalizer's source.
    ///
    /// # Errors
    ///
    /// Returns an error only for malformed JSON or a wrong top-level shape;
    /// individual entries that cannot be parsed are dropped silently.
    pub fn parse(
        self,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<Quote>, NormalizerError> {
        let value: Value = serde_json::from_str(text.trim())?;

        let Value::Object(map) = value else {
            return Err(NormalizerError::InvalidShape(
                "expected a JSON object frame".to_string(),
            ));
        };

        match self {
            Self::Primary => Ok(Self::parse_primary(&map, received_at)),
            Self::Secondary => Ok(Self::parse_secondary(&map, received_at)),
        }
    }

    fn parse_primary(
        map: &serde_json::Map<String, Value>,
        received_at: DateTime<Utc>,
    ) -> Vec<Quote> {
        // Non-tick envelopes (heartbeats, acks, anything new) carry no prices.
        let is_tick = map
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| t == "tick");
        if !is_tick {
            return vec![];
        }

        let Some(Value::Array(entries)) = map.get("data") else {
            return vec![];
        };

        entries
            .iter()
            .filter_map(|entry| {
                let symbol = entry.get("symbol").and_then(Value::as_str)?;
                if symbol.is_empty() {
                    return None;
                }
                let price = decimal_from_value(entry.get("price")?)?;
                let timestamp = entry
                    .get("ts")
                    .and_then(Value::as_i64)
                    .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
                    .unwrap_or(received_at);

                Some(Quote::new(
                    symbol.to_string(),
                    price,
                    timestamp,
                    FeedSourceId::Primary.quote_source(),
                ))
            })
            .collect()
    }

    fn parse_secondary(
        map: &serde_json::Map<String, Value>,
        received_at: DateTime<Utc>,
    ) -> Vec<Quote> {
        map.iter()
            .filter_map(|(symbol, value)| {
                if symbol.is_empty() {
                    return None;
                }
                let price = decimal_from_value(value)?;
                Some(Quote::new(
                    symbol.clone(),
                    price,
                    received_at,
                    FeedSourceId::Secondary.quote_source(),
                ))
            })
            .collect()
    }
}

/// Prices arrive as JSON numbers or as strings; anything else is skipped.
fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn primary_parses_a_batch() {
        let frame = r#"{"type":"tick","data":[
            {"symbol":"BTC","price":"50123.45","ts":1700000000123},
            {"symbol":"ETH","price":3010.2}
        ]}"#;

        let quotes = FrameNormalizer::Primary.parse(frame, now()).unwrap();
        assert_eq!(quotes.len(), 2);

        assert_eq!(quotes[0].symbol, "BTC");
        assert_eq!(quotes[0].price, Decimal::from_str("50123.45").unwrap());
        assert_eq!(
            quotes[0].timestamp,
            Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
        );

        // No "ts" field falls back to the receive time.
        assert_eq!(quotes[1].timestamp, now());
    }

    #[test]
    fn primary_ignores_non_tick_envelopes() {
        let quotes = FrameNormalizer::Primary
            .parse(r#"{"type":"heartbeat","seq":42}"#, now())
            .unwrap();
        assert!(quotes.is_empty());
    }

    #[test]
    fn primary_skips_unparseable_entries() {
        let frame = r#"{"type":"tick","data":[
            {"symbol":"BTC","price":"50000"},
            {"symbol":"ETH"},
            {"price":"1.0"},
            {"symbol":"SOL","price":"not-a-number"}
        ]}"#;

        let quotes = FrameNormalizer::Primary.parse(frame, now()).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "BTC");
    }

    #[test]
    fn primary_tolerates_unknown_fields() {
        let frame = r#"{"type":"tick","venue":"X","data":[
            {"symbol":"BTC","price":"50000","depth":3,"extra":{"a":1}}
        ]}"#;

        let quotes = FrameNormalizer::Primary.parse(frame, now()).unwrap();
        assert_eq!(quotes.len(), 1);
    }

    #[test]
    fn secondary_parses_a_flat_map() {
        let frame = r#"{"BTC":50123.45,"ETH":"3010.2"}"#;

        let mut quotes = FrameNormalizer::Secondary.parse(frame, now()).unwrap();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol, "BTC");
        assert_eq!(quotes[0].timestamp, now());
        assert_eq!(
            quotes[0].source,
            FeedSourceId::Secondary.quote_source()
        );
    }

    #[test]
    fn secondary_skips_non_numeric_values() {
        let frame = r#"{"BTC":50000,"status":"ok","meta":{"seq":1}}"#;

        let quotes = FrameNormalizer::Secondary.parse(frame, now()).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "BTC");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(FrameNormalizer::Primary.parse("not json", now()).is_err());
        assert!(FrameNormalizer::Secondary.parse("[1,2,3", now()).is_err());
    }

    #[test]
    fn wrong_top_level_shape_is_an_error() {
        let err = FrameNormalizer::Primary
            .parse("[{\"symbol\":\"BTC\"}]", now())
            .unwrap_err();
        assert!(matches!(err, NormalizerError::InvalidShape(_)));
    }

    #[test]
    fn for_source_maps_one_to_one() {
        assert_eq!(
            FrameNormalizer::for_source(FeedSourceId::Primary),
            FrameNormalizer::Primary
        );
        assert_eq!(
            FrameNormalizer::for_source(FeedSourceId::Secondary),
            FrameNormalizer::Secondary
        );
    }
}
