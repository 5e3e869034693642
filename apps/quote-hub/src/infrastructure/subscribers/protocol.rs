//! Downstream Wire Protocol
//!
//! JSON messages exchanged with subscribers over WebSocket.
//!
//! Inbound:
//! - `{"action":"subscribe","symbols":["BTC","ETH"]}` or
//!   `{"action":"subscribe","symbols":"all"}`
//! - `{"action":"ping"}`
//!
//! Outbound:
//! - `{"type":"price_update","prices":{"BTC":"50123.45"},"timestamp":"...","source":"primary"}`
//! - `{"type":"pong"}`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{Quote, QuoteSource, Symbol};
use crate::domain::subscription::SymbolFilter;

/// Messages a subscriber may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Set (or replace) the subscriber's symbol filter.
    Subscribe {
        /// The requested symbols, or the keyword `"all"`.
        symbols: SymbolSelector,
    },
    /// Keep-alive; answered with a pong and resets the idle clock.
    Ping,
}

/// The `symbols` field of a subscribe request.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SymbolSelector {
    /// The keyword `"all"`, or a single bare symbol.
    Keyword(String),
    /// An explicit list of symbols.
    List(Vec<String>),
}

impl SymbolSelector {
    /// Convert the wire selector into a domain filter.
    #[must_use]
    pub fn to_filter(&self) -> SymbolFilter {
        match self {
            Self::Keyword(word) if word.eq_ignore_ascii_case("all") => SymbolFilter::All,
            Self::Keyword(symbol) => SymbolFilter::from_symbols([symbol.clone()]),
            Self::List(symbols) => SymbolFilter::from_symbols(symbols.iter().cloned()),
        }
    }
}

/// Messages sent to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A batch of current prices matching the subscriber's filter.
    PriceUpdate {
        /// Symbol-to-price map for this tick.
        prices: BTreeMap<Symbol, Decimal>,
        /// Timestamp of the newest quote in the batch.
        timestamp: DateTime<Utc>,
        /// Source of the newest quote in the batch.
        source: QuoteSource,
    },
    /// Reply to a client ping.
    Pong,
}

impl ServerMessage {
    /// Build a price update from a non-empty set of quotes. Returns `None`
    /// for an empty set; subscribers with nothing matching get no frame.
    #[must_use]
    pub fn price_update(quotes: &[&Quote]) -> Option<Self> {
        let newest = quotes.iter().max_by_key(|q| q.timestamp)?;

        let prices = quotes
            .iter()
            .map(|q| (q.symbol.clone(), q.price))
            .collect();

        Some(Self::PriceUpdate {
            prices,
            timestamp: newest.timestamp,
            source: newest.source,
        })
    }
}
