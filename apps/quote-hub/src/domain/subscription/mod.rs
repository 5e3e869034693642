//! Subscriber Symbol Filters
//!
//! Each subscriber names either "all symbols" or an explicit set. The filter
//! is applied against a cache snapshot on every broadcast tick; a subscriber
//! whose filter matches nothing that tick receives no frame at all.

use std::collections::HashSet;

use crate::domain::quote::Symbol;

/// Which symbols a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolFilter {
    /// Every symbol present in the snapshot.
    All,
    /// An explicit set of symbols.
    Symbols(HashSet<Symbol>),
}

impl SymbolFilter {
    /// Build a filter from an explicit list of symbols.
    #[must_use]
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Self::Symbols(symbols.into_iter().map(Into::into).collect())
    }

    /// Whether `symbol` passes this filter.
    #[must_use]
    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            Self::All => true,
            Self::Symbols(set) => set.contains(symbol),
        }
    }

    /// An explicit empty set matches nothing; `All` is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::All => false,
            Self::Symbols(set) => set.is_empty(),
        }
    }
}
