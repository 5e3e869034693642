//! Domain Layer - Core quote types and the latest-quote cache.
//!
//! This layer contains the core domain types for live price data
//! with no network or transport dependencies.

/// Quote and source types.
pub mod quote;

/// Latest-quote cache with TTL-based freshness.
pub mod cache;

/// Subscriber symbol filters.
pub mod subscription;
