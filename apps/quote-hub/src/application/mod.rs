//! Application Layer - Use cases exposed to the surrounding application.
//!
//! The rest of the application (CRUD/display code) never talks to the feed
//! or the cache internals directly; it consumes the services defined here.

/// Current-price lookup backed by the quote cache.
pub mod prices;
