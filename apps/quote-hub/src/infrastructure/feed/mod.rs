//! Upstream quote feed: WebSocket client, frame normalization, reconnect
//! backoff, and the failover controller that picks the active source.

pub mod backoff;
pub mod client;
pub mod failover;
pub mod normalizer;
pub mod source;
pub mod status;
