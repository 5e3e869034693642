//! Downstream subscribers: wire protocol, connection registry, and the
//! WebSocket server that accepts them.

pub mod protocol;
pub mod registry;
pub mod server;
