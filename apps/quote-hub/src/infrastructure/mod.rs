//! Infrastructure layer - adapters and external integrations.

/// Periodic cache-to-subscribers fan-out.
pub mod broadcast;

/// Environment-based configuration.
pub mod config;

/// Upstream feed client, normalization, and failover.
pub mod feed;

/// Health check and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics.
pub mod metrics;

/// Distributed cache mirror (Redis write-through).
pub mod mirror;

/// Downstream subscriber protocol, registry, and WebSocket server.
pub mod subscribers;

/// OpenTelemetry tracing integration.
pub mod telemetry;
