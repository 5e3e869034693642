#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Hub - Live Price Fan-Out Service
//!
//! Maintains a single WebSocket connection to a market-data provider (with
//! automatic failover to a secondary), keeps the latest quote per symbol in
//! a TTL cache, mirrors accepted quotes to Redis, and pushes periodic price
//! updates to many downstream WebSocket subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `quote`: Quote value type and source tagging
//!   - `cache`: Latest-quote TTL cache
//!   - `subscription`: Subscriber symbol filters
//!
//! - **Application**: Use cases
//!   - `prices`: Current-price lookup over the cache
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Upstream WebSocket client, normalization, backoff, failover
//!   - `mirror`: Redis write-through of accepted quotes
//!   - `subscribers`: Downstream protocol, registry, WebSocket server
//!   - `broadcast`: Periodic snapshot fan-out
//!   - `config`: Environment-based configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: OpenTelemetry tracing
//!
//! # Data Flow
//!
//! ```text
//! Primary WS ──┐   ┌────────────┐   ┌────────────┐   ┌───────────┐
//!              ├──►│ Feed Client│──►│Quote Cache │──►│ Broadcast │──► Subscriber 1
//! Secondary WS─┘   │ + Failover │   │  (TTL)     │   │   Loop    │──► Subscriber 2
//!                  └────────────┘   └─────┬──────┘   └───────────┘──► Subscriber N
//!                                         │
//!                                         └──► Redis mirror (best effort)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core quote types with no external dependencies.
pub mod domain;

/// Application layer - Use cases.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::QuoteCache;
pub use domain::quote::{Quote, QuoteSource, Symbol};
pub use domain::subscription::SymbolFilter;

// Application
pub use application::prices::PriceLookup;

// Infrastructure config
pub use infrastructure::config::{ConfigError, HubConfig, MirrorSettings};

// Feed (for integration tests)
pub use infrastructure::feed::backoff::{BackoffConfig, BackoffPolicy};
pub use infrastructure::feed::client::{
    FeedClientConfig, FeedClientError, FeedConnector, FeedHandle, SessionEnd, WsFeedClient,
};
pub use infrastructure::feed::failover::{
    FailoverConfig, FailoverController, FailoverState, FeedSupervisor,
};
pub use infrastructure::feed::source::{FeedSourceId, SourceDescriptors, SourceHealth};
pub use infrastructure::feed::status::{FeedConnectionState, FeedStatus};

// Subscribers and broadcast (for integration tests)
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastLoop};
pub use infrastructure::subscribers::protocol::{ClientMessage, ServerMessage};
pub use infrastructure::subscribers::registry::{
    SubscriberHandle, SubscriberId, SubscriberRegistry,
};
pub use infrastructure::subscribers::server::{
    BoundSubscriberServer, SubscriberServer, SubscriberServerConfig,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
