//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus
//! metrics. Used by container orchestrators, load balancers, and monitoring
//! systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks quote availability)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::prices::PriceLookup;
use crate::infrastructure::feed::source::{FeedSourceId, SourceDescriptors};
use crate::infrastructure::feed::status::{FeedConnectionState, FeedStatus};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::subscribers::registry::SubscriberRegistry;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedInfo,
    /// Per-source health.
    pub sources: SourcesInfo,
    /// Cache statistics.
    pub cache: CacheInfo,
    /// Connected subscriber count.
    pub subscribers: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected to the primary with fresh data.
    Healthy,
    /// Serving, but on the secondary or reconnecting with fresh data left.
    Degraded,
    /// No connection and no fresh data.
    Unhealthy,
}

/// Upstream feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: String,
    /// The source currently serving quotes, if any.
    pub active_source: Option<String>,
    /// Connection attempts since startup.
    pub reconnect_attempts: u32,
    /// Source switches since startup.
    pub failovers: u64,
    /// Inbound frames since startup.
    pub frames_received: u64,
    /// Quotes accepted into the cache since startup.
    pub quotes_applied: u64,
    /// Most recent connection-level error, if any.
    pub last_error: Option<String>,
}

/// Health of both configured sources.
#[derive(Debug, Clone, Serialize)]
pub struct SourcesInfo {
    /// Primary provider.
    pub primary: SourceInfo,
    /// Secondary provider.
    pub secondary: SourceInfo,
}

/// One source's health.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    /// "healthy", "degraded", or "down".
    pub health: String,
    /// Consecutive connection-level failures.
    pub consecutive_failures: u32,
    /// Seconds since the last successful frame, if any.
    pub last_success_secs_ago: Option<u64>,
}

/// Quote cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    /// Symbols with a fresh quote.
    pub fresh_symbols: usize,
    /// Configured freshness window in seconds.
    pub ttl_secs: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed_status: Arc<FeedStatus>,
    descriptors: Arc<SourceDescriptors>,
    prices: PriceLookup,
    registry: Arc<SubscriberRegistry>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed_status: Arc<FeedStatus>,
        descriptors: Arc<SourceDescriptors>,
        prices: PriceLookup,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed_status,
            descriptors,
            prices,
            registry,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        addr: SocketAddr,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.addr, e.to_string()))?;

        tracing::info!(addr = %self.addr, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    // Ready if a feed is connected or fresh quotes remain servable.
    let is_ready = state.feed_status.state() == FeedConnectionState::Connected
        || state.prices.fresh_symbol_count() > 0;

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection_state = state.feed_status.state();
    let fresh_symbols = state.prices.fresh_symbol_count();

    let feed = FeedInfo {
        state: connection_state.as_str().to_string(),
        active_source: state
            .feed_status
            .active_source()
            .map(|s| s.as_str().to_string()),
        reconnect_attempts: state.feed_status.reconnect_attempts(),
        failovers: state.feed_status.failovers(),
        frames_received: state.feed_status.frames_received(),
        quotes_applied: state.feed_status.quotes_applied(),
        last_error: state.feed_status.last_error(),
    };

    let sources = SourcesInfo {
        primary: source_info(&state.descriptors, FeedSourceId::Primary),
        secondary: source_info(&state.descriptors, FeedSourceId::Secondary),
    };

    let status = determine_health_status(
        connection_state,
        state.feed_status.active_source(),
        fresh_symbols,
    );

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        sources,
        cache: CacheInfo {
            fresh_symbols,
            ttl_secs: state.prices.cache_ttl().as_secs(),
        },
        subscribers: state.registry.len(),
    }
}

fn source_info(descriptors: &SourceDescriptors, id: FeedSourceId) -> SourceInfo {
    let descriptor = descriptors.get(id);
    SourceInfo {
        health: descriptor.health.as_str().to_string(),
        consecutive_failures: descriptor.consecutive_failures,
        last_success_secs_ago: descriptor.last_success.map(|t| t.elapsed().as_secs()),
    }
}

fn determine_health_status(
    connection: FeedConnectionState,
    active_source: Option<FeedSourceId>,
    fresh_symbols: usize,
) -> HealthStatus {
    match (connection, active_source) {
        (FeedConnectionState::Connected, Some(FeedSourceId::Primary)) => HealthStatus::Healthy,
        // On the secondary or between attempts we are degraded while fresh
        // quotes remain servable.
        (FeedConnectionState::Connected, _) => HealthStatus::Degraded,
        _ if fresh_symbols > 0 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn connected_to_primary_is_healthy() {
        let status = determine_health_status(
            FeedConnectionState::Connected,
            Some(FeedSourceId::Primary),
            10,
        );
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn connected_to_secondary_is_degraded() {
        let status = determine_health_status(
            FeedConnectionState::Connected,
            Some(FeedSourceId::Secondary),
            10,
        );
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn reconnecting_with_fresh_quotes_is_degraded() {
        let status = determine_health_status(FeedConnectionState::Reconnecting, None, 5);
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn disconnected_with_nothing_fresh_is_unhealthy() {
        let status = determine_health_status(FeedConnectionState::Disconnected, None, 0);
        assert_eq!(status, HealthStatus::Unhealthy);

        let status = determine_health_status(FeedConnectionState::Degraded, None, 0);
        assert_eq!(status, HealthStatus::Unhealthy);
    }
}
