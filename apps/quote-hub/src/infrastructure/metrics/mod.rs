//! Prometheus metrics.
//!
//! The recorder is installed once at startup; the handle is kept in a
//! process-wide `OnceLock` so the health server can render `/metrics`.
//! Recording helpers are no-ops until the recorder is installed, which
//! keeps unit tests free of global state.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::feed::source::FeedSourceId;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A recorder was already installed.
    #[error("failed to install metrics recorder: {0}")]
    InstallFailed(String),
}

/// Install the Prometheus recorder and register metric descriptions.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics() -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::InstallFailed(e.to_string()))?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::InstallFailed("metrics handle already set".to_string()))?;

    describe_counter!(
        "quote_hub_frames_received_total",
        "Inbound feed frames, labeled by source"
    );
    describe_counter!(
        "quote_hub_quotes_applied_total",
        "Quotes accepted into the cache, labeled by source"
    );
    describe_counter!(
        "quote_hub_quotes_stale_total",
        "Quotes dropped as out-of-order or duplicate, labeled by source"
    );
    describe_counter!(
        "quote_hub_reconnect_attempts_total",
        "Feed connection attempts, labeled by source"
    );
    describe_counter!(
        "quote_hub_failovers_total",
        "Source switches, labeled by the source switched to"
    );
    describe_counter!(
        "quote_hub_broadcast_frames_total",
        "Price-update frames delivered to subscribers"
    );
    describe_counter!(
        "quote_hub_subscribers_dropped_total",
        "Subscribers removed by the hub, labeled by reason"
    );
    describe_counter!(
        "quote_hub_mirror_errors_total",
        "Failed writes to the distributed mirror"
    );
    describe_gauge!("quote_hub_subscribers", "Currently connected subscribers");

    tracing::info!("metrics recorder installed");
    Ok(())
}

/// The Prometheus render handle, if the recorder is installed.
#[must_use]
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Count one inbound feed frame.
pub fn record_frame(source: FeedSourceId) {
    counter!("quote_hub_frames_received_total", "source" => source.as_str()).increment(1);
}

/// Count one quote accepted into the cache.
pub fn record_quote_applied(source: FeedSourceId) {
    counter!("quote_hub_quotes_applied_total", "source" => source.as_str()).increment(1);
}

/// Count one quote dropped as stale.
pub fn record_quote_stale(source: FeedSourceId) {
    counter!("quote_hub_quotes_stale_total", "source" => source.as_str()).increment(1);
}

/// Count one feed connection attempt.
pub fn record_reconnect(source: FeedSourceId) {
    counter!("quote_hub_reconnect_attempts_total", "source" => source.as_str()).increment(1);
}

/// Count one source switch; `target` is the source switched to.
pub fn record_failover(target: FeedSourceId) {
    counter!("quote_hub_failovers_total", "to" => target.as_str()).increment(1);
}

/// Count frames delivered in one broadcast pass.
pub fn record_broadcast_frames(count: u64) {
    counter!("quote_hub_broadcast_frames_total").increment(count);
}

/// Count subscribers dropped for `reason` ("slow", "closed", "idle").
pub fn record_subscribers_dropped(reason: &'static str, count: usize) {
    counter!("quote_hub_subscribers_dropped_total", "reason" => reason)
        .increment(count as u64);
}

/// Set the connected-subscriber gauge.
pub fn set_subscribers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("quote_hub_subscribers").set(count as f64);
}

/// Count one failed mirror write.
pub fn record_mirror_error() {
    counter!("quote_hub_mirror_errors_total").increment(1);
}
