//! Quote Hub Binary
//!
//! Starts the live quote ingestion and fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-hub
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTE_HUB_PRIMARY_URL`: Primary provider WebSocket URL
//! - `QUOTE_HUB_SECONDARY_URL`: Secondary provider WebSocket URL
//!
//! ## Optional
//! - `QUOTE_HUB_CACHE_TTL_SECS`: Quote freshness window (default: 30)
//! - `QUOTE_HUB_WS_ADDR`: Subscriber WebSocket listen address (default: 0.0.0.0:8900)
//! - `QUOTE_HUB_HEALTH_ADDR`: Health/metrics HTTP address (default: 0.0.0.0:8080)
//! - `QUOTE_HUB_BROADCAST_INTERVAL_MS`: Fan-out interval (default: 1000)
//! - `QUOTE_HUB_SUBSCRIBER_TIMEOUT_SECS`: Idle subscriber timeout (default: 60)
//! - `QUOTE_HUB_REDIS_URL`: Enable the Redis mirror when set
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use quote_hub::infrastructure::broadcast::BroadcastLoop;
use quote_hub::infrastructure::feed::client::WsFeedClient;
use quote_hub::infrastructure::feed::failover::{FailoverController, FeedSupervisor};
use quote_hub::infrastructure::feed::source::SourceDescriptors;
use quote_hub::infrastructure::feed::status::FeedStatus;
use quote_hub::infrastructure::health::{HealthServer, HealthServerState};
use quote_hub::infrastructure::mirror::{MirrorWriter, RedisMirror};
use quote_hub::infrastructure::subscribers::registry::SubscriberRegistry;
use quote_hub::infrastructure::subscribers::server::SubscriberServer;
use quote_hub::infrastructure::telemetry;
use quote_hub::{HubConfig, PriceLookup, QuoteCache, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Quote Hub");

    // Initialize Prometheus metrics
    init_metrics()?;

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Core shared state
    let cache = Arc::new(QuoteCache::new(config.cache_ttl));
    let registry = Arc::new(SubscriberRegistry::new());
    let feed_status = Arc::new(FeedStatus::new());
    let descriptors = Arc::new(SourceDescriptors::new(
        config.primary_url.clone(),
        config.secondary_url.clone(),
    ));
    let prices = PriceLookup::new(Arc::clone(&cache));

    // Optional Redis mirror, fed from the cache through a bounded channel
    if let Some(mirror_settings) = &config.mirror {
        let mirror = Arc::new(RedisMirror::new(
            &mirror_settings.redis_url,
            mirror_settings.key_prefix.clone(),
        )?);
        let (mirror_tx, mirror_rx) = mpsc::channel(mirror_settings.channel_capacity);
        cache.attach_mirror(mirror_tx);

        let writer = MirrorWriter::new(
            mirror,
            mirror_rx,
            mirror_settings.ttl,
            shutdown_token.clone(),
        );
        tokio::spawn(writer.run());
        tracing::info!("Redis mirror enabled");
    }

    // Feed supervisor: connect, failover, and keep the cache fed
    let feed_client = Arc::new(WsFeedClient::new(
        config.feed_client.clone(),
        Arc::clone(&cache),
        Arc::clone(&descriptors),
        Arc::clone(&feed_status),
        shutdown_token.clone(),
    ));
    let controller = FailoverController::new(config.failover.clone(), Arc::clone(&descriptors));
    let supervisor = FeedSupervisor::new(
        feed_client,
        controller,
        Arc::clone(&feed_status),
        shutdown_token.clone(),
    );
    tokio::spawn(supervisor.run());

    // Broadcast loop: periodic snapshot fan-out
    let broadcast = BroadcastLoop::new(
        Arc::clone(&cache),
        Arc::clone(&registry),
        config.broadcast.clone(),
        shutdown_token.clone(),
    );
    tokio::spawn(broadcast.run());

    // Subscriber WebSocket server
    let subscriber_server = SubscriberServer::new(
        config.subscriber_server.clone(),
        Arc::clone(&registry),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = subscriber_server.run().await {
            tracing::error!(error = %e, "Subscriber server error");
        }
    });

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_status),
        Arc::clone(&descriptors),
        prices,
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(
        config.health_addr,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Quote hub ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Quote hub stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        cache_ttl_secs = config.cache_ttl.as_secs(),
        ws_addr = %config.subscriber_server.bind_addr,
        health_addr = %config.health_addr,
        broadcast_interval_ms = u64::try_from(config.broadcast.interval.as_millis()).unwrap_or(u64::MAX),
        mirror_enabled = config.mirror.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        primary_url = %config.primary_url,
        secondary_url = %config.secondary_url,
        "Feed endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
