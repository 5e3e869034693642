//! Environment-based configuration.
//!
//! Everything is read once at startup from `QUOTE_HUB_*` variables. The two
//! provider URLs are the only required settings; everything else has a
//! default tuned for production.

use std::net::SocketAddr;
use std::time::Duration;

use crate::infrastructure::broadcast::BroadcastConfig;
use crate::infrastructure::feed::backoff::BackoffConfig;
use crate::infrastructure::feed::client::FeedClientConfig;
use crate::infrastructure::feed::failover::FailoverConfig;
use crate::infrastructure::subscribers::server::SubscriberServerConfig;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A required environment variable is set but empty.
    #[error("environment variable {0} is set but empty")]
    EmptyValue(String),

    /// A variable's value could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// The offending value.
        value: String,
    },
}

/// Distributed mirror settings, present only when a Redis URL is configured.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Redis connection URL.
    pub redis_url: String,
    /// Key prefix for mirrored quotes.
    pub key_prefix: String,
    /// Expiry applied to mirrored entries.
    pub ttl: Duration,
    /// Capacity of the cache-to-writer hand-off channel.
    pub channel_capacity: usize,
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Primary provider WebSocket URL.
    pub primary_url: String,
    /// Secondary provider WebSocket URL.
    pub secondary_url: String,
    /// Cache freshness window.
    pub cache_ttl: Duration,
    /// Upstream connection tuning.
    pub feed_client: FeedClientConfig,
    /// Failover and backoff tuning.
    pub failover: FailoverConfig,
    /// Fan-out tuning.
    pub broadcast: BroadcastConfig,
    /// Downstream WebSocket server tuning.
    pub subscriber_server: SubscriberServerConfig,
    /// Health/metrics HTTP listen address.
    pub health_addr: SocketAddr,
    /// Mirror settings, if mirroring is enabled.
    pub mirror: Option<MirrorSettings>,
}

impl HubConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any set
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_ttl = env_duration_secs("QUOTE_HUB_CACHE_TTL_SECS", 30)?;

        let feed_client = FeedClientConfig {
            connect_timeout: env_duration_secs("QUOTE_HUB_CONNECT_TIMEOUT_SECS", 10)?,
            idle_timeout: env_duration_secs("QUOTE_HUB_IDLE_TIMEOUT_SECS", 30)?,
        };

        let failover = FailoverConfig {
            failure_threshold: env_parse("QUOTE_HUB_FAILURE_THRESHOLD", 3)?,
            grace_period: env_duration_secs("QUOTE_HUB_GRACE_PERIOD_SECS", 30)?,
            probe_interval: env_duration_secs("QUOTE_HUB_PROBE_INTERVAL_SECS", 60)?,
            max_retries_per_source: env_parse("QUOTE_HUB_MAX_RETRIES_PER_SOURCE", 10)?,
            retry_window: env_duration_secs("QUOTE_HUB_RETRY_WINDOW_SECS", 300)?,
            backoff: BackoffConfig {
                initial_delay: env_duration_millis("QUOTE_HUB_BACKOFF_INITIAL_MS", 1_000)?,
                max_delay: env_duration_millis("QUOTE_HUB_BACKOFF_MAX_MS", 30_000)?,
                multiplier: env_parse("QUOTE_HUB_BACKOFF_MULTIPLIER", 2.0)?,
                jitter_factor: env_parse("QUOTE_HUB_BACKOFF_JITTER", 0.1)?,
            },
        };

        let broadcast = BroadcastConfig {
            interval: env_duration_millis("QUOTE_HUB_BROADCAST_INTERVAL_MS", 1_000)?,
            send_timeout: env_duration_millis("QUOTE_HUB_SEND_TIMEOUT_MS", 250)?,
            subscriber_timeout: env_duration_secs("QUOTE_HUB_SUBSCRIBER_TIMEOUT_SECS", 60)?,
        };

        let subscriber_server = SubscriberServerConfig {
            bind_addr: env_socket_addr("QUOTE_HUB_WS_ADDR", ([0, 0, 0, 0], 8900).into())?,
            handshake_timeout: env_duration_secs("QUOTE_HUB_HANDSHAKE_TIMEOUT_SECS", 10)?,
            frame_buffer: env_parse("QUOTE_HUB_FRAME_BUFFER", 16)?,
        };

        let mirror = match env_optional("QUOTE_HUB_REDIS_URL") {
            Some(redis_url) => Some(MirrorSettings {
                redis_url,
                key_prefix: env_string_or("QUOTE_HUB_MIRROR_PREFIX", "quote:"),
                ttl: env_duration_secs(
                    "QUOTE_HUB_MIRROR_TTL_SECS",
                    cache_ttl.as_secs(),
                )?,
                channel_capacity: env_parse("QUOTE_HUB_MIRROR_CHANNEL_CAPACITY", 256)?,
            }),
            None => None,
        };

        Ok(Self {
            primary_url: env_required("QUOTE_HUB_PRIMARY_URL")?,
            secondary_url: env_required("QUOTE_HUB_SECONDARY_URL")?,
            cache_ttl,
            feed_client,
            failover,
            broadcast,
            subscriber_server,
            health_addr: env_socket_addr("QUOTE_HUB_HEALTH_ADDR", ([0, 0, 0, 0], 8080).into())?,
            mirror,
        })
    }
}

// Each env helper splits lookup from parsing so the parsing is testable
// without mutating process environment.

fn env_required(name: &str) -> Result<String, ConfigError> {
    required_value(name, std::env::var(name).ok())
}

fn required_value(name: &str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(name.to_string())),
        Some(v) => Ok(v),
        None => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_string_or(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    parse_value(name, env_optional(name), default)
}

fn parse_value<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn env_duration_secs(name: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(name, default_secs)?))
}

fn env_duration_millis(name: &str, default_millis: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(env_parse(name, default_millis)?))
}

fn env_socket_addr(name: &str, default: SocketAddr) -> Result<SocketAddr, ConfigError> {
    env_parse(name, default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_value_missing_is_an_error() {
        assert!(matches!(
            required_value("QUOTE_HUB_PRIMARY_URL", None),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn required_value_empty_is_an_error() {
        assert!(matches!(
            required_value("QUOTE_HUB_PRIMARY_URL", Some("  ".to_string())),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn required_value_passes_through() {
        assert_eq!(
            required_value("QUOTE_HUB_PRIMARY_URL", Some("wss://x".to_string())).unwrap(),
            "wss://x"
        );
    }

    #[test]
    fn parse_falls_back_to_default() {
        let value: u32 = parse_value("QUOTE_HUB_FAILURE_THRESHOLD", None, 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn parse_reads_set_value() {
        let value: u32 =
            parse_value("QUOTE_HUB_FAILURE_THRESHOLD", Some("42".to_string()), 7).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn invalid_value_is_an_error() {
        assert!(matches!(
            parse_value::<u32>(
                "QUOTE_HUB_FAILURE_THRESHOLD",
                Some("not-a-number".to_string()),
                7
            ),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn socket_addr_parses() {
        let default: SocketAddr = ([0, 0, 0, 0], 8900).into();
        let addr: SocketAddr =
            parse_value("QUOTE_HUB_WS_ADDR", Some("127.0.0.1:9001".to_string()), default).unwrap();
        assert_eq!(addr.port(), 9001);
    }

    #[test]
    fn floats_parse_for_backoff_tuning() {
        let multiplier: f64 =
            parse_value("QUOTE_HUB_BACKOFF_MULTIPLIER", Some("1.5".to_string()), 2.0).unwrap();
        assert!((multiplier - 1.5).abs() < f64::EPSILON);
    }
}
