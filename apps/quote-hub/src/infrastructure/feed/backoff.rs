//! Reconnect Backoff
//!
//! Exponential backoff with jitter for feed reconnection. The failover
//! controller owns the attempt counter, so the policy here is a pure
//! attempt-indexed delay calculation.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnect delays.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied to all delays.
    pub max_delay: Duration,
    /// Multiplier between successive attempts (2.0 doubles each time).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Attempt-indexed backoff: `initial * multiplier^attempt`, capped, jittered.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    /// Create a policy from configuration.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay to wait before reconnect attempt `attempt` (0-based), with
    /// jitter applied.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.base_delay(attempt))
    }

    /// The capped delay without jitter. Used directly by the degraded-state
    /// probe interval and by deterministic tests.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let initial = self.config.initial_delay.as_millis() as f64;
        let scaled = initial * self.config.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        let max_millis = self.config.max_delay.as_millis();
        if !scaled.is_finite() || scaled < 0.0 {
            return self.config.max_delay;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (scaled.round() as u128).min(max_millis);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// The cap itself; the degraded state retries at this fixed interval.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted as u64)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn no_jitter_policy() -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    #[test_case(0, 1_000; "first attempt waits the base delay")]
    #[test_case(1, 2_000; "second attempt doubles")]
    #[test_case(2, 4_000; "third attempt doubles again")]
    #[test_case(4, 16_000; "fifth attempt")]
    #[test_case(5, 30_000; "sixth attempt hits the cap")]
    #[test_case(20, 30_000; "late attempts stay capped")]
    fn exponential_growth_with_cap(attempt: u32, expected_millis: u64) {
        let policy = no_jitter_policy();
        assert_eq!(
            policy.delay_for_attempt(attempt),
            Duration::from_millis(expected_millis)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy::new(BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        });

        for _ in 0..100 {
            let millis = policy.delay_for_attempt(0).as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
    }
}
