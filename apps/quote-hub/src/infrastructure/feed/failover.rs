//! Source Failover Controller
//!
//! Owns the decision of which provider the feed client is connected to and
//! drives reconnection, backoff, and provider switching.
//!
//! The transition logic lives in [`FailoverController`], a synchronous state
//! machine that can be tested without any network I/O. [`FeedSupervisor`]
//! drives it against a [`FeedConnector`], which tests replace with a
//! scripted fake.
//!
//! # States
//!
//! - `Connected(source)` — one live connection.
//! - `Reconnecting { source, attempt }` — waiting out backoff before retrying.
//! - `Degraded` — both sources exhausted their retry budget; the primary is
//!   probed indefinitely at the capped backoff interval while cache entries
//!   age out naturally.
//!
//! While connected to the secondary, the supervisor probes the primary in
//! the background; the secondary stream is torn down only after a probe
//! connection is confirmed live (make-before-break).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::infrastructure::feed::backoff::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::feed::client::{FeedConnector, FeedHandle, SessionEnd};
use crate::infrastructure::feed::source::{FeedSourceId, SourceDescriptors, SourceHealth};
use crate::infrastructure::feed::status::{FeedConnectionState, FeedStatus};
use crate::infrastructure::metrics;

/// Failover tuning.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Consecutive primary failures before switching to the secondary.
    pub failure_threshold: u32,
    /// Max time since the primary's last successful frame before a failure
    /// triggers the switch regardless of the consecutive count.
    pub grace_period: Duration,
    /// How often to probe the primary while serving from the secondary.
    pub probe_interval: Duration,
    /// Retry budget per source within the rolling window.
    pub max_retries_per_source: u32,
    /// Rolling window for the retry budget.
    pub retry_window: Duration,
    /// Backoff between attempts.
    pub backoff: BackoffConfig,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            grace_period: Duration::from_secs(30),
            probe_interval: Duration::from_secs(60),
            max_retries_per_source: 10,
            retry_window: Duration::from_secs(300),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Where the controller currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    /// One live connection to `source`.
    Connected(FeedSourceId),
    /// Waiting out backoff before retrying `source`.
    Reconnecting {
        /// The source to retry.
        source: FeedSourceId,
        /// Zero-based retry attempt, indexes the backoff curve.
        attempt: u32,
    },
    /// No source reachable; probing the primary at the capped interval.
    Degraded,
}

/// Synchronous failover state machine. The only component allowed to mutate
/// source descriptor health.
#[derive(Debug)]
pub struct FailoverController {
    config: FailoverConfig,
    backoff: BackoffPolicy,
    descriptors: Arc<SourceDescriptors>,
    state: FailoverState,
    primary_failures: VecDeque<Instant>,
    secondary_failures: VecDeque<Instant>,
}

impl FailoverController {
    /// Create a controller starting at `Reconnecting { Primary, 0 }`.
    #[must_use]
    pub fn new(config: FailoverConfig, descriptors: Arc<SourceDescriptors>) -> Self {
        let backoff = BackoffPolicy::new(config.backoff.clone());
        Self {
            config,
            backoff,
            descriptors,
            state: FailoverState::Reconnecting {
                source: FeedSourceId::Primary,
                attempt: 0,
            },
            primary_failures: VecDeque::new(),
            secondary_failures: VecDeque::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> FailoverState {
        self.state
    }

    /// How often the primary should be probed while on the secondary.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        self.config.probe_interval
    }

    /// The source the supervisor should dial next, if any.
    #[must_use]
    pub const fn connect_target(&self) -> Option<FeedSourceId> {
        match self.state {
            FailoverState::Connected(_) => None,
            FailoverState::Reconnecting { source, .. } => Some(source),
            // Degraded keeps attempting primary reconnects indefinitely.
            FailoverState::Degraded => Some(FeedSourceId::Primary),
        }
    }

    /// Delay to wait before the next attempt.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        match self.state {
            FailoverState::Connected(_) => Duration::ZERO,
            FailoverState::Reconnecting { attempt, .. } => {
                self.backoff.delay_for_attempt(attempt)
            }
            FailoverState::Degraded => self.backoff.max_delay(),
        }
    }

    /// A connection to `source` was established.
    pub fn on_connected(&mut self, source: FeedSourceId) {
        self.descriptors.set_health(source, SourceHealth::Healthy);
        self.failure_window_mut(source).clear();
        self.state = FailoverState::Connected(source);
    }

    /// A connection-level failure on `source` was reported by the feed
    /// client, either while connected or while retrying.
    pub fn on_failure(&mut self, source: FeedSourceId) {
        self.on_failure_at(source, Instant::now());
    }

    /// A background probe of the primary failed while the secondary stream
    /// stays up. Bookkeeping only; the active connection is not affected.
    pub fn on_probe_failure(&mut self) {
        self.descriptors.record_failure(FeedSourceId::Primary);
    }

    pub(crate) fn on_failure_at(&mut self, source: FeedSourceId, now: Instant) {
        let failures = self.descriptors.record_failure(source);

        self.failure_window_mut(source).push_back(now);
        self.prune_windows(now);

        if self.budget_exhausted(FeedSourceId::Primary)
            && self.budget_exhausted(FeedSourceId::Secondary)
        {
            tracing::error!("both feed sources exhausted their retry budget");
            self.descriptors
                .set_health(FeedSourceId::Primary, SourceHealth::Down);
            self.descriptors
                .set_health(FeedSourceId::Secondary, SourceHealth::Down);
            self.state = FailoverState::Degraded;
            return;
        }

        if source == FeedSourceId::Primary && self.should_abandon_primary(failures, now) {
            tracing::warn!("marking primary down, switching to secondary");
            self.descriptors
                .set_health(FeedSourceId::Primary, SourceHealth::Down);
            self.state = FailoverState::Reconnecting {
                source: FeedSourceId::Secondary,
                attempt: 0,
            };
            return;
        }

        let next_attempt = match self.state {
            FailoverState::Reconnecting {
                source: s, attempt, ..
            } if s == source => attempt.saturating_add(1),
            // First failure after a live connection restarts the curve.
            _ => 0,
        };

        self.descriptors.set_health(source, SourceHealth::Degraded);
        self.state = FailoverState::Reconnecting {
            source,
            attempt: next_attempt,
        };
    }

    fn should_abandon_primary(&self, consecutive_failures: u32, now: Instant) -> bool {
        if consecutive_failures >= self.config.failure_threshold {
            return true;
        }
        self.descriptors
            .get(FeedSourceId::Primary)
            .last_success
            .is_some_and(|ls| now.duration_since(ls) > self.config.grace_period)
    }

    fn failure_window_mut(&mut self, source: FeedSourceId) -> &mut VecDeque<Instant> {
        match source {
            FeedSourceId::Primary => &mut self.primary_failures,
            FeedSourceId::Secondary => &mut self.secondary_failures,
        }
    }

    fn prune_windows(&mut self, now: Instant) {
        let window = self.config.retry_window;
        for deque in [&mut self.primary_failures, &mut self.secondary_failures] {
            while let Some(front) = deque.front() {
                if now.duration_since(*front) > window {
                    deque.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn budget_exhausted(&self, source: FeedSourceId) -> bool {
        let window = match source {
            FeedSourceId::Primary => &self.primary_failures,
            FeedSourceId::Secondary => &self.secondary_failures,
        };
        window.len() >= self.config.max_retries_per_source as usize
    }
}

/// Drives the failover state machine against a [`FeedConnector`].
pub struct FeedSupervisor<C> {
    connector: Arc<C>,
    controller: FailoverController,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
    last_connected: Option<FeedSourceId>,
}

impl<C: FeedConnector> FeedSupervisor<C> {
    /// Create a supervisor.
    #[must_use]
    pub const fn new(
        connector: Arc<C>,
        controller: FailoverController,
        status: Arc<FeedStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            controller,
            status,
            cancel,
            last_connected: None,
        }
    }

    /// Run until shutdown. Never returns an error: every failure mode
    /// degrades to "no fresh data" rather than escaping.
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                self.status.set_state(FeedConnectionState::Disconnected);
                return;
            }

            let Some(target) = self.controller.connect_target() else {
                // Connected is only ever observed inside serve().
                return;
            };

            self.status.set_state(match self.controller.state() {
                FailoverState::Degraded => FeedConnectionState::Degraded,
                _ => FeedConnectionState::Reconnecting,
            });

            let delay = self.controller.next_delay();
            if !delay.is_zero() {
                tokio::select! {
                    () = self.cancel.cancelled() => continue,
                    () = tokio::time::sleep(delay) => {}
                }
            }

            self.status.increment_reconnects();
            metrics::record_reconnect(target);

            match self.connector.start(target).await {
                Ok(handle) => {
                    tracing::info!(source = target.as_str(), "feed connected");
                    self.controller.on_connected(target);
                    self.status.set_state(FeedConnectionState::Connected);
                    self.status.set_active_source(Some(target));
                    if self.last_connected.is_some_and(|prev| prev != target) {
                        self.status.record_failover();
                        metrics::record_failover(target);
                    }
                    self.last_connected = Some(target);
                    self.serve(handle, target).await;
                }
                Err(e) => {
                    tracing::warn!(
                        source = target.as_str(),
                        error = %e,
                        "feed connection failed"
                    );
                    self.status.set_last_error(e.to_string());
                    self.controller.on_failure(target);
                }
            }
        }
    }

    /// Watch a live session until it ends, probing the primary while the
    /// secondary is the active source.
    async fn serve(&mut self, handle: FeedHandle, source: FeedSourceId) {
        let (stop, mut closed) = handle.into_parts();
        let active = source;

        let mut probe = tokio::time::interval_at(
            tokio::time::Instant::now() + self.controller.probe_interval(),
            self.controller.probe_interval(),
        );
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    stop.cancel();
                    let _ = (&mut closed).await;
                    self.status.set_state(FeedConnectionState::Disconnected);
                    self.status.set_active_source(None);
                    return;
                }
                end = &mut closed => {
                    match end {
                        Ok(SessionEnd::Cancelled) => return,
                        Ok(SessionEnd::Failed(e)) => {
                            tracing::warn!(
                                source = active.as_str(),
                                error = %e,
                                "feed session ended"
                            );
                            self.status.set_last_error(e.to_string());
                        }
                        Err(_) => {
                            tracing::warn!(
                                source = active.as_str(),
                                "feed session dropped without reporting"
                            );
                        }
                    }
                    self.status.set_active_source(None);
                    self.controller.on_failure(active);
                    return;
                }
                _ = probe.tick(), if active == FeedSourceId::Secondary => {
                    match self.connector.start(FeedSourceId::Primary).await {
                        Ok(primary_handle) => {
                            // Make-before-break: the primary connection is
                            // live before the secondary is torn down.
                            tracing::info!("primary recovered, switching back");
                            stop.cancel();
                            let _ = (&mut closed).await;
                            return self.resume_primary(primary_handle).await;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "primary probe failed");
                            self.controller.on_probe_failure();
                        }
                    }
                }
            }
        }
    }

    /// Continue serving after a make-before-break switch to the primary.
    async fn resume_primary(&mut self, handle: FeedHandle) {
        self.controller.on_connected(FeedSourceId::Primary);
        self.status.set_active_source(Some(FeedSourceId::Primary));
        self.status.record_failover();
        metrics::record_failover(FeedSourceId::Primary);
        self.last_connected = Some(FeedSourceId::Primary);

        Box::pin(self.serve(handle, FeedSourceId::Primary)).await;
    }
}
