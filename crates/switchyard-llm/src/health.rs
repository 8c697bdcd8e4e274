//! Upstream health tracking with a per-scope circuit breaker
//!
//! Each scope key (a target, or `target::model`) owns an independent
//! Closed/Open/HalfOpen state machine. Every transition for a key happens
//! under that key's map entry, so concurrent requests observe them atomically.

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use switchyard_config::CircuitBreakerConfig;
use tokio::time::Instant;

/// Circuit breaker state for a scope key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests flow through
    Closed,
    /// Upstream is failing, requests are blocked until the timeout elapses
    Open,
    /// Probing recovery with a limited number of trial requests
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Per-scope health state
#[derive(Debug, Clone)]
struct ScopeHealth {
    state: CircuitState,
    consecutive_failures: u32,
    /// Only meaningful while HalfOpen
    consecutive_successes: u32,
    /// Trial requests granted and not yet resolved while HalfOpen
    half_open_attempts: u32,
    opened_at: Option<Instant>,
    /// Transitions into Open over the lifetime of the process
    trips: u64,
}

impl Default for ScopeHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_attempts: 0,
            opened_at: None,
            trips: 0,
        }
    }
}

impl ScopeHealth {
    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_attempts = 0;
        self.trips += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_attempts = 0;
    }
}

/// Point-in-time copy of one scope's breaker state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub scope_key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_attempts: u32,
    /// Time since the circuit last opened, if it is not Closed
    pub open_for: Option<Duration>,
    pub trips: u64,
}

/// Trip totals across every scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakerStats {
    pub total_trips: u64,
    /// Scope key with the most trips and its count
    pub most_tripped: Option<(String, u64)>,
}

/// Circuit breaker keyed by scope
pub struct CircuitBreaker {
    scopes: DashMap<String, ScopeHealth>,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    half_open_max_attempts: u32,
}

impl CircuitBreaker {
    /// Create a breaker with the given thresholds
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            scopes: DashMap::new(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            timeout: config.timeout,
            half_open_max_attempts: config.half_open_max_attempts.max(1),
        }
    }

    /// Whether a request may be sent to the scope
    ///
    /// Not a pure read: an Open circuit whose timeout has elapsed moves to
    /// HalfOpen here, and every `true` returned while HalfOpen consumes a
    /// trial slot.
    pub fn is_available(&self, scope_key: &str) -> bool {
        // Only recorded outcomes create scope entries
        let Some(mut health) = self.scopes.get_mut(scope_key) else {
            return true;
        };

        let state = health.state;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = Instant::now();
                let elapsed = health
                    .opened_at
                    .map_or(self.timeout, |opened_at| now.duration_since(opened_at));

                if elapsed < self.timeout {
                    return false;
                }

                health.state = CircuitState::HalfOpen;
                health.consecutive_successes = 0;
                health.half_open_attempts = 1;
                drop(health);

                tracing::info!(scope_key, "circuit breaker half-open, allowing trial request");
                true
            }
            CircuitState::HalfOpen => {
                if health.half_open_attempts < self.half_open_max_attempts {
                    health.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful upstream call
    pub fn record_success(&self, scope_key: &str) {
        let mut health = self.scopes.entry(scope_key.to_owned()).or_default();

        let state = health.state;
        match state {
            CircuitState::Closed => health.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                health.consecutive_successes += 1;
                health.half_open_attempts = health.half_open_attempts.saturating_sub(1);

                if health.consecutive_successes >= self.success_threshold {
                    health.close();
                    drop(health);
                    tracing::info!(scope_key, "circuit breaker closed");
                }
            }
            // Late result from a request dispatched before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Give back a trial slot whose request ended without a health verdict
    ///
    /// Used for cancelled requests and attempts that never reached the
    /// upstream or produced no usable outcome. Counters are untouched and
    /// outside HalfOpen this does nothing.
    pub fn release_trial(&self, scope_key: &str) {
        let Some(mut health) = self.scopes.get_mut(scope_key) else {
            return;
        };

        if health.state == CircuitState::HalfOpen {
            health.half_open_attempts = health.half_open_attempts.saturating_sub(1);
            drop(health);
            tracing::debug!(scope_key, "half-open trial released without outcome");
        }
    }

    /// Record a failed upstream call
    #[allow(clippy::needless_pass_by_value)]
    pub fn record_failure(&self, scope_key: &str, error: impl fmt::Display) {
        let mut health = self.scopes.entry(scope_key.to_owned()).or_default();
        let now = Instant::now();

        let state = health.state;
        match state {
            CircuitState::Closed => {
                health.consecutive_failures += 1;
                let failures = health.consecutive_failures;

                if failures >= self.failure_threshold {
                    health.trip(now);
                    let trips = health.trips;
                    drop(health);
                    tracing::warn!(
                        scope_key,
                        consecutive_failures = failures,
                        trips,
                        error = %error,
                        "circuit breaker opened"
                    );
                } else {
                    drop(health);
                    tracing::debug!(
                        scope_key,
                        consecutive_failures = failures,
                        error = %error,
                        "upstream failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                health.trip(now);
                let trips = health.trips;
                drop(health);
                tracing::warn!(scope_key, trips, error = %error, "trial request failed, circuit breaker reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state of a scope; unknown scopes are Closed
    pub fn state(&self, scope_key: &str) -> CircuitState {
        self.scopes
            .get(scope_key)
            .map_or(CircuitState::Closed, |health| health.state)
    }

    pub fn snapshot(&self, scope_key: &str) -> Option<CircuitSnapshot> {
        let now = Instant::now();
        self.scopes
            .get(scope_key)
            .map(|health| snapshot_of(scope_key, &health, now))
    }

    /// Snapshots of every tracked scope, sorted by scope key
    pub fn snapshot_all(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<_> = self
            .scopes
            .iter()
            .map(|entry| snapshot_of(entry.key(), entry.value(), now))
            .collect();
        snapshots.sort_by(|a, b| a.scope_key.cmp(&b.scope_key));
        snapshots
    }

    /// Forget a scope, returning it to a fresh Closed state
    pub fn reset(&self, scope_key: &str) {
        if self.scopes.remove(scope_key).is_some() {
            tracing::info!(scope_key, "circuit breaker reset");
        }
    }

    pub fn reset_all(&self) {
        self.scopes.clear();
        tracing::info!("all circuit breakers reset");
    }

    pub fn global_stats(&self) -> BreakerStats {
        let mut stats = BreakerStats::default();

        for entry in &self.scopes {
            let trips = entry.value().trips;
            stats.total_trips += trips;

            let is_max = stats.most_tripped.as_ref().is_none_or(|(_, max)| trips > *max);
            if trips > 0 && is_max {
                stats.most_tripped = Some((entry.key().clone(), trips));
            }
        }

        stats
    }
}

fn snapshot_of(scope_key: &str, health: &ScopeHealth, now: Instant) -> CircuitSnapshot {
    CircuitSnapshot {
        scope_key: scope_key.to_owned(),
        state: health.state,
        consecutive_failures: health.consecutive_failures,
        consecutive_successes: health.consecutive_successes,
        half_open_attempts: health.half_open_attempts,
        open_for: health.opened_at.map(|opened_at| now.duration_since(opened_at)),
        trips: health.trips,
    }
}
