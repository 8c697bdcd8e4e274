use std::time::Duration;

use serde::Deserialize;

/// Circuit breaker thresholds, shared by every scope key
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Successes in HalfOpen that close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// How long the circuit stays Open before allowing trial requests
    #[serde(default = "default_open_timeout", deserialize_with = "crate::duration::deserialize")]
    pub timeout: Duration,
    /// Concurrent trial requests allowed while HalfOpen
    #[serde(default = "default_half_open_max_attempts")]
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout: default_open_timeout(),
            half_open_max_attempts: default_half_open_max_attempts(),
        }
    }
}

/// Empty-output retry policy for streaming calls
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamRetryConfig {
    /// Retries after the first attempt; a target's `empty_output_retries` wins
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for StreamRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Cross-target failover policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailoverConfig {
    /// Wall-clock budget, from request start, within which failover may happen
    #[serde(default = "default_retry_window", deserialize_with = "crate::duration::deserialize")]
    pub retry_window: Duration,
    /// Upstream statuses that make a failed attempt eligible for failover
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retry_window: default_retry_window(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_failure_threshold() -> u32 {
    2
}

#[allow(clippy::missing_const_for_fn)]
fn default_success_threshold() -> u32 {
    2
}

#[allow(clippy::missing_const_for_fn)]
fn default_open_timeout() -> Duration {
    Duration::from_secs(120)
}

#[allow(clippy::missing_const_for_fn)]
fn default_half_open_max_attempts() -> u32 {
    3
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_retries() -> u32 {
    2
}

#[allow(clippy::missing_const_for_fn)]
fn default_retry_window() -> Duration {
    Duration::from_secs(10)
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}
