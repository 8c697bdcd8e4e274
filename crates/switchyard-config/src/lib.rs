//! Configuration for switchyard
//!
//! Loaded from a single TOML file. `{{ env.VAR }}` placeholders are
//! expanded before parsing, then the result is validated as a whole.

#![allow(clippy::must_use_candidate)]

pub mod cache;
mod duration;
mod env;
mod loader;
pub mod resilience;
pub mod routing;
pub mod server;
pub mod telemetry;
pub mod virtual_key;

use indexmap::IndexMap;
use serde::Deserialize;

pub use cache::*;
pub use env::{EnvError, expand_env};
pub use resilience::*;
pub use routing::*;
pub use server::*;
pub use telemetry::*;
pub use virtual_key::*;

/// Top-level switchyard configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Log output settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Per-scope circuit breaker thresholds
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// In-process response cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Empty-output retries for streaming calls
    #[serde(default)]
    pub stream_retry: StreamRetryConfig,
    /// Cross-target failover
    #[serde(default)]
    pub failover: FailoverConfig,
    /// Upstream targets keyed by id
    #[serde(default)]
    pub targets: IndexMap<String, TargetConfig>,
    /// Logical models keyed by the name clients send
    #[serde(default)]
    pub models: IndexMap<String, ModelRouteConfig>,
    /// Client credentials
    #[serde(default)]
    pub virtual_keys: Vec<VirtualKeyConfig>,
}
