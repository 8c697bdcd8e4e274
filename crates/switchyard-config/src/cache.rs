use std::time::Duration;

use serde::Deserialize;

/// Response cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of cached responses before LRU eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// TTL applied when a caller does not pass one
    #[serde(default = "default_ttl", deserialize_with = "crate::duration::deserialize")]
    pub default_ttl: Duration,
    /// How often hit/miss statistics are logged
    #[serde(default = "default_stats_interval", deserialize_with = "crate::duration::deserialize")]
    pub stats_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_ttl: default_ttl(),
            stats_interval: default_stats_interval(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_entries() -> usize {
    1000
}

#[allow(clippy::missing_const_for_fn)]
fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

#[allow(clippy::missing_const_for_fn)]
fn default_stats_interval() -> Duration {
    Duration::from_secs(3600)
}
