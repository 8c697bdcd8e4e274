//! In-process exact-match response cache for LLM completions
//!
//! Non-streaming completion responses are keyed by a SHA-256 hash of the
//! normalized request combined with the owning virtual key, held for a TTL,
//! and evicted least-recently-accessed first once the cache is full.

#![allow(clippy::must_use_candidate)]

mod key;
mod policy;
mod stats;
mod store;

pub use key::generate_cache_key;
pub use policy::{CACHE_STATUS_HEADER, CacheRequestKind, CacheStatus, cache_status, cacheable_key};
pub use stats::spawn_stats_logger;
pub use store::{CacheStats, CachedResponse, ResponseCache};
