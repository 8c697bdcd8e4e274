use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

/// A response held by the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// Response payload as returned by the upstream
    pub body: serde_json::Value,
    /// Response headers worth replaying on a hit
    pub headers: BTreeMap<String, String>,
}

/// Cumulative cache counters plus current occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate as a percentage of all lookups
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64 * 100.0
    }
}

struct CacheEntry {
    response: Arc<CachedResponse>,
    inserted_at: Instant,
    ttl: Duration,
    /// Position in `CacheInner::access_order`
    access: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Access counter to key; the first entry is the least recently accessed
    access_order: BTreeMap<u64, String>,
    counter: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn next_access(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.access_order.remove(&entry.access);
        Some(entry)
    }

    fn evict_least_recent(&mut self) {
        let Some((_, key)) = self.access_order.pop_first() else {
            return;
        };
        self.entries.remove(&key);
        self.evictions += 1;
        tracing::debug!(cache_key = %key, "evicted least recently accessed entry");
    }
}

/// In-process response cache with per-entry TTL and LRU eviction
///
/// Every operation takes the lock once and never suspends while holding it,
/// so a lookup, an insert, or an evict-then-insert is atomic with respect to
/// other requests.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// Look up a response
    ///
    /// Expired entries are removed here and reported as a miss. A hit marks
    /// the entry as the most recently accessed.
    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let mut inner = self.lock();
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                tracing::debug!(cache_key = key, "cache miss");
                return None;
            }
            Some(entry) => now.duration_since(entry.inserted_at) > entry.ttl,
        };

        if expired {
            inner.remove(key);
            inner.misses += 1;
            tracing::debug!(cache_key = key, "cache entry expired");
            return None;
        }

        let access = inner.next_access();
        let entry = inner.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut entry.access, access);
        let response = Arc::clone(&entry.response);

        inner.access_order.remove(&previous);
        inner.access_order.insert(access, key.to_owned());
        inner.hits += 1;
        tracing::debug!(cache_key = key, "cache hit");

        Some(response)
    }

    /// Store a response, using the default TTL when `ttl` is `None`
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// accessed entry. Overwriting an existing key never evicts.
    pub fn set(&self, key: impl Into<String>, response: impl Into<Arc<CachedResponse>>, ttl: Option<Duration>) {
        let key = key.into();
        let mut inner = self.lock();

        if inner.remove(&key).is_none() && inner.entries.len() >= self.capacity {
            inner.evict_least_recent();
        }

        let access = inner.next_access();
        let ttl = ttl.unwrap_or(self.default_ttl);
        inner.access_order.insert(access, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                response: response.into(),
                inserted_at: Instant::now(),
                ttl,
                access,
            },
        );
    }

    /// Drop every entry; counters are kept
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.access_order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(text: &str) -> CachedResponse {
        CachedResponse {
            body: json!({"choices": [{"message": {"content": text}}]}),
            headers: BTreeMap::from([("content-type".to_owned(), "application/json".to_owned())]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_accessed() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", response("a"), None);
        cache.set("b", response("b"), None);

        assert!(cache.get("a").is_some());
        cache.set("c", response("c"), None);

        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").unwrap().body, response("a").body);
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overwriting_existing_key_does_not_evict() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", response("a"), None);
        cache.set("b", response("b"), None);
        cache.set("a", response("a2"), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a").unwrap().body, response("a2").body);
        assert!(cache.get("b").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_removed_on_access() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.set("k", response("v"), Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("k").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_applies_when_unset() {
        let cache = ResponseCache::new(10, Duration::from_secs(1));
        cache.set("k", response("v"), None);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(cache.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_entries_and_keeps_counters() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.set("a", response("a"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("missing").is_none());

        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.capacity, 10);
    }

    #[test]
    fn hit_rate_is_percentage() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert!(CacheStats::default().hit_rate().abs() < f64::EPSILON);
    }
}
