use std::fmt;

use serde_json::Value;

use crate::generate_cache_key;

/// Response header carrying the cache outcome of a request
pub const CACHE_STATUS_HEADER: &str = "x-switchyard-cache";

/// Kind of upstream call a request maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRequestKind {
    ChatCompletion,
    Embeddings,
}

/// Cache key for a request, or `None` when it must bypass the cache
///
/// Only non-streaming, non-embeddings requests with a body, owned by a
/// virtual key with caching enabled, are eligible.
pub fn cacheable_key(
    cache_enabled: bool,
    is_stream: bool,
    kind: CacheRequestKind,
    body: Option<&Value>,
    virtual_key_id: &str,
) -> Option<String> {
    if !cache_enabled || is_stream || kind == CacheRequestKind::Embeddings {
        return None;
    }
    body.map(|body| generate_cache_key(body, virtual_key_id))
}

/// Cache outcome reported to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Disabled,
}

impl CacheStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const fn cache_status(from_cache: bool, should_cache: bool) -> CacheStatus {
    match (from_cache, should_cache) {
        (true, _) => CacheStatus::Hit,
        (false, true) => CacheStatus::Miss,
        (false, false) => CacheStatus::Disabled,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn only_eligible_requests_get_a_key() {
        let body = json!({"model": "gpt-4o", "messages": []});
        let chat = CacheRequestKind::ChatCompletion;

        assert!(cacheable_key(true, false, chat, Some(&body), "vk").is_some());
        assert!(cacheable_key(false, false, chat, Some(&body), "vk").is_none());
        assert!(cacheable_key(true, true, chat, Some(&body), "vk").is_none());
        assert!(cacheable_key(true, false, CacheRequestKind::Embeddings, Some(&body), "vk").is_none());
        assert!(cacheable_key(true, false, chat, None, "vk").is_none());
    }

    #[test]
    fn key_matches_generated_key() {
        let body = json!({"model": "gpt-4o"});
        assert_eq!(
            cacheable_key(true, false, CacheRequestKind::ChatCompletion, Some(&body), "vk"),
            Some(generate_cache_key(&body, "vk"))
        );
    }

    #[test]
    fn status_header_values() {
        assert_eq!(cache_status(true, true).to_string(), "hit");
        assert_eq!(cache_status(false, true).to_string(), "miss");
        assert_eq!(cache_status(false, false).to_string(), "disabled");
    }
}
