use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Client-facing principal that owns cache policy for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualKey {
    /// Stable identifier, mixed into cache keys so entries never cross tenants
    pub id: String,
    /// Whether non-streaming responses may be served from and stored in the cache
    pub cache_enabled: bool,
    /// Logical models this key may call (`None` = all)
    pub allowed_models: Option<Vec<String>>,
}

impl VirtualKey {
    /// Whether this key may call the given logical model
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models
            .as_ref()
            .is_none_or(|models| models.iter().any(|m| m == model))
    }
}

/// Runtime context for one logical request
///
/// Created when the request is authenticated and carried through every
/// upstream attempt, including failover retries.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique id used to correlate log lines across attempts
    pub request_id: String,
    /// Resolved virtual key
    pub virtual_key: Arc<VirtualKey>,
    /// Triggered when the client goes away before the response completes
    pub cancellation: CancellationToken,
    /// Start of the logical request, used for the failover retry window
    pub started_at: Instant,
}

impl RequestContext {
    /// Create a context for a freshly received request
    pub fn new(virtual_key: Arc<VirtualKey>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            virtual_key,
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Whether the client has disconnected
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(allowed: Option<Vec<String>>) -> Arc<VirtualKey> {
        Arc::new(VirtualKey {
            id: "vk1".to_owned(),
            cache_enabled: true,
            allowed_models: allowed,
        })
    }

    #[tokio::test]
    async fn new_context_is_not_cancelled() {
        let ctx = RequestContext::new(key(None));
        assert!(!ctx.is_cancelled());
        assert!(!ctx.request_id.is_empty());

        ctx.cancellation.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn unrestricted_key_allows_everything() {
        assert!(key(None).allows_model("anything"));
    }

    #[test]
    fn restricted_key_checks_list() {
        let vk = key(Some(vec!["gpt-4o".to_owned()]));
        assert!(vk.allows_model("gpt-4o"));
        assert!(!vk.allows_model("claude"));
    }
}
