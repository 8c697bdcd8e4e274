use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use secrecy::ExposeSecret;
use switchyard_config::VirtualKeyConfig;
use switchyard_core::{RequestContext, VirtualKey};
use switchyard_llm::LlmError;
use switchyard_llm::router::error_response;

/// Bearer tokens mapped to the virtual keys they authenticate
#[derive(Clone, Default)]
pub struct KeyStore {
    keys: Arc<HashMap<String, Arc<VirtualKey>>>,
}

impl KeyStore {
    pub fn from_config(keys: &[VirtualKeyConfig]) -> Self {
        let keys = keys
            .iter()
            .map(|key| {
                let virtual_key = VirtualKey {
                    id: key.id.clone(),
                    cache_enabled: key.cache_enabled,
                    allowed_models: key.allowed_models.clone(),
                };
                (key.key.expose_secret().to_owned(), Arc::new(virtual_key))
            })
            .collect();

        Self { keys: Arc::new(keys) }
    }

    fn lookup(&self, token: &str) -> Option<Arc<VirtualKey>> {
        self.keys.get(token).cloned()
    }
}

/// Authenticate requests by virtual key
///
/// Resolves `Authorization: Bearer <key>` and inserts a fresh
/// [`RequestContext`] for the handlers. Unknown or missing keys get 401.
pub async fn virtual_key_middleware(store: KeyStore, mut request: Request, next: Next) -> Response {
    let virtual_key = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .and_then(|token| store.lookup(token));

    let Some(virtual_key) = virtual_key else {
        tracing::debug!(path = %request.uri().path(), "rejecting request without a valid virtual key");
        return error_response(&LlmError::Unauthorized);
    };

    let context = RequestContext::new(virtual_key);
    tracing::debug!(
        request_id = %context.request_id,
        virtual_key = %context.virtual_key.id,
        "authenticated request"
    );
    request.extensions_mut().insert(context);

    next.run(request).await
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn parses_bearer_scheme_case_insensitively() {
        assert_eq!(bearer_token("Bearer sk-1"), Some("sk-1"));
        assert_eq!(bearer_token("bearer  sk-1 "), Some("sk-1"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("sk-1"), None);
    }

    #[test]
    fn store_resolves_configured_tokens() {
        let store = KeyStore::from_config(&[VirtualKeyConfig {
            id: "team-a".to_owned(),
            key: SecretString::from("sk-team-a"),
            cache_enabled: true,
            allowed_models: Some(vec!["gpt".to_owned()]),
        }]);

        let key = store.lookup("sk-team-a").unwrap();
        assert_eq!(key.id, "team-a");
        assert!(key.cache_enabled);
        assert!(!key.allows_model("other"));
        assert!(store.lookup("sk-unknown").is_none());
    }
}
