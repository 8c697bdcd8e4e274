use secrecy::SecretString;
use serde::Deserialize;

/// A client credential
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtualKeyConfig {
    /// Stable identifier used for cache isolation and logging
    pub id: String,
    /// Bearer token presented by the client
    pub key: SecretString,
    /// Serve and store non-streaming responses from the cache
    #[serde(default)]
    pub cache_enabled: bool,
    /// Restrict the key to these logical models
    #[serde(default)]
    pub allowed_models: Option<Vec<String>>,
}
