use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// One upstream endpoint requests can be dispatched to
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Base URL of the OpenAI-compatible API, including any `/v1` prefix
    pub base_url: Url,
    /// Bearer token sent upstream
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Static headers added to every upstream request
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Overrides `stream_retry.max_retries` for this target
    #[serde(default)]
    pub empty_output_retries: Option<u32>,
}

/// Ordered candidate targets for a logical model
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelRouteConfig {
    /// Tried in order; later entries are failover candidates
    pub targets: Vec<RouteTarget>,
}

impl ModelRouteConfig {
    /// Whether failover to another target is structurally possible
    pub fn can_retry(&self) -> bool {
        self.targets.len() > 1
    }
}

/// A target reference inside a model route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTarget {
    /// Key into `[targets]`
    pub target: String,
    /// Model name sent upstream, defaults to the logical model id
    #[serde(default)]
    pub model: Option<String>,
}
