//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use switchyard_config::{
    CircuitBreakerConfig, Config, HealthConfig, ModelRouteConfig, RouteTarget, ServerConfig, TargetConfig,
    VirtualKeyConfig,
};

/// Token of the virtual key every builder starts with
pub const DEFAULT_KEY: &str = "sk-test-default";

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with one uncached virtual key and no routes
    pub fn new() -> Self {
        Self {
            config: Config {
                server: ServerConfig {
                    listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                    health: HealthConfig {
                        enabled: true,
                        ..HealthConfig::default()
                    },
                },
                virtual_keys: vec![VirtualKeyConfig {
                    id: "default".to_owned(),
                    key: SecretString::from(DEFAULT_KEY),
                    cache_enabled: false,
                    allowed_models: None,
                }],
                ..Config::default()
            },
        }
    }

    /// Add an OpenAI-compatible target pointed at a mock backend
    pub fn with_target(mut self, id: &str, base_url: &str) -> Self {
        self.config.targets.insert(
            id.to_owned(),
            TargetConfig {
                base_url: base_url.parse().expect("valid URL"),
                api_key: Some(SecretString::from("test-upstream-key")),
                headers: IndexMap::new(),
                empty_output_retries: None,
            },
        );
        self
    }

    /// Route a logical model to targets in fallback order
    pub fn with_model(mut self, model: &str, targets: &[&str]) -> Self {
        self.config.models.insert(
            model.to_owned(),
            ModelRouteConfig {
                targets: targets
                    .iter()
                    .map(|target| RouteTarget {
                        target: (*target).to_owned(),
                        model: None,
                    })
                    .collect(),
            },
        );
        self
    }

    /// Add another virtual key
    pub fn with_virtual_key(mut self, id: &str, token: &str, cache_enabled: bool, allowed_models: Option<&[&str]>) -> Self {
        self.config.virtual_keys.push(VirtualKeyConfig {
            id: id.to_owned(),
            key: SecretString::from(token.to_owned()),
            cache_enabled,
            allowed_models: allowed_models.map(|models| models.iter().map(|m| (*m).to_owned()).collect()),
        });
        self
    }

    /// Open circuits after `failure_threshold` consecutive failures
    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold,
            timeout: Duration::from_secs(60),
            ..CircuitBreakerConfig::default()
        };
        self
    }

    /// Set the empty-output retry budget for streaming requests
    pub fn with_stream_retries(mut self, max_retries: u32) -> Self {
        self.config.stream_retry.max_retries = max_retries;
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    /// Build and validate the final config
    pub fn build(self) -> Config {
        self.config.validate().expect("test config is valid");
        self.config
    }
}
