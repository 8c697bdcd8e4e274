//! Config-driven target resolution
//!
//! Each logical model lists its targets in fallback order. Resolution walks
//! that list, skipping targets already attempted for the request and targets
//! whose circuit for this model is open.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use switchyard_config::{ModelRouteConfig, StreamRetryConfig, TargetConfig};
use switchyard_core::{VirtualKey, scope_key};

use crate::error::LlmError;
use crate::health::CircuitBreaker;
use crate::provider::{Candidate, ConfigBuilder, ExecutionConfig, TargetResolver};

/// Fallback-order resolver over the configured model routes
pub struct ConfiguredResolver {
    models: IndexMap<String, ModelRouteConfig>,
    breaker: Arc<CircuitBreaker>,
}

impl ConfiguredResolver {
    pub fn new(models: IndexMap<String, ModelRouteConfig>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { models, breaker }
    }

    fn route(&self, logical_model: &str) -> Result<&ModelRouteConfig, LlmError> {
        self.models.get(logical_model).ok_or_else(|| LlmError::ModelNotFound {
            model: logical_model.to_owned(),
        })
    }
}

#[async_trait]
impl TargetResolver for ConfiguredResolver {
    async fn resolve_next(
        &self,
        logical_model: &str,
        exclude: &IndexSet<String>,
    ) -> Result<Option<Candidate>, LlmError> {
        let route = self.route(logical_model)?;

        for target in &route.targets {
            if exclude.contains(&target.target) {
                continue;
            }

            let scope = scope_key(&target.target, Some(logical_model));
            if !self.breaker.is_available(&scope) {
                tracing::debug!(scope_key = %scope, "skipping target with open circuit");
                continue;
            }

            return Ok(Some(Candidate {
                target_id: target.target.clone(),
                model: target.model.clone(),
            }));
        }

        Ok(None)
    }

    fn can_retry(&self, logical_model: &str) -> bool {
        self.models.get(logical_model).is_some_and(ModelRouteConfig::can_retry)
    }

    fn models(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

/// Builds execution configs from `[targets]`
pub struct ConfiguredBuilder {
    targets: IndexMap<String, TargetConfig>,
    stream_retry: StreamRetryConfig,
}

impl ConfiguredBuilder {
    pub fn new(targets: IndexMap<String, TargetConfig>, stream_retry: StreamRetryConfig) -> Self {
        Self { targets, stream_retry }
    }
}

#[async_trait]
impl ConfigBuilder for ConfiguredBuilder {
    async fn build_config(
        &self,
        candidate: &Candidate,
        virtual_key: &VirtualKey,
        logical_model: &str,
    ) -> Result<ExecutionConfig, LlmError> {
        let target = self.targets.get(&candidate.target_id).ok_or_else(|| {
            LlmError::Internal(anyhow::anyhow!("route references unknown target {}", candidate.target_id))
        })?;

        tracing::trace!(
            target_id = %candidate.target_id,
            virtual_key = %virtual_key.id,
            "building upstream config"
        );

        Ok(ExecutionConfig {
            target_id: candidate.target_id.clone(),
            base_url: target.base_url.clone(),
            api_key: target.api_key.clone(),
            headers: target.headers.clone(),
            model: candidate.model.clone().unwrap_or_else(|| logical_model.to_owned()),
            empty_output_retries: Some(target.empty_output_retries.unwrap_or(self.stream_retry.max_retries)),
        })
    }
}
