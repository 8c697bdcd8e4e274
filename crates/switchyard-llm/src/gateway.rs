//! Request pipeline tying the resilience pieces together
//!
//! A request is checked against the cache, dispatched to its first target,
//! recorded against that target's circuit, and handed to the failover
//! orchestrator when it fails. Streaming requests run each target attempt
//! under the empty-output retry manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchyard_cache::{CacheRequestKind, CacheStatus, CachedResponse, ResponseCache, cache_status, cacheable_key};
use switchyard_config::Config;
use switchyard_core::{RequestContext, scope_key};
use tokio_util::sync::CancellationToken;

use crate::aggregate::ChatStreamAggregate;
use crate::error::LlmError;
use crate::failover::{Dispatch, FailoverPolicy, Orchestrator, RetryContext, RetryOutcome};
use crate::health::CircuitBreaker;
use crate::provider::openai::OpenAiTransport;
use crate::provider::{ConfigBuilder, ExecutionConfig, TargetResolver, Transport};
use crate::routing::{ConfiguredBuilder, ConfiguredResolver};
use crate::stream::{ClientStream, StreamBuffer};
use crate::stream_retry::{StreamProcessor, StreamRetryManager};

/// Source tag of chat completion streams in empty-output errors
pub const CHAT_STREAM_SOURCE: &str = "chat_completions";

/// Everything a [`Gateway`] is assembled from
pub struct GatewayComponents {
    pub resolver: Arc<dyn TargetResolver>,
    pub builder: Arc<dyn ConfigBuilder>,
    pub transport: Arc<dyn Transport>,
    pub breaker: Arc<CircuitBreaker>,
    pub cache: Arc<ResponseCache>,
    pub failover: FailoverPolicy,
    /// Empty-output retries when the target config sets none
    pub stream_max_retries: u32,
}

/// Result of a non-streaming request
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// Target that produced the response; `None` for a cache hit
    pub target_id: Option<String>,
    /// Targets attempted, in order
    pub attempted: Vec<String>,
    pub cache_status: CacheStatus,
    pub response: Arc<CachedResponse>,
}

/// Result of a streaming request whose output was delivered
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub target_id: String,
    pub attempted: Vec<String>,
    pub aggregate: ChatStreamAggregate,
}

/// Shared gateway state, cheap to clone into handlers
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    resolver: Arc<dyn TargetResolver>,
    builder: Arc<dyn ConfigBuilder>,
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<ResponseCache>,
    orchestrator: Orchestrator,
    stream_max_retries: u32,
}

impl Gateway {
    pub fn new(components: GatewayComponents) -> Self {
        let orchestrator = Orchestrator::new(
            Arc::clone(&components.resolver),
            Arc::clone(&components.builder),
            components.failover,
        );

        Self {
            inner: Arc::new(GatewayInner {
                resolver: components.resolver,
                builder: components.builder,
                transport: components.transport,
                breaker: components.breaker,
                cache: components.cache,
                orchestrator,
                stream_max_retries: components.stream_max_retries,
            }),
        }
    }

    /// Build a gateway over the configured targets with the HTTP transport
    pub fn from_config(config: &Config) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
        let cache = Arc::new(ResponseCache::new(config.cache.max_entries, config.cache.default_ttl));

        Self::new(GatewayComponents {
            resolver: Arc::new(ConfiguredResolver::new(config.models.clone(), Arc::clone(&breaker))),
            builder: Arc::new(ConfiguredBuilder::new(
                config.targets.clone(),
                config.stream_retry.clone(),
            )),
            transport: Arc::new(OpenAiTransport::default()),
            breaker,
            cache,
            failover: FailoverPolicy::from(&config.failover),
            stream_max_retries: config.stream_retry.max_retries,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.inner.cache
    }

    /// Logical models clients can request
    pub fn models(&self) -> Vec<String> {
        self.inner.resolver.models()
    }

    /// Serve a non-streaming chat completion
    pub async fn complete(&self, context: &RequestContext, body: Value) -> Result<CompletionOutcome, LlmError> {
        let logical_model = requested_model(context, &body)?;
        let virtual_key = &context.virtual_key;

        let cache_key = cacheable_key(
            virtual_key.cache_enabled,
            false,
            CacheRequestKind::ChatCompletion,
            Some(&body),
            &virtual_key.id,
        );

        // Checked before resolution so a hit never consumes a half-open trial
        if let Some(key) = &cache_key
            && let Some(response) = self.inner.cache.get(key)
        {
            tracing::debug!(request_id = %context.request_id, model = %logical_model, "served from cache");
            return Ok(CompletionOutcome {
                target_id: None,
                attempted: Vec::new(),
                cache_status: CacheStatus::Hit,
                response,
            });
        }

        let mut ctx = RetryContext::new(
            context.clone(),
            logical_model.clone(),
            self.inner.resolver.can_retry(&logical_model),
            false,
        );
        let config = self.first_attempt(&mut ctx).await?;

        let attempt = CompleteAttempt {
            inner: &self.inner,
            body: &body,
            cache_key: cache_key.as_deref(),
        };
        attempt.dispatch(config, &mut ctx).await
    }

    /// Serve a streaming chat completion into `client`
    ///
    /// Output only reaches `client` once an attempt has produced usable
    /// content; an `Err` means nothing was written.
    pub async fn stream(
        &self,
        context: &RequestContext,
        body: Value,
        client: Arc<ClientStream>,
    ) -> Result<StreamOutcome, LlmError> {
        let logical_model = requested_model(context, &body)?;

        let mut ctx = RetryContext::new(
            context.clone(),
            logical_model.clone(),
            self.inner.resolver.can_retry(&logical_model),
            true,
        );
        let config = self.first_attempt(&mut ctx).await?;

        let attempt = StreamAttempt {
            inner: &self.inner,
            body: &body,
            client: &client,
        };
        attempt.dispatch(config, &mut ctx).await
    }

    async fn first_attempt(&self, ctx: &mut RetryContext) -> Result<ExecutionConfig, LlmError> {
        let candidate = self
            .inner
            .resolver
            .resolve_next(&ctx.logical_model, &ctx.exclude_targets)
            .await?
            .ok_or_else(|| {
                tracing::warn!(model = %ctx.logical_model, "every target for the model is unavailable");
                LlmError::NoTarget {
                    model: ctx.logical_model.clone(),
                }
            })?;

        ctx.exclude_targets.insert(candidate.target_id.clone());
        self.inner
            .builder
            .build_config(&candidate, &ctx.request.virtual_key, &ctx.logical_model)
            .await
            .inspect_err(|_| {
                let scope = scope_key(&candidate.target_id, Some(&ctx.logical_model));
                self.inner.breaker.release_trial(&scope);
            })
    }
}

fn requested_model(context: &RequestContext, body: &Value) -> Result<String, LlmError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| LlmError::InvalidRequest("`model` is required".to_owned()))?;

    if !context.virtual_key.allows_model(model) {
        return Err(LlmError::ModelNotAllowed {
            model: model.to_owned(),
        });
    }

    Ok(model.to_owned())
}

/// One non-streaming attempt, failing over on error
struct CompleteAttempt<'a> {
    inner: &'a GatewayInner,
    body: &'a Value,
    cache_key: Option<&'a str>,
}

#[async_trait]
impl Dispatch<CompletionOutcome> for CompleteAttempt<'_> {
    async fn dispatch(&self, config: ExecutionConfig, ctx: &mut RetryContext) -> Result<CompletionOutcome, LlmError> {
        let scope = scope_key(&config.target_id, Some(&ctx.logical_model));
        let started = tokio::time::Instant::now();

        let result = self
            .inner
            .transport
            .complete(&config, self.body, &ctx.request.cancellation)
            .await;

        match result {
            Ok(upstream) => {
                self.inner.breaker.record_success(&scope);
                tracing::debug!(
                    request_id = %ctx.request.request_id,
                    target_id = %config.target_id,
                    latency_ms = duration_ms(started.elapsed()),
                    "upstream completion succeeded"
                );

                let response = Arc::new(CachedResponse {
                    body: upstream.body,
                    headers: upstream.headers,
                });
                if let Some(key) = self.cache_key {
                    self.inner.cache.set(key, Arc::clone(&response), None);
                }

                Ok(CompletionOutcome {
                    target_id: Some(config.target_id),
                    attempted: ctx.attempted(),
                    cache_status: cache_status(false, self.cache_key.is_some()),
                    response,
                })
            }
            Err(error) if !error.is_upstream_failure() => {
                self.inner.breaker.release_trial(&scope);
                Err(error)
            }
            Err(error) => {
                self.inner.breaker.record_failure(&scope, &error);
                match self.inner.orchestrator.handle_retry(error.status(), ctx, self).await {
                    RetryOutcome::Retried(result) => result,
                    RetryOutcome::NotRetried(_) => Err(error),
                }
            }
        }
    }

    fn abandoned(&self, target_id: &str, ctx: &RetryContext) {
        self.inner
            .breaker
            .release_trial(&scope_key(target_id, Some(&ctx.logical_model)));
    }
}

/// One streaming attempt against a target, with empty-output retries
struct StreamAttempt<'a> {
    inner: &'a GatewayInner,
    body: &'a Value,
    client: &'a Arc<ClientStream>,
}

#[async_trait]
impl Dispatch<StreamOutcome> for StreamAttempt<'_> {
    async fn dispatch(&self, config: ExecutionConfig, ctx: &mut RetryContext) -> Result<StreamOutcome, LlmError> {
        let scope = scope_key(&config.target_id, Some(&ctx.logical_model));
        let max_retries = config.empty_output_retries.unwrap_or(self.inner.stream_max_retries);

        let manager = StreamRetryManager::new(
            CHAT_STREAM_SOURCE,
            max_retries,
            ChatStreamAggregate::is_empty_output,
            ChatStreamAggregate::should_bypass_retry,
            ctx.request.cancellation.clone(),
        );
        let processor = TargetStream {
            transport: self.inner.transport.as_ref(),
            config: &config,
            body: self.body,
        };

        match manager.execute(&processor, self.client).await {
            Ok(aggregate) => {
                // An error reported inside the stream proves nothing about health
                if aggregate.error.is_some() {
                    self.inner.breaker.release_trial(&scope);
                } else {
                    self.inner.breaker.record_success(&scope);
                }
                Ok(StreamOutcome {
                    target_id: config.target_id,
                    attempted: ctx.attempted(),
                    aggregate,
                })
            }
            // Cancellation and empty output say nothing about upstream health
            Err(error) if !error.is_upstream_failure() => {
                self.inner.breaker.release_trial(&scope);
                Err(error)
            }
            Err(error) => {
                self.inner.breaker.record_failure(&scope, &error);
                match self.inner.orchestrator.handle_retry(error.status(), ctx, self).await {
                    RetryOutcome::Retried(result) => result,
                    RetryOutcome::NotRetried(_) => Err(error),
                }
            }
        }
    }

    fn headers_sent(&self) -> bool {
        self.client.headers_sent()
    }

    fn abandoned(&self, target_id: &str, ctx: &RetryContext) {
        self.inner
            .breaker
            .release_trial(&scope_key(target_id, Some(&ctx.logical_model)));
    }
}

/// Adapts a transport stream call to the retry manager
struct TargetStream<'a> {
    transport: &'a dyn Transport,
    config: &'a ExecutionConfig,
    body: &'a Value,
}

#[async_trait]
impl StreamProcessor<ChatStreamAggregate> for TargetStream<'_> {
    async fn process(
        &self,
        buffer: &mut StreamBuffer,
        cancel: &CancellationToken,
    ) -> Result<ChatStreamAggregate, LlmError> {
        self.transport.stream(self.config, self.body, buffer, cancel).await
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
