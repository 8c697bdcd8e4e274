//! Cross-target failover for failed upstream attempts
//!
//! After an attempt fails, [`Orchestrator::handle_retry`] decides whether
//! another target may take over and, if so, dispatches the request there.
//! The dispatched attempt fails over again through the same path, so a
//! request walks its candidates one at a time until one succeeds, the
//! candidates run out, or the retry window closes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexSet;
use switchyard_config::FailoverConfig;
use switchyard_core::RequestContext;

use crate::error::LlmError;
use crate::provider::{ConfigBuilder, ExecutionConfig, TargetResolver};

/// When a failed attempt may move to another target
#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    /// Budget measured from the start of the logical request
    pub retry_window: Duration,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self::from(&FailoverConfig::default())
    }
}

impl From<&FailoverConfig> for FailoverPolicy {
    fn from(config: &FailoverConfig) -> Self {
        Self {
            retry_window: config.retry_window,
            retryable_status_codes: config.retryable_status_codes.clone(),
        }
    }
}

/// Failover state of one logical request
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub request: RequestContext,
    pub logical_model: String,
    /// Targets already attempted, in attempt order; only ever grows
    pub exclude_targets: IndexSet<String>,
    /// Whether the route offers more than one target
    pub can_retry: bool,
    pub is_stream: bool,
}

impl RetryContext {
    pub fn new(request: RequestContext, logical_model: impl Into<String>, can_retry: bool, is_stream: bool) -> Self {
        Self {
            request,
            logical_model: logical_model.into(),
            exclude_targets: IndexSet::new(),
            can_retry,
            is_stream,
        }
    }

    /// Targets attempted so far, in order
    pub fn attempted(&self) -> Vec<String> {
        self.exclude_targets.iter().cloned().collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.request.started_at.elapsed()
    }
}

/// Why a failed attempt was not retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrySkip {
    /// The route has a single target
    NotRetryable,
    Cancelled,
    WindowElapsed,
    StatusNotRetryable,
    /// Part of a streamed response already reached the client
    HeadersSent,
    NoCandidate,
    /// The next candidate could not be turned into an upstream call
    ConfigFailed,
}

impl fmt::Display for RetrySkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotRetryable => "route has a single target",
            Self::Cancelled => "request cancelled",
            Self::WindowElapsed => "retry window elapsed",
            Self::StatusNotRetryable => "status not retryable",
            Self::HeadersSent => "response headers already sent",
            Self::NoCandidate => "no remaining candidate",
            Self::ConfigFailed => "failover target config could not be built",
        })
    }
}

/// Result of [`Orchestrator::handle_retry`]
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// The caller must surface the original error
    NotRetried(RetrySkip),
    /// A new attempt ran; carries that attempt's final result
    Retried(T),
}

impl<T> RetryOutcome<T> {
    pub const fn is_retried(&self) -> bool {
        matches!(self, Self::Retried(_))
    }
}

/// Re-executes a request against a new target
///
/// Implementations run the same non-stream or stream path as the original
/// attempt, including failover on their own failures.
#[async_trait]
pub trait Dispatch<T>: Send + Sync {
    async fn dispatch(&self, config: ExecutionConfig, ctx: &mut RetryContext) -> Result<T, LlmError>;

    /// Whether the client already received part of the response
    fn headers_sent(&self) -> bool {
        false
    }

    /// A resolved target was dropped before anything was dispatched to it
    fn abandoned(&self, _target_id: &str, _ctx: &RetryContext) {}
}

/// Decides on and executes failover retries
pub struct Orchestrator {
    resolver: Arc<dyn TargetResolver>,
    builder: Arc<dyn ConfigBuilder>,
    policy: FailoverPolicy,
}

impl Orchestrator {
    pub fn new(resolver: Arc<dyn TargetResolver>, builder: Arc<dyn ConfigBuilder>, policy: FailoverPolicy) -> Self {
        Self {
            resolver,
            builder,
            policy,
        }
    }

    pub const fn policy(&self) -> &FailoverPolicy {
        &self.policy
    }

    /// Retry a failed attempt against the next candidate target
    ///
    /// The chosen target joins `ctx.exclude_targets` before it is dispatched.
    /// Once a retry has been dispatched the original error is superseded by
    /// whatever that retry returns. A candidate whose config cannot be built
    /// counts as not retried.
    pub async fn handle_retry<T: Send>(
        &self,
        status: u16,
        ctx: &mut RetryContext,
        dispatch: &dyn Dispatch<T>,
    ) -> RetryOutcome<Result<T, LlmError>> {
        if let Some(skip) = self.check(status, ctx, dispatch.headers_sent()) {
            tracing::debug!(
                request_id = %ctx.request.request_id,
                model = %ctx.logical_model,
                status,
                reason = %skip,
                "not failing over"
            );
            return RetryOutcome::NotRetried(skip);
        }

        let candidate = match self.resolver.resolve_next(&ctx.logical_model, &ctx.exclude_targets).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                tracing::warn!(
                    request_id = %ctx.request.request_id,
                    model = %ctx.logical_model,
                    attempted = ?ctx.exclude_targets,
                    "no failover candidate left"
                );
                return RetryOutcome::NotRetried(RetrySkip::NoCandidate);
            }
            Err(e) => {
                tracing::warn!(model = %ctx.logical_model, error = %e, "failover resolution failed");
                return RetryOutcome::NotRetried(RetrySkip::NoCandidate);
            }
        };

        tracing::info!(
            request_id = %ctx.request.request_id,
            model = %ctx.logical_model,
            from = ?ctx.exclude_targets.last(),
            to = %candidate.target_id,
            status,
            "failing over to next target"
        );
        ctx.exclude_targets.insert(candidate.target_id.clone());

        match self
            .builder
            .build_config(&candidate, &ctx.request.virtual_key, &ctx.logical_model)
            .await
        {
            Ok(config) => RetryOutcome::Retried(dispatch.dispatch(config, ctx).await),
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request.request_id,
                    target_id = %candidate.target_id,
                    error = %e,
                    "failover target config failed"
                );
                dispatch.abandoned(&candidate.target_id, ctx);
                RetryOutcome::NotRetried(RetrySkip::ConfigFailed)
            }
        }
    }

    fn check(&self, status: u16, ctx: &RetryContext, headers_sent: bool) -> Option<RetrySkip> {
        if !ctx.can_retry {
            return Some(RetrySkip::NotRetryable);
        }
        if ctx.request.is_cancelled() {
            return Some(RetrySkip::Cancelled);
        }
        if ctx.elapsed() > self.policy.retry_window {
            return Some(RetrySkip::WindowElapsed);
        }
        if !self.policy.retryable_status_codes.contains(&status) {
            return Some(RetrySkip::StatusNotRetryable);
        }
        if ctx.is_stream && headers_sent {
            return Some(RetrySkip::HeadersSent);
        }
        None
    }
}
