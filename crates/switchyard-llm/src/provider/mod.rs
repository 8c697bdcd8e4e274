//! Collaborators the gateway dispatches through
//!
//! Target resolution, per-target configuration and the wire transport are
//! traits so the retry machinery can be exercised without real upstreams.

pub mod openai;

use std::collections::BTreeMap;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use secrecy::SecretString;
use serde_json::Value;
use switchyard_core::VirtualKey;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::aggregate::ChatStreamAggregate;
use crate::error::LlmError;
use crate::stream::StreamBuffer;

/// Next target to try for a logical model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub target_id: String,
    /// Model name to send upstream instead of the logical id
    pub model: Option<String>,
}

/// Everything the transport needs to call one target
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub target_id: String,
    pub base_url: Url,
    pub api_key: Option<SecretString>,
    pub headers: IndexMap<String, String>,
    /// Model name sent upstream
    pub model: String,
    /// Empty-output retries for streaming calls against this target
    pub empty_output_retries: Option<u32>,
}

/// Successful non-streaming upstream response
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    /// Upstream headers worth passing on to the client
    pub headers: BTreeMap<String, String>,
}

/// Picks targets for a logical model
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Next candidate not in `exclude`, or `None` when none remain
    ///
    /// Fails with [`LlmError::ModelNotFound`] for a model without a route.
    async fn resolve_next(&self, logical_model: &str, exclude: &IndexSet<String>)
    -> Result<Option<Candidate>, LlmError>;

    /// Whether more than one target can serve the model
    fn can_retry(&self, logical_model: &str) -> bool;

    /// Logical models clients may request
    fn models(&self) -> Vec<String>;
}

/// Turns a candidate into a transport configuration
#[async_trait]
pub trait ConfigBuilder: Send + Sync {
    async fn build_config(
        &self,
        candidate: &Candidate,
        virtual_key: &VirtualKey,
        logical_model: &str,
    ) -> Result<ExecutionConfig, LlmError>;
}

/// Executes calls against one target
///
/// Errors carry the upstream status where there is one. Both calls must
/// return [`LlmError::Cancelled`] promptly once `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(
        &self,
        config: &ExecutionConfig,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, LlmError>;

    /// Stream one attempt, enqueueing every client-bound chunk into `buffer`
    async fn stream(
        &self,
        config: &ExecutionConfig,
        body: &Value,
        buffer: &mut StreamBuffer,
        cancel: &CancellationToken,
    ) -> Result<ChatStreamAggregate, LlmError>;
}
