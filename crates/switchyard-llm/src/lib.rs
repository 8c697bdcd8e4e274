//! Resilience layer for the switchyard gateway
//!
//! Circuit breaking per `target::model` scope, empty-output retries for
//! streamed completions, and cross-target failover, wired into a
//! [`Gateway`] that fronts any number of OpenAI-compatible upstreams.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod aggregate;
pub mod error;
pub mod failover;
pub mod gateway;
pub mod health;
pub mod provider;
#[cfg(feature = "http")]
pub mod router;
pub mod routing;
pub mod stream;
pub mod stream_retry;

pub use aggregate::ChatStreamAggregate;
pub use error::{EmptyOutputDetails, LlmError};
pub use failover::{FailoverPolicy, Orchestrator, RetryContext};
pub use gateway::{CompletionOutcome, Gateway, GatewayComponents, StreamOutcome};
pub use health::{CircuitBreaker, CircuitState};
#[cfg(feature = "http")]
pub use router::llm_router;
pub use stream::{ClientStream, StreamBuffer};
pub use stream_retry::StreamRetryManager;
