//! Empty-output retries for streaming calls
//!
//! Some upstreams occasionally finish a stream successfully without producing
//! any assistant output. Each attempt writes into its own [`StreamBuffer`];
//! only an attempt judged non-empty is flushed to the client, so output from
//! a discarded attempt can never reach the transport.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{EmptyOutputDetails, LlmError};
use crate::stream::{ClientStream, StreamBuffer};

/// Metadata an attempt aggregate exposes for diagnostics
pub trait StreamAggregate: Send {
    fn response_id(&self) -> Option<&str>;
    fn last_event_type(&self) -> Option<&str>;
    /// Upstream HTTP status of the attempt
    fn status(&self) -> Option<u16>;
}

/// Runs one streaming attempt, writing every chunk into `buffer`
#[async_trait]
pub trait StreamProcessor<A>: Send + Sync {
    /// Must return [`LlmError::Cancelled`] promptly once `cancel` fires
    async fn process(&self, buffer: &mut StreamBuffer, cancel: &CancellationToken) -> Result<A, LlmError>;
}

type Predicate<A> = Box<dyn Fn(&A) -> bool + Send + Sync>;
type RetryWarning<A> = Box<dyn Fn(u32, u32, &A) + Send + Sync>;

/// Drives a [`StreamProcessor`] until it produces usable output
pub struct StreamRetryManager<A> {
    source: String,
    max_retries: u32,
    detect_empty: Predicate<A>,
    detect_bypass: Predicate<A>,
    on_retry_warning: Option<RetryWarning<A>>,
    cancel: CancellationToken,
}

impl<A: StreamAggregate> StreamRetryManager<A> {
    /// Create a manager that retries empty attempts up to `max_retries` times
    ///
    /// `detect_empty` flags an aggregate without usable output;
    /// `detect_bypass` exempts empty aggregates that must still be delivered,
    /// such as a tool-call-only turn or an error the upstream already reported.
    pub fn new(
        source: impl Into<String>,
        max_retries: u32,
        detect_empty: impl Fn(&A) -> bool + Send + Sync + 'static,
        detect_bypass: impl Fn(&A) -> bool + Send + Sync + 'static,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: source.into(),
            max_retries,
            detect_empty: Box::new(detect_empty),
            detect_bypass: Box::new(detect_bypass),
            on_retry_warning: None,
            cancel,
        }
    }

    /// Replace the default warning log emitted for each empty attempt
    #[must_use]
    pub fn on_retry_warning(mut self, callback: impl Fn(u32, u32, &A) + Send + Sync + 'static) -> Self {
        self.on_retry_warning = Some(Box::new(callback));
        self
    }

    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run attempts until one is worth showing to the client
    ///
    /// The accepted attempt's buffer is flushed before returning. Processor
    /// errors end the loop unchanged; cancellation is checked before every
    /// attempt.
    pub async fn execute<P>(&self, processor: &P, client: &Arc<ClientStream>) -> Result<A, LlmError>
    where
        P: StreamProcessor<A> + ?Sized,
    {
        let total_attempts = self.total_attempts();
        let mut last_empty = None;

        for attempt in 1..=total_attempts {
            if self.cancel.is_cancelled() {
                tracing::debug!(source = %self.source, attempt, "stream cancelled before attempt");
                return Err(LlmError::Cancelled);
            }

            let mut buffer = StreamBuffer::new(Arc::clone(client));
            let aggregate = processor.process(&mut buffer, &self.cancel).await?;

            if !(self.detect_empty)(&aggregate) || (self.detect_bypass)(&aggregate) {
                buffer.flush().await;
                if attempt > 1 {
                    tracing::info!(source = %self.source, attempt, total_attempts, "stream produced output after retry");
                }
                return Ok(aggregate);
            }

            // Dropping the unflushed buffer discards this attempt's chunks
            drop(buffer);
            self.warn_empty(attempt, total_attempts, &aggregate);
            last_empty = Some(aggregate);
        }

        let details = EmptyOutputDetails {
            source: self.source.clone(),
            attempt: total_attempts,
            total_attempts,
            status: last_empty.as_ref().and_then(StreamAggregate::status),
            last_event_type: last_empty
                .as_ref()
                .and_then(StreamAggregate::last_event_type)
                .map(str::to_owned),
            response_id: last_empty
                .as_ref()
                .and_then(StreamAggregate::response_id)
                .map(str::to_owned),
        };

        tracing::error!(
            source = %details.source,
            total_attempts,
            status = ?details.status,
            last_event_type = ?details.last_event_type,
            response_id = ?details.response_id,
            "stream returned empty output on every attempt"
        );

        Err(LlmError::EmptyOutput(Box::new(details)))
    }

    fn warn_empty(&self, attempt: u32, total_attempts: u32, aggregate: &A) {
        if let Some(callback) = &self.on_retry_warning {
            callback(attempt, total_attempts, aggregate);
            return;
        }

        tracing::warn!(
            source = %self.source,
            attempt,
            total_attempts,
            status = ?aggregate.status(),
            last_event_type = ?aggregate.last_event_type(),
            response_id = ?aggregate.response_id(),
            "stream returned empty output"
        );
    }
}
