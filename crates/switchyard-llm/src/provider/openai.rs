//! OpenAI-compatible pass-through transport

use std::collections::BTreeMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{ExecutionConfig, Transport, UpstreamResponse};
use crate::aggregate::ChatStreamAggregate;
use crate::error::LlmError;
use crate::stream::StreamBuffer;

/// Upstream response headers replayed to the client
const FORWARDED_HEADERS: &[&str] = &["openai-processing-ms", "x-request-id"];

/// Longest upstream error body kept in error messages
const MAX_ERROR_BODY: usize = 512;

/// Transport for any OpenAI-compatible `/chat/completions` endpoint
///
/// The request body is passed through untouched apart from the model name
/// and the `stream` flag.
#[derive(Clone, Default)]
pub struct OpenAiTransport {
    client: Client,
}

impl OpenAiTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request(&self, config: &ExecutionConfig, body: &Value, stream: bool) -> RequestBuilder {
        let mut body = body.clone();
        if let Some(object) = body.as_object_mut() {
            object.insert("model".to_owned(), Value::String(config.model.clone()));
            if stream {
                object.insert("stream".to_owned(), Value::Bool(true));
            } else {
                object.remove("stream");
            }
        }

        let mut builder = self
            .client
            .post(completions_url(config))
            .headers(static_headers(config))
            .json(&body);

        if let Some(key) = &config.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        builder
    }

    async fn send(
        &self,
        config: &ExecutionConfig,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, LlmError> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = request.send() => result.map_err(|e| {
                tracing::error!(target_id = %config.target_id, error = %e, "upstream request failed");
                LlmError::Transport(e.to_string())
            })?,
        };

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            text = response.text() => text.unwrap_or_default(),
        };
        tracing::warn!(target_id = %config.target_id, status, "upstream returned error");

        Err(LlmError::Upstream {
            status,
            message: truncate(&upstream_error_message(&body), MAX_ERROR_BODY),
        })
    }
}

#[async_trait]
impl Transport for OpenAiTransport {
    async fn complete(
        &self,
        config: &ExecutionConfig,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, LlmError> {
        let response = self.send(config, self.request(config, body, false), cancel).await?;
        let status = response.status().as_u16();

        let headers = FORWARDED_HEADERS
            .iter()
            .filter_map(|name| {
                let value = response.headers().get(*name)?.to_str().ok()?;
                Some(((*name).to_owned(), value.to_owned()))
            })
            .collect::<BTreeMap<_, _>>();

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            body = response.json::<Value>() => body
                .map_err(|e| LlmError::Transport(format!("failed to parse response: {e}")))?,
        };

        Ok(UpstreamResponse { status, body, headers })
    }

    async fn stream(
        &self,
        config: &ExecutionConfig,
        body: &Value,
        buffer: &mut StreamBuffer,
        cancel: &CancellationToken,
    ) -> Result<ChatStreamAggregate, LlmError> {
        let response = self.send(config, self.request(config, body, true), cancel).await?;

        let mut aggregate = ChatStreamAggregate {
            status: Some(response.status().as_u16()),
            ..ChatStreamAggregate::default()
        };
        let mut events = Box::pin(response.bytes_stream().eventsource());

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::Cancelled),
                next = events.next() => next,
            };

            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    tracing::warn!(target_id = %config.target_id, error = %e, "upstream stream broke off");
                    return Err(LlmError::Transport(format!("stream interrupted: {e}")));
                }
            };

            let data = event.data.trim();
            aggregate.observe(&event.event, data);
            buffer.enqueue(encode_event(&event.event, data)).await;

            if data == "[DONE]" {
                break;
            }
        }

        Ok(aggregate)
    }
}

fn completions_url(config: &ExecutionConfig) -> String {
    let base = config.base_url.as_str().trim_end_matches('/');
    format!("{base}/chat/completions")
}

fn static_headers(config: &ExecutionConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(target_id = %config.target_id, header = %name, "skipping invalid header"),
        }
    }
    headers
}

/// Re-encode an SSE event for the client
fn encode_event(event_type: &str, data: &str) -> String {
    if event_type.is_empty() || event_type == "message" {
        format!("data: {data}\n\n")
    } else {
        format!("event: {event_type}\ndata: {data}\n\n")
    }
}

/// Pull `error.message` out of an OpenAI-style error body
fn upstream_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_events_are_data_only() {
        assert_eq!(encode_event("", "{}"), "data: {}\n\n");
        assert_eq!(encode_event("message", "[DONE]"), "data: [DONE]\n\n");
        assert_eq!(encode_event("error", "{}"), "event: error\ndata: {}\n\n");
    }

    #[test]
    fn error_message_is_extracted() {
        assert_eq!(
            upstream_error_message(r#"{"error":{"message":"rate limited","type":"rate_limit"}}"#),
            "rate limited"
        );
        assert_eq!(upstream_error_message(" plain text "), "plain text");
    }

    #[test]
    fn long_bodies_are_truncated() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
