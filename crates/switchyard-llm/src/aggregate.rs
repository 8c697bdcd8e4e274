//! Accumulated state of one streamed chat completion attempt

use serde_json::Value;

use crate::stream_retry::StreamAggregate;

/// Token counts reported by the upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// What a streamed chat completion attempt produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatStreamAggregate {
    /// Assistant text concatenated across deltas
    pub text: String,
    /// Distinct tool calls started by the assistant
    pub tool_calls: usize,
    pub usage: Option<Usage>,
    pub response_id: Option<String>,
    /// `chunk`, `done`, `error`, or the SSE event name the upstream used
    pub last_event_type: Option<String>,
    pub finish_reason: Option<String>,
    /// Error message the upstream reported inside the stream
    pub error: Option<String>,
    /// HTTP status of the upstream response
    pub status: Option<u16>,
    /// SSE events seen
    pub events: usize,
}

impl ChatStreamAggregate {
    /// Fold one SSE event into the aggregate
    pub fn observe(&mut self, event_type: &str, data: &str) {
        self.events += 1;

        if data == "[DONE]" {
            self.last_event_type = Some("done".to_owned());
            return;
        }

        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            tracing::debug!(data, "skipping unparseable SSE chunk");
            self.last_event_type = Some(event_label(event_type));
            return;
        };

        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_owned);
            self.error = Some(message);
            self.last_event_type = Some("error".to_owned());
            return;
        }

        if self.response_id.is_none() {
            self.response_id = chunk.get("id").and_then(Value::as_str).map(str::to_owned);
        }

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(Usage {
                prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
            });
        }

        for choice in chunk.get("choices").and_then(Value::as_array).into_iter().flatten() {
            if let Some(delta) = choice.get("delta") {
                if let Some(content) = delta.get("content").and_then(Value::as_str) {
                    self.text.push_str(content);
                }
                // Later deltas of the same call carry arguments but no id
                self.tool_calls += delta
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .map_or(0, |calls| calls.iter().filter(|c| c.get("id").is_some()).count());
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.finish_reason = Some(reason.to_owned());
            }
        }

        self.last_event_type = Some(event_label(event_type));
    }

    /// No assistant text was produced
    pub fn is_empty_output(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Empty output that must still reach the client instead of being retried
    ///
    /// A tool-call-only turn is a complete answer, and so is an error the
    /// upstream reported inside the stream.
    pub const fn should_bypass_retry(&self) -> bool {
        self.tool_calls > 0 || self.error.is_some()
    }
}

fn event_label(event_type: &str) -> String {
    if event_type.is_empty() || event_type == "message" {
        "chunk".to_owned()
    } else {
        event_type.to_owned()
    }
}

impl StreamAggregate for ChatStreamAggregate {
    fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    fn last_event_type(&self) -> Option<&str> {
        self.last_event_type.as_deref()
    }

    fn status(&self) -> Option<u16> {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_text_usage_and_metadata() {
        let mut aggregate = ChatStreamAggregate::default();
        aggregate.observe(
            "",
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
        );
        aggregate.observe(
            "",
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
        );
        aggregate.observe(
            "",
            r#"{"id":"chatcmpl-1","choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
        );
        aggregate.observe("", "[DONE]");

        assert_eq!(aggregate.text, "Hello");
        assert_eq!(aggregate.response_id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(aggregate.finish_reason.as_deref(), Some("stop"));
        assert_eq!(
            aggregate.usage,
            Some(Usage {
                prompt_tokens: 5,
                completion_tokens: 2
            })
        );
        assert_eq!(aggregate.last_event_type.as_deref(), Some("done"));
        assert_eq!(aggregate.events, 4);
        assert!(!aggregate.is_empty_output());
    }

    #[test]
    fn role_only_stream_is_empty() {
        let mut aggregate = ChatStreamAggregate::default();
        aggregate.observe("", r#"{"id":"c","choices":[{"delta":{"role":"assistant","content":""}}]}"#);
        aggregate.observe("", r#"{"id":"c","choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        aggregate.observe("", "[DONE]");

        assert!(aggregate.is_empty_output());
        assert!(!aggregate.should_bypass_retry());
    }

    #[test]
    fn tool_calls_are_counted_once_per_call() {
        let mut aggregate = ChatStreamAggregate::default();
        aggregate.observe(
            "",
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"f","arguments":""}}]}}]}"#,
        );
        aggregate.observe(
            "",
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{}"}}]}}]}"#,
        );

        assert_eq!(aggregate.tool_calls, 1);
        assert!(aggregate.is_empty_output());
        assert!(aggregate.should_bypass_retry());
    }

    #[test]
    fn stream_error_bypasses_retry() {
        let mut aggregate = ChatStreamAggregate::default();
        aggregate.observe("error", r#"{"error":{"message":"context length exceeded"}}"#);

        assert!(aggregate.is_empty_output());
        assert!(aggregate.should_bypass_retry());
        assert_eq!(aggregate.error.as_deref(), Some("context length exceeded"));
        assert_eq!(aggregate.last_event_type.as_deref(), Some("error"));
    }

    #[test]
    fn named_events_are_kept() {
        let mut aggregate = ChatStreamAggregate::default();
        aggregate.observe("ping", "{}");
        assert_eq!(aggregate.last_event_type.as_deref(), Some("ping"));
    }
}
