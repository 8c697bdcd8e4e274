//! Mock LLM backend server for integration tests
//!
//! Implements a minimal OpenAI-compatible `/chat/completions` that plays a
//! script of replies, then falls back to a default reply.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// What the mock answers to one request
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Assistant text, as JSON or SSE depending on the request
    Text(String),
    /// OpenAI-style error body with this status
    Status(u16),
    /// A successful stream whose deltas carry no text
    EmptyStream,
    /// A stream with a single tool call and no text
    ToolCallStream,
}

/// Mock LLM backend that returns predictable responses
pub struct MockLlm {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockLlmState>,
}

struct MockLlmState {
    completion_count: AtomicU32,
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    last_model: Mutex<Option<String>>,
    last_authorization: Mutex<Option<String>>,
}

impl MockLlm {
    /// Start a mock answering every request with a fixed greeting
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_scripted(Vec::new(), MockReply::Text("Hello from mock LLM".to_owned())).await
    }

    /// Start a mock answering every request with `content`
    pub async fn start_with_response(content: &str) -> anyhow::Result<Self> {
        Self::start_scripted(Vec::new(), MockReply::Text(content.to_owned())).await
    }

    /// Start a mock that fails every request with `status`
    pub async fn start_failing_with(status: u16) -> anyhow::Result<Self> {
        Self::start_scripted(Vec::new(), MockReply::Status(status)).await
    }

    /// Start a mock playing `script` in order, then answering with `fallback`
    pub async fn start_scripted(script: Vec<MockReply>, fallback: MockReply) -> anyhow::Result<Self> {
        let state = Arc::new(MockLlmState {
            completion_count: AtomicU32::new(0),
            script: Mutex::new(script.into()),
            fallback,
            last_model: Mutex::new(None),
            last_authorization: Mutex::new(None),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a target
    ///
    /// Includes `/v1` since the transport appends `/chat/completions`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Number of completion requests received
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    /// Model name of the most recent request
    pub fn last_model(&self) -> Option<String> {
        self.state.last_model.lock().unwrap().clone()
    }

    /// `Authorization` header of the most recent request
    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }
}

impl Drop for MockLlm {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    #[serde(default)]
    stream: Option<bool>,
}

async fn handle_chat_completions(
    State(state): State<Arc<MockLlmState>>,
    headers: axum::http::HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    state.completion_count.fetch_add(1, Ordering::Relaxed);
    *state.last_model.lock().unwrap() = Some(req.model.clone());
    *state.last_authorization.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let reply = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| state.fallback.clone());

    if let MockReply::Status(status) = reply {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (
            status,
            Json(json!({
                "error": {
                    "message": "mock server intentional failure",
                    "type": "server_error"
                }
            })),
        )
            .into_response();
    }

    if req.stream.unwrap_or(false) {
        return streaming_response(&req.model, &reply);
    }

    let content = match reply {
        MockReply::Text(text) => text,
        _ => String::new(),
    };

    Json(json!({
        "id": "chatcmpl-test-123",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": req.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

fn chunk(model: &str, delta: &serde_json::Value, finish_reason: Option<&str>) -> String {
    let chunk = json!({
        "id": "chatcmpl-test-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
    });
    format!("data: {chunk}\n\n")
}

fn streaming_response(model: &str, reply: &MockReply) -> Response {
    let mut body = chunk(model, &json!({"role": "assistant", "content": ""}), None);

    let finish_reason = match reply {
        MockReply::Text(text) => {
            for word in text.split_inclusive(' ') {
                body.push_str(&chunk(model, &json!({"content": word}), None));
            }
            "stop"
        }
        MockReply::ToolCallStream => {
            body.push_str(&chunk(
                model,
                &json!({"tool_calls": [{
                    "index": 0,
                    "id": "call_test_123",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}
                }]}),
                None,
            ));
            "tool_calls"
        }
        MockReply::EmptyStream | MockReply::Status(_) => "stop",
    };

    body.push_str(&chunk(model, &json!({}), Some(finish_reason)));
    body.push_str("data: [DONE]\n\n");

    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
