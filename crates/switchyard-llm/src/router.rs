//! Axum route handlers for the OpenAI-compatible endpoints

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router, routing};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use switchyard_cache::CACHE_STATUS_HEADER;
use switchyard_core::{HttpError, RequestContext};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::gateway::{CompletionOutcome, Gateway};
use crate::stream::{ClientReceiver, ClientStream};

/// Response header naming the target that served the request
pub const TARGET_HEADER: &str = "x-switchyard-target";

/// Chunks buffered between the gateway task and a slow client
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Build the router for `/v1/chat/completions` and `/v1/models`
///
/// Handlers expect a [`RequestContext`] extension inserted by the
/// authentication layer.
pub fn llm_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/v1/chat/completions", routing::post(chat_completions))
        .route("/v1/models", routing::get(list_models))
        .with_state(gateway)
}

/// Handle `POST /v1/chat/completions`
async fn chat_completions(
    State(gateway): State<Gateway>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<Value>,
) -> Response {
    let is_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if is_stream {
        stream_completion(gateway, context, body).await
    } else {
        complete(gateway, context, body).await
    }
}

async fn complete(gateway: Gateway, context: RequestContext, body: Value) -> Response {
    // Dropping the handler future means the client went away
    let _cancel_on_drop = context.cancellation.clone().drop_guard();

    match gateway.complete(&context, body).await {
        Ok(outcome) => completion_response(&outcome),
        Err(error) => {
            log_failure(&context, &error);
            error_response(&error)
        }
    }
}

fn completion_response(outcome: &CompletionOutcome) -> Response {
    let mut headers = HeaderMap::new();

    for (name, value) in &outcome.response.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            headers.insert(name, value);
        }
    }
    headers.insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(outcome.cache_status.as_str()),
    );
    if let Some(target) = &outcome.target_id
        && let Ok(value) = HeaderValue::try_from(target.as_str())
    {
        headers.insert(HeaderName::from_static(TARGET_HEADER), value);
    }

    (headers, Json(outcome.response.body.clone())).into_response()
}

/// Run a streaming request and answer once it has committed or failed
///
/// The gateway runs on its own task so the SSE body can start while the
/// upstream is still producing. Nothing is sent until an attempt commits, so
/// a request that fails before that still gets a regular JSON error.
async fn stream_completion(gateway: Gateway, context: RequestContext, body: Value) -> Response {
    let (client, receiver) = ClientStream::channel(STREAM_CHANNEL_CAPACITY);
    let ClientReceiver { chunks, mut committed } = receiver;
    let done = CancellationToken::new();

    // The body channel closing before the gateway finishes means the client left
    tokio::spawn({
        let client = Arc::clone(&client);
        let cancellation = context.cancellation.clone();
        let done = done.clone();
        async move {
            tokio::select! {
                () = client.closed() => cancellation.cancel(),
                () = done.cancelled() => {}
            }
        }
    });

    let mut task = tokio::spawn({
        let context = context.clone();
        async move {
            let _done = done.drop_guard();
            gateway.stream(&context, body, client).await
        }
    });

    tokio::select! {
        biased;
        Ok(()) = &mut committed => sse_response(chunks),
        joined = &mut task => match joined {
            Ok(Ok(outcome)) => {
                tracing::debug!(
                    request_id = %context.request_id,
                    target_id = %outcome.target_id,
                    "stream finished before commit signal"
                );
                sse_response(chunks)
            }
            Ok(Err(error)) => {
                log_failure(&context, &error);
                error_response(&error)
            }
            Err(e) => {
                tracing::error!(request_id = %context.request_id, error = %e, "stream task failed");
                error_response(&LlmError::Internal(anyhow::anyhow!("stream task failed")))
            }
        },
    }
}

fn sse_response(chunks: mpsc::Receiver<Bytes>) -> Response {
    let body = futures_util::stream::unfold(chunks, |mut chunks| async move {
        let chunk = chunks.recv().await?;
        Some((Ok::<_, Infallible>(chunk), chunks))
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[derive(Serialize)]
struct ModelObject {
    id: String,
    object: &'static str,
    created: u64,
    owned_by: &'static str,
}

#[derive(Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelObject>,
}

/// Handle `GET /v1/models`, listing the models the caller's key may use
async fn list_models(State(gateway): State<Gateway>, Extension(context): Extension<RequestContext>) -> Response {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let data = gateway
        .models()
        .into_iter()
        .filter(|model| context.virtual_key.allows_model(model))
        .map(|id| ModelObject {
            id,
            object: "model",
            created: now,
            owned_by: "switchyard",
        })
        .collect();

    Json(ModelList { object: "list", data }).into_response()
}

fn log_failure(context: &RequestContext, error: &LlmError) {
    if error.is_cancelled() {
        tracing::debug!(request_id = %context.request_id, "client went away");
    } else {
        tracing::warn!(request_id = %context.request_id, error = %error, "request failed");
    }
}

/// Render an error as an OpenAI-style JSON body
pub fn error_response(error: &LlmError) -> Response {
    let body = serde_json::json!({
        "error": {
            "message": error.client_message(),
            "type": error.error_type(),
            "code": error.error_code(),
        }
    });

    (error.status_code(), Json(body)).into_response()
}
