use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Decimal places kept for sampling parameters
const FLOAT_PRECISION: i32 = 3;

/// Canonical form of the request fields that determine the response
///
/// Field order is fixed by the struct, so serialization is deterministic
/// regardless of how the client ordered its JSON keys.
#[derive(Serialize)]
struct NormalizedRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<&'a Value>,
    messages: Vec<NormalizedMessage<'a>>,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<NormalizedStop>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    virtual_key_id: &'a str,
}

#[derive(Serialize)]
struct NormalizedMessage<'a> {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum NormalizedStop {
    Single(String),
    Many(Vec<String>),
}

/// Compute the cache key for a chat request owned by a virtual key
///
/// The model name is lower-cased and trimmed, messages are reduced to
/// role/content/name/tool-call fields with content hashed verbatim, sampling
/// parameters are rounded to three decimals and stop sequences are trimmed. The virtual key id is part
/// of the hashed payload so two tenants never share an entry.
pub fn generate_cache_key(request: &Value, virtual_key_id: &str) -> String {
    let normalized = NormalizedRequest {
        frequency_penalty: rounded(request, "frequency_penalty"),
        max_completion_tokens: present(request, "max_completion_tokens"),
        max_tokens: present(request, "max_tokens"),
        messages: request
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| messages.iter().map(normalize_message).collect())
            .unwrap_or_default(),
        model: request
            .get("model")
            .and_then(Value::as_str)
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "unknown".to_owned()),
        n: present(request, "n"),
        presence_penalty: rounded(request, "presence_penalty"),
        response_format: present(request, "response_format"),
        seed: present(request, "seed"),
        stop: request.get("stop").and_then(normalize_stop),
        temperature: rounded(request, "temperature"),
        tool_choice: present(request, "tool_choice"),
        tools: present(request, "tools"),
        top_p: rounded(request, "top_p"),
        virtual_key_id,
    };

    // Serializing borrowed JSON values and plain strings cannot fail
    let json = serde_json::to_string(&normalized).unwrap_or_default();
    let hash = Sha256::digest(json.as_bytes());
    format!("{hash:x}")
}

fn present<'a>(request: &'a Value, field: &str) -> Option<&'a Value> {
    request.get(field).filter(|v| !v.is_null())
}

/// Round to `FLOAT_PRECISION` decimals, ties to even
///
/// `0.1005 * 1000.0` is exactly `100.5` in binary floating point, so a
/// half-away-from-zero rule would split it from `0.1004`.
fn rounded(request: &Value, field: &str) -> Option<f64> {
    let scale = 10_f64.powi(FLOAT_PRECISION);
    request
        .get(field)
        .and_then(Value::as_f64)
        .map(|v| (v * scale).round_ties_even() / scale)
}

fn trimmed(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn normalize_message(message: &Value) -> NormalizedMessage<'_> {
    let content = match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(structured @ (Value::Array(_) | Value::Object(_))) => structured.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    NormalizedMessage {
        role: trimmed(message.get("role")).unwrap_or_else(|| "user".to_owned()),
        content,
        name: trimmed(message.get("name")),
        function_call: present(message, "function_call"),
        tool_calls: present(message, "tool_calls"),
        tool_call_id: trimmed(message.get("tool_call_id")),
    }
}

fn normalize_stop(stop: &Value) -> Option<NormalizedStop> {
    match stop {
        Value::String(_) => trimmed(Some(stop)).map(NormalizedStop::Single),
        Value::Array(items) => Some(NormalizedStop::Many(
            items
                .iter()
                .filter_map(|item| trimmed(Some(item)))
                .collect(),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deterministic_for_same_input() {
        let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(generate_cache_key(&body, "vk1"), generate_cache_key(&body, "vk1"));
    }

    #[test]
    fn model_case_and_float_rounding_are_normalized() {
        let a = json!({"model": "GPT-4", "temperature": 0.1005});
        let b = json!({"model": "gpt-4", "temperature": 0.1004});

        assert_eq!(generate_cache_key(&a, "vk1"), generate_cache_key(&b, "vk1"));
        assert_ne!(generate_cache_key(&a, "vk1"), generate_cache_key(&a, "vk2"));
    }

    #[test]
    fn key_order_and_whitespace_do_not_matter() {
        let a = json!({
            "model": " gpt-4o ",
            "messages": [{"role": " user", "content": "hello"}],
            "stop": ["  END ", ""],
        });
        let b = json!({
            "stop": ["END"],
            "messages": [{"content": "hello", "role": "user"}],
            "model": "gpt-4o",
        });

        assert_eq!(generate_cache_key(&a, "vk1"), generate_cache_key(&b, "vk1"));
    }

    #[test]
    fn message_content_whitespace_is_significant() {
        let a = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "  hello  "}]});
        let b = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hello"}]});
        assert_ne!(generate_cache_key(&a, "vk1"), generate_cache_key(&b, "vk1"));
    }

    #[test]
    fn different_messages_produce_different_keys() {
        let a = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        let b = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "bye"}]});
        assert_ne!(generate_cache_key(&a, "vk1"), generate_cache_key(&b, "vk1"));
    }

    #[test]
    fn sampling_parameters_differing_at_kept_precision_differ() {
        let a = json!({"model": "m", "top_p": 0.9});
        let b = json!({"model": "m", "top_p": 0.91});
        assert_ne!(generate_cache_key(&a, "vk1"), generate_cache_key(&b, "vk1"));
    }

    #[test]
    fn structured_content_and_tool_calls_are_hashed() {
        let base = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
        });
        let with_tools = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
            "tools": [{"type": "function", "function": {"name": "lookup"}}],
        });
        assert_ne!(generate_cache_key(&base, "vk1"), generate_cache_key(&with_tools, "vk1"));
    }

    #[test]
    fn stream_flag_does_not_affect_key() {
        let a = json!({"model": "gpt-4o", "messages": [], "stream": false});
        let b = json!({"model": "gpt-4o", "messages": []});
        assert_eq!(generate_cache_key(&a, "vk1"), generate_cache_key(&b, "vk1"));
    }

    #[test]
    fn key_is_hex_sha256() {
        let key = generate_cache_key(&json!({}), "vk1");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
