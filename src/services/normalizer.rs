//! Response normalization.
//!
//! The provider has answered chat completions in two shapes over time:
//! `choices[].message.content` and the older `choices[].text`. Both may appear
//! in one collection. This module folds either into a stable
//! [`NormalizedReply`]. Everything here is a pure function of the body.

use serde::Serialize;
use serde_json::{json, Value};

/// Error marker used when the provider body is not JSON.
pub const NON_JSON_RESPONSE: &str = "non-json-response";

/// Uniform reply extracted from a chat completion body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedReply {
    /// First extracted reply, if any
    pub reply: Option<String>,
    /// Every extracted reply, in choice order
    pub replies: Vec<String>,
}

/// Parse a provider body.
///
/// Bodies that are not JSON become `{"error": "non-json-response",
/// "status_text": <raw text>}` so callers always have a JSON value to return.
pub fn parse_body(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(_) => json!({
            "error": NON_JSON_RESPONSE,
            "status_text": String::from_utf8_lossy(bytes),
        }),
    }
}

/// Extract reply text from message content.
///
/// Content is usually a string; content-part arrays have their text parts
/// concatenated.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(s) => Some(s.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect();
            Some(text)
        }
        _ => None,
    }
}

/// Extract the reply carried by one `choices` entry.
///
/// Returns `None` when the entry has no usable text.
pub fn extract_choice_text(choice: &Value) -> Option<String> {
    let from_message = match choice.get("message") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(message @ Value::Object(_)) => message.get("content").and_then(content_text),
        _ => None,
    };

    from_message
        .filter(|s| !s.is_empty())
        .or_else(|| {
            choice
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|s| !s.is_empty())
}

/// Normalize a successful chat completion body.
///
/// A missing or empty `choices` collection yields an empty reply, not an error.
pub fn normalize_chat(body: &Value) -> NormalizedReply {
    let replies: Vec<String> = body
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| choices.iter().filter_map(extract_choice_text).collect())
        .unwrap_or_default();

    NormalizedReply {
        reply: replies.first().cloned(),
        replies,
    }
}

/// Extract the transcript from a transcription body; empty when absent.
pub fn transcription_text(body: &Value) -> String {
    body.get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
