//! Opaque chat payloads.
//!
//! The manager never looks inside these; the helpers below are for
//! [`ChatClient`](crate::ChatClient) implementations that need to pick a
//! model, choose a text or multimodal endpoint, or forward SDK extras.

use super::PayloadError;
use serde_json::{Map, Value};
use std::time::Duration;

/// Chat request body: a JSON object with at least `messages`.
pub type ChatPayload = Map<String, Value>;

/// Chat response body as returned by the downstream SDK.
pub type ChatResult = Map<String, Value>;

/// Keys consumed by the client itself rather than forwarded to the SDK.
pub const RESERVED_KEYS: [&str; 3] = ["model", "messages", "timeout"];

/// Content keys that mark a message as multimodal.
const MEDIA_KEYS: [&str; 3] = ["image", "audio", "video"];

/// Pick the model for a request.
///
/// A non-empty `model` in the payload wins, then `default_model`.
pub fn resolve_model<'a>(
    payload: &'a ChatPayload,
    default_model: Option<&'a str>,
) -> Result<&'a str, PayloadError> {
    match payload.get("model") {
        None | Some(Value::Null) => {}
        Some(Value::String(model)) if !model.is_empty() => return Ok(model),
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(PayloadError::InvalidField {
                field: "model",
                expected: "a string",
            });
        }
    }

    default_model
        .filter(|model| !model.is_empty())
        .ok_or(PayloadError::MissingModel)
}

/// Whether any message carries multimodal content.
///
/// A message is multimodal if its `content` is a list of parts, or an object
/// holding an `image`, `audio` or `video` key.
pub fn contains_multimodal_content(messages: &Value) -> bool {
    let Some(messages) = messages.as_array() else {
        return false;
    };

    messages
        .iter()
        .filter_map(|message| message.get("content"))
        .any(|content| match content {
            Value::Array(_) => true,
            Value::Object(parts) => MEDIA_KEYS.iter().any(|key| parts.contains_key(*key)),
            _ => false,
        })
}

/// Everything in the payload except the reserved keys, for SDK pass-through.
pub fn sdk_extras(payload: &ChatPayload) -> ChatPayload {
    payload
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Per-request timeout: `timeout` (seconds) from the payload, else `default`.
pub fn request_timeout(payload: &ChatPayload, default: Duration) -> Duration {
    payload
        .get("timeout")
        .and_then(Value::as_f64)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(default)
}
