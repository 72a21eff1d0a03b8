use serde_json::Value;
use thiserror::Error;

use kindred_types::events::Envelope;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("envelope has no eventType")]
    MissingEventType,
}

/// Decode a push message body into an [`Envelope`].
///
/// An empty body is treated as `{}`. A missing `payload` decodes as `null`.
/// `eventType` must be a non-empty string.
pub fn decode_envelope(body: &str) -> Result<Envelope, CodecError> {
    let text = body.trim();
    let text = if text.is_empty() { "{}" } else { text };

    let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
        return Err(CodecError::NotAnObject);
    };

    let event_type = match fields.remove("eventType") {
        Some(Value::String(event_type)) if !event_type.is_empty() => event_type,
        _ => return Err(CodecError::MissingEventType),
    };

    Ok(Envelope {
        event_type,
        payload: fields.remove("payload").unwrap_or(Value::Null),
    })
}
