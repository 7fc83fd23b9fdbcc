use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the wizard. Every variant is terminal for the current
/// operation; nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum WizardError {
    /// Network-level failure, distinct from a well-formed unsuccessful response.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Well-formed response with `success: false`; message already normalized.
    #[error("{0}")]
    Api(String),

    /// Structurally successful response with zero results.
    #[error("no {0} found")]
    EmptyResult(&'static str),

    /// A required selection is absent; refused before any network request.
    #[error("missing required selection: {0}")]
    MissingSelection(&'static str),

    /// A supplied id is not in the list last loaded for its parent selection.
    #[error("unknown {kind} id '{id}'")]
    InvalidSelection { kind: &'static str, id: String },

    #[error("export job failed: {0}")]
    JobFailed(String),

    #[error("timed out waiting for export job after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("export cancelled")]
    Cancelled,
}

/// Server error payloads arrive in several shapes: an object with `message`,
/// an object with a `__type` tag, a bare string, or arbitrary JSON. Variant
/// order matters for untagged deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Message {
        message: String,
    },
    Typed {
        #[serde(rename = "__type")]
        kind: String,
    },
    Text(String),
    Other(serde_json::Value),
}

impl ErrorPayload {
    /// Resolve any payload shape to a displayable, non-empty string.
    pub fn to_message(&self) -> String {
        let msg = match self {
            ErrorPayload::Message { message } => message.clone(),
            ErrorPayload::Typed { kind } => kind.clone(),
            ErrorPayload::Text(text) => text.clone(),
            ErrorPayload::Other(value) => {
                if value.is_null() {
                    String::new()
                } else {
                    serde_json::to_string(value).unwrap_or_default()
                }
            }
        };
        if msg.trim().is_empty() {
            "unknown server error".to_string()
        } else {
            msg
        }
    }
}

/// Normalize an optional payload, falling back to a context message.
pub fn api_message(error: Option<ErrorPayload>, fallback: &str) -> String {
    match error {
        Some(payload) => payload.to_message(),
        None => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> ErrorPayload {
        serde_json::from_str(json).expect("error payload")
    }

    #[test]
    fn message_object_normalizes() {
        assert_eq!(decode(r#"{"message":"bad key"}"#).to_message(), "bad key");
    }

    #[test]
    fn bare_string_normalizes() {
        assert_eq!(decode(r#""bad key""#).to_message(), "bad key");
    }

    #[test]
    fn typed_object_normalizes() {
        assert_eq!(decode(r#"{"__type":"AuthError"}"#).to_message(), "AuthError");
    }

    #[test]
    fn unrecognized_object_never_renders_opaquely() {
        let msg = decode(r#"{"code":42,"detail":"quota"}"#).to_message();
        assert!(!msg.is_empty());
        assert_ne!(msg, "[object Object]");
        assert!(msg.contains("quota"));
    }

    #[test]
    fn empty_shapes_get_a_fallback() {
        assert_eq!(decode("null").to_message(), "unknown server error");
        assert_eq!(decode(r#""""#).to_message(), "unknown server error");
        assert_eq!(decode(r#"{"message":"  "}"#).to_message(), "unknown server error");
    }

    #[test]
    fn missing_payload_uses_context_fallback() {
        assert_eq!(api_message(None, "Failed to load databases"), "Failed to load databases");
    }
}
