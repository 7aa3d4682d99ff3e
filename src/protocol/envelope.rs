//! Message envelope codec: parse, validate, serialize, size-check.
//!
//! [`Envelope::parse`] never fails: non-JSON input, JSON that is not an
//! object, and objects whose fields cannot be coerced all degrade to a
//! synthetic `type: "text"` envelope carrying the raw text. Validation is
//! a separate, non-throwing step returning a [`ValidationReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RelayError;

/// Default wire-size ceiling in bytes (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Envelope type consumed internally: authentication request.
pub const TYPE_AUTHENTICATE: &str = "authenticate";
/// Envelope type consumed internally: client-initiated liveness probe.
pub const TYPE_PING: &str = "ping";
/// Envelope type consumed internally: liveness acknowledgment.
pub const TYPE_PONG: &str = "pong";
/// Envelope type consumed internally: session resume request.
pub const TYPE_RECONNECT: &str = "reconnect";
/// Fallback envelope type for unparsable input.
pub const TYPE_TEXT: &str = "text";
/// Structured error envelope type.
pub const TYPE_ERROR: &str = "error";

/// The structured unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Type discriminant. Empty only for input that fails validation.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Client-provided correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Alternate correlation id used by request/response pairs.
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Variant-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// ISO-8601 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of [`Envelope::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Whether the envelope satisfied every rule for its type.
    pub valid: bool,
    /// Human-readable rule violations, empty when valid.
    pub errors: Vec<String>,
}

/// Outcome of [`Envelope::check_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCheck {
    /// Serialized wire size in bytes (0 if serialization failed).
    pub bytes: usize,
    /// Whether the envelope fits under the ceiling.
    pub within_limit: bool,
}

impl Envelope {
    /// Creates an envelope of the given type with a payload and a fresh
    /// timestamp.
    #[must_use]
    pub fn new(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            id: None,
            request_id: None,
            payload: Some(payload),
            timestamp: Some(Utc::now()),
        }
    }

    /// Parses raw text into an envelope. Never fails: anything that is
    /// not a JSON object with coercible fields becomes a `text` envelope
    /// carrying the raw input.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) if value.is_object() => {
                serde_json::from_value(value).unwrap_or_else(|_| Self::text_fallback(raw))
            }
            _ => Self::text_fallback(raw),
        }
    }

    fn text_fallback(raw: &str) -> Self {
        Self::new(TYPE_TEXT, json!({ "text": raw }))
    }

    /// Validates the envelope against the rules for its type.
    ///
    /// Type-specific rules: `authenticate` requires a `token` or
    /// `credentials` payload field, `subscribe`/`unsubscribe` require
    /// `channel`, and `direct` requires `target`.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        if self.kind.is_empty() {
            errors.push("type must be a non-empty string".to_string());
        }

        match self.kind.as_str() {
            TYPE_AUTHENTICATE => {
                if !self.payload_has("token") && !self.payload_has("credentials") {
                    errors.push("authenticate requires a token or credentials field".to_string());
                }
            }
            "subscribe" | "unsubscribe" => {
                if !self.payload_has("channel") {
                    errors.push(format!("{} requires a channel field", self.kind));
                }
            }
            "direct" => {
                if !self.payload_has("target") {
                    errors.push("direct requires a target field".to_string());
                }
            }
            _ => {}
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn payload_has(&self, field: &str) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get(field))
            .is_some_and(|v| !v.is_null())
    }

    /// Serializes the envelope to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if the payload cannot be
    /// rendered as JSON.
    pub fn serialize(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Computes the wire size against a byte ceiling without throwing.
    #[must_use]
    pub fn check_size(&self, max_bytes: usize) -> SizeCheck {
        match serde_json::to_string(self) {
            Ok(s) => SizeCheck {
                bytes: s.len(),
                within_limit: s.len() <= max_bytes,
            },
            Err(_) => SizeCheck {
                bytes: 0,
                within_limit: false,
            },
        }
    }

    /// Compression hook for large payloads.
    ///
    /// Currently a pass-through: the wire format reserves the hook for
    /// payloads over `threshold` bytes without mandating an algorithm.
    #[must_use]
    pub fn maybe_compress(wire: String, threshold: usize) -> String {
        let _ = threshold;
        wire
    }

    /// Builds an `auth_success` envelope for the given user.
    #[must_use]
    pub fn auth_success(user_id: &str) -> Self {
        Self::new(
            "auth_success",
            json!({ "userId": user_id, "timestamp": Utc::now() }),
        )
    }

    /// Builds a `pong` acknowledgment envelope.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(TYPE_PONG, json!({ "timestamp": Utc::now() }))
    }

    /// Builds a server-initiated `ping` probe envelope.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(TYPE_PING, json!({ "timestamp": Utc::now() }))
    }

    /// Builds a `server_shutdown` notice.
    #[must_use]
    pub fn server_shutdown(message: &str) -> Self {
        Self::new(
            "server_shutdown",
            json!({ "message": message, "timestamp": Utc::now() }),
        )
    }

    /// Builds a structured error envelope from a [`RelayError`].
    #[must_use]
    pub fn error(err: &RelayError) -> Self {
        Self::error_with_details(err.error_code(), &err.to_string(), None)
    }

    /// Builds a structured error envelope with an explicit code, message,
    /// and optional details.
    #[must_use]
    pub fn error_with_details(code: u32, message: &str, details: Option<Value>) -> Self {
        let mut payload = json!({ "code": code, "message": message });
        if let (Some(obj), Some(details)) = (payload.as_object_mut(), details) {
            obj.insert("details".to_string(), details);
        }
        Self::new(TYPE_ERROR, payload)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_serialize_round_trip() {
        let envelope = Envelope {
            kind: "direct".to_string(),
            id: Some("42".to_string()),
            request_id: Some("req-7".to_string()),
            payload: Some(json!({ "target": "u2", "body": "hello" })),
            timestamp: Some(Utc::now()),
        };
        let Ok(wire) = envelope.serialize() else {
            panic!("serialization failed");
        };
        assert_eq!(Envelope::parse(&wire), envelope);
    }

    #[test]
    fn parse_never_fails_on_garbage() {
        let envelope = Envelope::parse("this is { not json");
        assert_eq!(envelope.kind, TYPE_TEXT);
        let text = envelope
            .payload
            .as_ref()
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str);
        assert_eq!(text, Some("this is { not json"));
    }

    #[test]
    fn parse_coerces_non_object_json() {
        let envelope = Envelope::parse("[1, 2, 3]");
        assert_eq!(envelope.kind, TYPE_TEXT);

        let envelope = Envelope::parse("\"plain string\"");
        assert_eq!(envelope.kind, TYPE_TEXT);
    }

    #[test]
    fn parse_object_without_type_fails_validation() {
        let envelope = Envelope::parse(r#"{ "payload": { "x": 1 } }"#);
        assert!(envelope.kind.is_empty());
        let report = envelope.validate();
        assert!(!report.valid);
    }

    #[test]
    fn validate_authenticate_requires_token_or_credentials() {
        let bare = Envelope::new(TYPE_AUTHENTICATE, json!({}));
        assert!(!bare.validate().valid);

        let with_token = Envelope::new(TYPE_AUTHENTICATE, json!({ "token": "abc" }));
        assert!(with_token.validate().valid);

        let with_credentials =
            Envelope::new(TYPE_AUTHENTICATE, json!({ "credentials": { "user": "x" } }));
        assert!(with_credentials.validate().valid);
    }

    #[test]
    fn validate_subscribe_requires_channel() {
        let bare = Envelope::new("subscribe", json!({}));
        let report = bare.validate();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);

        let ok = Envelope::new("unsubscribe", json!({ "channel": "news" }));
        assert!(ok.validate().valid);
    }

    #[test]
    fn validate_direct_requires_target() {
        let bare = Envelope::new("direct", json!({ "body": "hi" }));
        assert!(!bare.validate().valid);

        let ok = Envelope::new("direct", json!({ "target": "u2", "body": "hi" }));
        assert!(ok.validate().valid);
    }

    #[test]
    fn check_size_reports_pass_and_fail() {
        let envelope = Envelope::new("text", json!({ "text": "x".repeat(64) }));
        let check = envelope.check_size(DEFAULT_MAX_MESSAGE_BYTES);
        assert!(check.within_limit);
        assert!(check.bytes > 64);

        let check = envelope.check_size(8);
        assert!(!check.within_limit);
    }

    #[test]
    fn maybe_compress_is_pass_through() {
        let wire = "payload".to_string();
        assert_eq!(Envelope::maybe_compress(wire.clone(), 1), wire);
    }

    #[test]
    fn error_envelope_carries_code_and_message() {
        let err = RelayError::InvalidEnvelope("missing channel".to_string());
        let envelope = Envelope::error(&err);
        assert_eq!(envelope.kind, TYPE_ERROR);
        let code = envelope
            .payload
            .as_ref()
            .and_then(|p| p.get("code"))
            .and_then(Value::as_u64);
        assert_eq!(code, Some(1001));
    }
}
