//! The transport envelope and its structural guards.
//!
//! Guards only look at field presence and the `category` discriminant; payload
//! validation is deferred to whoever consumes the message.

use crate::clock::unix_now_ms;
use crate::control::{ControlMessage, ErrorPayload};
use crate::version::PROTOCOL_VERSION;
use crate::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message category; discriminates the payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Connection lifecycle (handshake, heartbeat, teardown)
    Control,
    /// Application payloads
    Data,
    /// Error reports
    Error,
}

impl Category {
    /// Wire name of the category
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Control => "control",
            Category::Data => "data",
            Category::Error => "error",
        }
    }

    /// Parse a wire name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "control" => Some(Category::Control),
            "data" => Some(Category::Data),
            "error" => Some(Category::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport envelope wrapping every message on the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Category discriminant
    pub category: Category,
    /// Message type within the category
    #[serde(rename = "type")]
    pub kind: String,
    /// Protocol version of the sender
    pub version: String,
    /// Send time in milliseconds since the epoch
    pub timestamp: u64,
    /// Per-sender monotonic sequence number
    pub sequence: u64,
    /// Session the message belongs to, once established
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Category-specific payload
    pub payload: Value,
}

impl Envelope {
    /// Parse an arbitrary JSON value into an envelope
    pub fn from_value(value: Value) -> Result<Self, WireError> {
        if !is_transport_message(&value) {
            return Err(WireError::NotEnvelope);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Convert into a JSON value for the channel
    pub fn to_value(&self) -> Result<Value, WireError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether this is a control-plane message
    pub fn is_control(&self) -> bool {
        self.category == Category::Control
    }

    /// Whether this is a data-plane message
    pub fn is_data(&self) -> bool {
        self.category == Category::Data
    }

    /// Whether this is an error report
    pub fn is_error(&self) -> bool {
        self.category == Category::Error
    }
}

/// Builder for envelopes
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    category: Category,
    kind: String,
    sequence: u64,
    session_id: Option<String>,
    timestamp: Option<u64>,
    payload: Value,
}

impl EnvelopeBuilder {
    /// Start an envelope of the given category and type
    pub fn new(category: Category, kind: impl Into<String>) -> Self {
        Self {
            category,
            kind: kind.into(),
            sequence: 0,
            session_id: None,
            timestamp: None,
            payload: Value::Null,
        }
    }

    /// Set the sequence number
    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the session id
    pub fn session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Stamp an explicit timestamp instead of the system time
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the payload
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Build the envelope stamped with the current protocol version
    pub fn build(self) -> Envelope {
        Envelope {
            category: self.category,
            kind: self.kind,
            version: PROTOCOL_VERSION.to_string(),
            timestamp: self.timestamp.unwrap_or_else(unix_now_ms),
            sequence: self.sequence,
            session_id: self.session_id,
            payload: self.payload,
        }
    }
}

/// Build an envelope stamped with the current version and time
pub fn create_message(
    category: Category,
    kind: impl Into<String>,
    payload: Value,
    sequence: u64,
    session_id: Option<String>,
) -> Envelope {
    EnvelopeBuilder::new(category, kind)
        .sequence(sequence)
        .session_id(session_id)
        .payload(payload)
        .build()
}

/// Build a control envelope from a typed control message
pub fn create_control_message(
    message: &ControlMessage,
    sequence: u64,
    session_id: Option<String>,
) -> Result<Envelope, WireError> {
    Ok(create_message(
        Category::Control,
        message.kind(),
        message.payload_value()?,
        sequence,
        session_id,
    ))
}

/// Build a data envelope carrying an application payload
pub fn create_data_message(
    kind: impl Into<String>,
    payload: Value,
    sequence: u64,
    session_id: Option<String>,
) -> Envelope {
    create_message(Category::Data, kind, payload, sequence, session_id)
}

/// Build an error envelope
pub fn create_error_message(
    error: &ErrorPayload,
    sequence: u64,
    session_id: Option<String>,
) -> Result<Envelope, WireError> {
    Ok(create_message(
        Category::Error,
        error.code.clone(),
        serde_json::to_value(error)?,
        sequence,
        session_id,
    ))
}

/// Whether a JSON value has the shape of an envelope
pub fn is_transport_message(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let category_ok = obj
        .get("category")
        .and_then(Value::as_str)
        .and_then(Category::parse)
        .is_some();
    category_ok
        && obj.get("type").is_some_and(Value::is_string)
        && obj.get("version").is_some_and(Value::is_string)
        && obj.get("timestamp").is_some_and(Value::is_u64)
        && obj.get("sequence").is_some_and(Value::is_u64)
        && obj.contains_key("payload")
}

fn has_category(value: &Value, category: Category) -> bool {
    is_transport_message(value)
        && value.get("category").and_then(Value::as_str) == Some(category.as_str())
}

/// Whether a JSON value is a control envelope
pub fn is_control_message(value: &Value) -> bool {
    has_category(value, Category::Control)
}

/// Whether a JSON value is a data envelope
pub fn is_data_message(value: &Value) -> bool {
    has_category(value, Category::Data)
}

/// Whether a JSON value is an error envelope
pub fn is_error_message(value: &Value) -> bool {
    has_category(value, Category::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "category": "data",
            "type": "request",
            "version": "2.0.0",
            "timestamp": 1_700_000_000_000u64,
            "sequence": 7,
            "sessionId": "server_abc_123456789",
            "payload": {"method": "eth_accounts"}
        })
    }

    #[test]
    fn test_guards() {
        let value = sample();
        assert!(is_transport_message(&value));
        assert!(is_data_message(&value));
        assert!(!is_control_message(&value));
        assert!(!is_error_message(&value));
    }

    #[test]
    fn test_guards_reject_legacy_messages() {
        assert!(!is_transport_message(&json!({"method": "eth_accounts"})));
        assert!(!is_transport_message(&json!("hello")));

        let mut value = sample();
        value["category"] = json!("telemetry");
        assert!(!is_transport_message(&value));

        let mut value = sample();
        value.as_object_mut().unwrap().remove("payload");
        assert!(!is_transport_message(&value));
    }

    #[test]
    fn test_guard_ignores_payload_shape() {
        let mut value = sample();
        value["category"] = json!("control");
        value["type"] = json!("HELLO");
        value["payload"] = json!(42);
        assert!(is_control_message(&value));
    }

    #[test]
    fn test_from_value() {
        let envelope = Envelope::from_value(sample()).unwrap();
        assert_eq!(envelope.category, Category::Data);
        assert_eq!(envelope.kind, "request");
        assert_eq!(envelope.sequence, 7);
        assert_eq!(envelope.session_id.as_deref(), Some("server_abc_123456789"));
        assert!(matches!(
            Envelope::from_value(json!({"foo": 1})),
            Err(WireError::NotEnvelope)
        ));
    }

    #[test]
    fn test_builder_stamps_version_and_omits_missing_session() {
        let envelope = EnvelopeBuilder::new(Category::Data, "notify")
            .sequence(3)
            .timestamp(42)
            .payload(json!({"x": 1}))
            .build();
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.timestamp, 42);

        let value = envelope.to_value().unwrap();
        assert!(value.get("sessionId").is_none());
        assert_eq!(value["type"], "notify");
    }

    #[test]
    fn test_create_error_message() {
        let error = ErrorPayload {
            code: "RATE_LIMITED".into(),
            message: "slow down".into(),
            recoverable: true,
            retry_after: Some(500),
            context: None,
        };
        let envelope = create_error_message(&error, 1, None).unwrap();
        assert!(envelope.is_error());
        assert_eq!(envelope.kind, "RATE_LIMITED");
        assert_eq!(envelope.payload["retryAfter"], 500);
    }
}
