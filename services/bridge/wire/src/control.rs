//! Control-plane payloads.
//!
//! Control messages drive the connection lifecycle: the HELLO / HELLO_ACK /
//! READY handshake, PING / PONG liveness checks, GOODBYE / GOODBYE_ACK
//! teardown and ERROR reports.

use crate::envelope::{Category, Envelope};
use crate::WireError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control message type strings
pub mod kinds {
    /// Client opens the handshake
    pub const HELLO: &str = "HELLO";
    /// Server answers HELLO with the session parameters
    pub const HELLO_ACK: &str = "HELLO_ACK";
    /// Client confirms the session
    pub const READY: &str = "READY";
    /// Liveness check
    pub const PING: &str = "PING";
    /// Liveness reply
    pub const PONG: &str = "PONG";
    /// Teardown request
    pub const GOODBYE: &str = "GOODBYE";
    /// Teardown confirmation
    pub const GOODBYE_ACK: &str = "GOODBYE_ACK";
    /// Error report
    pub const ERROR: &str = "ERROR";
}

/// HELLO payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    /// Origin of the sender
    pub origin: String,
    /// Capabilities offered by the sender
    pub capabilities: Vec<String>,
    /// Versions the sender understands, newest first
    pub protocol_versions: Vec<String>,
    /// Version the sender would like to use
    pub preferred_version: String,
    /// Optional client identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Free-form client metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// HELLO_ACK payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAckPayload {
    /// Origin of the server
    pub origin: String,
    /// Version chosen by the server
    pub negotiated_version: String,
    /// Capabilities the server enables
    pub capabilities: Vec<String>,
    /// Session inactivity timeout in milliseconds
    pub session_timeout: u64,
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
    /// Session id assigned by the server
    pub session_id: String,
    /// Optional server identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

/// Status literal carried by READY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyStatus {
    /// Session is established
    Connected,
}

/// READY payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    /// Always `connected`
    pub status: ReadyStatus,
    /// Session id echoed from HELLO_ACK
    pub session_id: String,
}

/// Sender statistics embedded in PING
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingMetrics {
    /// Messages sent by the pinging side
    pub messages_sent: u64,
    /// Messages received by the pinging side
    pub messages_received: u64,
    /// Last activity timestamp of the pinging side
    pub last_activity: u64,
    /// Memory usage in bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
}

/// PING payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    /// Sender statistics
    pub metrics: PingMetrics,
    /// Send time, echoed back in PONG
    pub ping_time: u64,
}

/// Receiver statistics embedded in PONG
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongMetrics {
    /// Messages sent by the ponging side
    pub messages_sent: u64,
    /// Messages received by the ponging side
    pub messages_received: u64,
    /// One-way latency observed for the PING, in milliseconds
    pub latency: u64,
    /// Memory usage in bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
}

/// PONG payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    /// Receiver statistics
    pub metrics: PongMetrics,
    /// `ping_time` of the PING being answered
    pub ping_time: u64,
    /// Reply time
    pub pong_time: u64,
}

/// GOODBYE payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoodbyePayload {
    /// Machine-readable reason
    pub reason: String,
    /// Close code (see [`crate::CloseCode`])
    pub code: u16,
    /// Whether the peer may reconnect with the same session
    pub can_reconnect: bool,
    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status literal carried by GOODBYE_ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectedStatus {
    /// Connection is closed
    Disconnected,
}

/// GOODBYE_ACK payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoodbyeAckPayload {
    /// Always `disconnected`
    pub status: DisconnectedStatus,
    /// Reason echoed from GOODBYE
    pub reason: String,
}

/// ERROR payload; also the payload of error-category envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Whether the connection survives this error
    pub recoverable: bool,
    /// Suggested retry delay in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Extra diagnostic context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Typed control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// HELLO
    Hello(HelloPayload),
    /// HELLO_ACK
    HelloAck(HelloAckPayload),
    /// READY
    Ready(ReadyPayload),
    /// PING
    Ping(PingPayload),
    /// PONG
    Pong(PongPayload),
    /// GOODBYE
    Goodbye(GoodbyePayload),
    /// GOODBYE_ACK
    GoodbyeAck(GoodbyeAckPayload),
    /// ERROR
    Error(ErrorPayload),
}

fn decode_payload<T: DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, WireError> {
    T::deserialize(payload).map_err(|source| WireError::Payload {
        kind: kind.to_string(),
        source,
    })
}

impl ControlMessage {
    /// Wire type string of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Hello(_) => kinds::HELLO,
            ControlMessage::HelloAck(_) => kinds::HELLO_ACK,
            ControlMessage::Ready(_) => kinds::READY,
            ControlMessage::Ping(_) => kinds::PING,
            ControlMessage::Pong(_) => kinds::PONG,
            ControlMessage::Goodbye(_) => kinds::GOODBYE,
            ControlMessage::GoodbyeAck(_) => kinds::GOODBYE_ACK,
            ControlMessage::Error(_) => kinds::ERROR,
        }
    }

    /// Decode a control envelope.
    ///
    /// The category and type are checked first; the payload is only
    /// deserialized once the discriminant is known.
    pub fn decode(envelope: &Envelope) -> Result<Self, WireError> {
        if envelope.category != Category::Control {
            return Err(WireError::Category {
                expected: Category::Control,
                actual: envelope.category,
            });
        }

        let kind = envelope.kind.as_str();
        let payload = &envelope.payload;
        let message = match kind {
            kinds::HELLO => ControlMessage::Hello(decode_payload(kind, payload)?),
            kinds::HELLO_ACK => ControlMessage::HelloAck(decode_payload(kind, payload)?),
            kinds::READY => ControlMessage::Ready(decode_payload(kind, payload)?),
            kinds::PING => ControlMessage::Ping(decode_payload(kind, payload)?),
            kinds::PONG => ControlMessage::Pong(decode_payload(kind, payload)?),
            kinds::GOODBYE => ControlMessage::Goodbye(decode_payload(kind, payload)?),
            kinds::GOODBYE_ACK => ControlMessage::GoodbyeAck(decode_payload(kind, payload)?),
            kinds::ERROR => ControlMessage::Error(decode_payload(kind, payload)?),
            other => return Err(WireError::UnknownType(other.to_string())),
        };
        Ok(message)
    }

    /// Payload as a JSON value
    pub fn payload_value(&self) -> Result<Value, WireError> {
        let value = match self {
            ControlMessage::Hello(p) => serde_json::to_value(p),
            ControlMessage::HelloAck(p) => serde_json::to_value(p),
            ControlMessage::Ready(p) => serde_json::to_value(p),
            ControlMessage::Ping(p) => serde_json::to_value(p),
            ControlMessage::Pong(p) => serde_json::to_value(p),
            ControlMessage::Goodbye(p) => serde_json::to_value(p),
            ControlMessage::GoodbyeAck(p) => serde_json::to_value(p),
            ControlMessage::Error(p) => serde_json::to_value(p),
        }?;
        Ok(value)
    }
}
