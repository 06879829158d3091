//! Envelope format, control payloads, version negotiation and framing for the wallet bridge.
//!
//! Two isolated execution contexts (a dApp page and a wallet popup or iframe)
//! talk over a fire-and-forget message primitive with no ordering or delivery
//! guarantees. Every message crossing that primitive is wrapped in an
//! [`Envelope`] carrying enough information for the session layer to order,
//! acknowledge and resume the conversation.
//!
//! ## Envelope
//!
//! ```text
//! {
//!   "category":  "control" | "data" | "error",
//!   "type":      "HELLO" | "PING" | ... | <application type>,
//!   "version":   "2.0.0",
//!   "timestamp": <ms since epoch>,
//!   "sequence":  <per-sender monotonic counter>,
//!   "sessionId": <optional>,
//!   "payload":   <category specific>
//! }
//! ```
//!
//! The `(category, type)` pair is the discriminant; payloads are decoded into
//! typed structs only after it has been checked (see [`ControlMessage::decode`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capabilities;
pub mod clock;
pub mod close;
pub mod codec;
pub mod control;
pub mod envelope;
pub mod error;
pub mod version;

// Re-export main types
pub use capabilities::{default_capabilities, is_supported_capability};
pub use clock::{millis, unix_now_ms, Clock};
pub use close::CloseCode;
pub use codec::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
pub use control::{
    kinds, ControlMessage, DisconnectedStatus, ErrorPayload, GoodbyeAckPayload, GoodbyePayload,
    HelloAckPayload, HelloPayload, PingMetrics, PingPayload, PongMetrics, PongPayload,
    ReadyPayload, ReadyStatus,
};
pub use envelope::{
    create_control_message, create_data_message, create_error_message, create_message,
    is_control_message, is_data_message, is_error_message, is_transport_message, Category,
    Envelope, EnvelopeBuilder,
};
pub use error::WireError;
pub use version::{
    negotiate_version, negotiate_version_from, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_SESSION_TIMEOUT_MS, PROTOCOL_VERSION, SUPPORTED_VERSIONS,
};
