//! Wire protocol error types.

use crate::close::CloseCode;
use crate::envelope::Category;
use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Value is not a well-formed envelope
    #[error("not a transport envelope")]
    NotEnvelope,

    /// Envelope category does not match the requested decode
    #[error("category mismatch: expected {expected}, got {actual}")]
    Category {
        /// Category the decoder expected
        expected: Category,
        /// Category found in the envelope
        actual: Category,
    },

    /// Unknown control message type
    #[error("unknown control type {0}")]
    UnknownType(String),

    /// Payload does not match the shape implied by its type
    #[error("malformed {kind} payload: {source}")]
    Payload {
        /// Message type whose payload failed to decode
        kind: String,
        /// Underlying decode failure
        #[source]
        source: serde_json::Error,
    },

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Frame is not valid JSON
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown close code
    #[error("unknown close code {0}")]
    Code(u16),
}

impl WireError {
    /// Close code a peer should receive when tearing down because of this error
    pub fn close_code(&self) -> CloseCode {
        match self {
            WireError::Size(_) => CloseCode::TooLarge,
            WireError::UnknownType(_) => CloseCode::Unsupported,
            WireError::Code(_) | WireError::Category { .. } => CloseCode::ProtocolError,
            WireError::NotEnvelope | WireError::Payload { .. } | WireError::Json(_) => {
                CloseCode::InvalidMessage
            }
        }
    }
}
