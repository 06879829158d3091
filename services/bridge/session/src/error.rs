//! Session layer error taxonomy.
//!
//! None of these escape a message-handling entry point as a panic. They are
//! logged where they occur and returned so callers and tests can inspect them.

use crate::connection::{ConnectionState, Role};
use bridge_storage::StorageError;
use bridge_wire::WireError;
use thiserror::Error;

/// Session layer errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Message is not valid for the current state or role
    #[error("protocol violation: {kind} not accepted by {role} in state {state}")]
    ProtocolViolation {
        /// Offending message type
        kind: String,
        /// State when it arrived
        state: ConnectionState,
        /// Local role
        role: Role,
    },

    /// Session id does not match the one negotiated
    #[error("session mismatch: expected {expected:?}, received {received}")]
    SessionMismatch {
        /// Locally known session id
        expected: Option<String>,
        /// Session id carried by the message
        received: String,
    },

    /// Operation requires an established connection
    #[error("not connected (state {0})")]
    NotConnected(ConnectionState),

    /// A consumer handler failed or panicked
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    /// Session store read or write failed
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),

    /// Message could not be decoded or encoded
    #[error(transparent)]
    Wire(#[from] WireError),
}
