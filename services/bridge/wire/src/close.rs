//! Close codes carried in GOODBYE payloads.
//!
//! The numeric values mirror WebSocket close codes so that peers bridging to a
//! socket transport can forward them untouched.

use crate::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason code for closing a connection
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum CloseCode {
    /// Normal closure
    Normal = 1000,
    /// Endpoint is going away (page unload, popup closed)
    GoingAway = 1001,
    /// Protocol error
    ProtocolError = 1002,
    /// Unsupported data
    Unsupported = 1003,
    /// Message payload was invalid
    InvalidMessage = 1007,
    /// Policy violation (origin rejected, etc.)
    PolicyViolation = 1008,
    /// Message too large
    TooLarge = 1009,
    /// Unexpected internal condition
    InternalError = 1011,
    /// Service is restarting
    ServiceRestart = 1012,
    /// Temporary condition, try again later
    TryAgain = 1013,
}

impl CloseCode {
    /// Numeric wire value
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(CloseCode::Normal),
            1001 => Ok(CloseCode::GoingAway),
            1002 => Ok(CloseCode::ProtocolError),
            1003 => Ok(CloseCode::Unsupported),
            1007 => Ok(CloseCode::InvalidMessage),
            1008 => Ok(CloseCode::PolicyViolation),
            1009 => Ok(CloseCode::TooLarge),
            1011 => Ok(CloseCode::InternalError),
            1012 => Ok(CloseCode::ServiceRestart),
            1013 => Ok(CloseCode::TryAgain),
            _ => Err(WireError::Code(value)),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u16())
    }
}
