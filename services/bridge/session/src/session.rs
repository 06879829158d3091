//! Session records.
//!
//! A [`Session`] outlives any single connection: it is created after a
//! successful handshake, can be suspended when the connection drops, and
//! resumed within the grace window. Records are serialized as camelCase JSON
//! when persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Connection is live
    Active,
    /// Connection dropped, resumable
    Suspended,
    /// Terminal
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Active => "active",
            SessionState::Suspended => "suspended",
            SessionState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Per-session message counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Messages sent in this session
    pub messages_sent: u64,
    /// Messages received in this session
    pub messages_received: u64,
    /// Sequence of the last message sent
    pub last_sequence_sent: u64,
    /// Sequence of the last message received
    pub last_sequence_received: u64,
}

/// Session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// `{prefix}_{base36 ms}_{random}`
    pub id: String,
    /// Creation time, ms
    pub created_at: u64,
    /// Last activity, ms
    pub last_activity: u64,
    /// Origin of the peer window
    pub remote_origin: String,
    /// Idle timeout, ms
    pub timeout: u64,
    /// Heartbeat interval, ms
    pub heartbeat_interval: u64,
    /// Negotiated protocol version
    pub protocol_version: String,
    /// Application metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Lifecycle state
    pub state: SessionState,
    /// Counters
    #[serde(default)]
    pub stats: SessionStats,
}

impl Session {
    /// Milliseconds since the last activity
    pub fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_activity)
    }

    /// Milliseconds since creation
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Active, idle no longer than the timeout, and younger than `max_age`
    pub fn is_valid_at(&self, now: u64, max_age: u64) -> bool {
        self.state == SessionState::Active
            && self.idle_for(now) <= self.timeout
            && !self.exceeds_max_age(now, max_age)
    }

    /// Older than `max_age` ms
    pub fn exceeds_max_age(&self, now: u64, max_age: u64) -> bool {
        self.age(now) > max_age
    }

    /// Resume grace is twice the idle timeout, bounded by `max_age`
    pub fn is_resumable_at(&self, now: u64, max_age: u64) -> bool {
        self.state != SessionState::Expired
            && self.idle_for(now) <= self.timeout.saturating_mul(2)
            && !self.exceeds_max_age(now, max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            id: "client_abc_123456789".into(),
            created_at: 1_000,
            last_activity: 1_000,
            remote_origin: "https://dapp.example".into(),
            timeout: 300,
            heartbeat_interval: 30,
            protocol_version: "2.0.0".into(),
            metadata: HashMap::new(),
            state: SessionState::Active,
            stats: SessionStats::default(),
        }
    }

    #[test]
    fn test_validity_window() {
        let s = session();
        assert!(s.is_valid_at(1_300, 10_000));
        assert!(!s.is_valid_at(1_301, 10_000));
        assert!(!s.is_valid_at(1_200, 100));

        let mut suspended = session();
        suspended.state = SessionState::Suspended;
        assert!(!suspended.is_valid_at(1_000, 10_000));
    }

    #[test]
    fn test_resume_window() {
        let s = session();
        assert!(s.is_resumable_at(1_301, 10_000));
        assert!(s.is_resumable_at(1_600, 10_000));
        assert!(!s.is_resumable_at(1_601, 10_000));
        assert!(!s.is_resumable_at(1_200, 100));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(session()).unwrap();
        assert_eq!(json["remoteOrigin"], "https://dapp.example");
        assert_eq!(json["state"], "active");
        assert_eq!(json["stats"]["lastSequenceReceived"], 0);

        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back, session());
    }
}
