//! Session manager: creation, validation, suspension/resumption, expiry and
//! persistence of [`Session`] records.
//!
//! The manager is owned by one connection and mutated from its event loop.
//! Each active session has an inactivity deadline on tokio's clock; the owner
//! calls [`SessionManager::poll_timers`] when [`SessionManager::next_deadline`]
//! passes. Only active sessions record activity, so a late frame cannot stretch
//! the resume window of a suspended one. Storage failures are logged and never
//! surface to callers.

use crate::connection::SessionTerms;
use crate::handshake::generate_session_id;
use crate::session::{Session, SessionState, SessionStats};
use bridge_storage::{KeyValueStore, StorageError};
use bridge_wire::{millis, Clock, PROTOCOL_VERSION};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Idle timeout for new sessions
    pub default_timeout: Duration,
    /// Heartbeat interval recorded on new sessions
    pub heartbeat_interval: Duration,
    /// Hard limit on session lifetime
    pub max_session_age: Duration,
    /// Write sessions to the store
    pub enable_persistence: bool,
    /// Store key prefix
    pub storage_prefix: String,
    /// Prefix for ids allocated by [`SessionManager::create_session`]
    pub id_prefix: String,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(30),
            max_session_age: Duration::from_secs(24 * 60 * 60),
            enable_persistence: true,
            storage_prefix: "wallet_bridge_session_".to_string(),
            id_prefix: "session".to_string(),
        }
    }
}

/// Direction of a counted message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Outbound
    Sent,
    /// Inbound
    Received,
}

/// Owns the sessions of one endpoint
pub struct SessionManager {
    config: SessionManagerConfig,
    clock: Clock,
    store: Option<Arc<dyn KeyValueStore>>,
    sessions: HashMap<String, Session>,
    deadlines: HashMap<String, Instant>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SessionManager {
    /// Create a manager and rehydrate persisted sessions.
    ///
    /// Resumable records come back as suspended; the rest are evicted.
    pub fn new(
        config: SessionManagerConfig,
        clock: Clock,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let mut manager = Self {
            config,
            clock,
            store,
            sessions: HashMap::new(),
            deadlines: HashMap::new(),
        };
        manager.rehydrate();
        manager
    }

    fn max_age_ms(&self) -> u64 {
        millis(self.config.max_session_age)
    }

    fn storage_key(&self, id: &str) -> String {
        format!("{}{}", self.config.storage_prefix, id)
    }

    fn persistent_store(&self) -> Option<&Arc<dyn KeyValueStore>> {
        if self.config.enable_persistence {
            self.store.as_ref()
        } else {
            None
        }
    }

    fn rehydrate(&mut self) {
        let Some(store) = self.persistent_store().cloned() else {
            return;
        };
        let keys = match store.keys_with_prefix(&self.config.storage_prefix) {
            Ok(keys) => keys,
            Err(e) => {
                error!("Failed to enumerate persisted sessions: {}", e);
                return;
            }
        };

        let now = self.clock.now_ms();
        let max_age = self.max_age_ms();
        let mut restored = 0usize;
        for key in keys {
            let record = match store.get(&key) {
                Ok(Some(raw)) => serde_json::from_str::<Session>(&raw)
                    .map_err(|e| StorageError::Corruption(e.to_string())),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match record {
                Ok(mut session) if session.is_resumable_at(now, max_age) => {
                    session.state = SessionState::Suspended;
                    debug!("Rehydrated session {} as suspended", session.id);
                    self.sessions.insert(session.id.clone(), session);
                    restored += 1;
                }
                Ok(session) => {
                    debug!("Evicting stale persisted session {}", session.id);
                    self.remove_key(&store, &key);
                }
                Err(e) => {
                    warn!("Evicting unreadable session record {}: {}", key, e);
                    self.remove_key(&store, &key);
                }
            }
        }

        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.persist(&id);
        }
        if restored > 0 {
            info!("Restored {} persisted sessions", restored);
        }
    }

    fn remove_key(&self, store: &Arc<dyn KeyValueStore>, key: &str) {
        if let Err(e) = store.remove(key) {
            error!("Failed to remove persisted session {}: {}", key, e);
        }
    }

    fn persist(&self, id: &str) {
        let (Some(store), Some(session)) = (self.persistent_store(), self.sessions.get(id)) else {
            return;
        };
        let result = serde_json::to_string(session)
            .map_err(StorageError::from)
            .and_then(|raw| store.set(&self.storage_key(id), &raw));
        if let Err(e) = result {
            error!("Failed to persist session {}: {}", id, e);
        }
    }

    fn unpersist(&self, id: &str) {
        if let Some(store) = self.persistent_store() {
            self.remove_key(store, &self.storage_key(id));
        }
    }

    fn arm_timer(&mut self, id: &str) {
        let now = self.clock.now_ms();
        if let Some(session) = self.sessions.get(id) {
            let remaining = session
                .last_activity
                .saturating_add(session.timeout)
                .saturating_sub(now);
            let at = Instant::now() + Duration::from_millis(remaining);
            self.deadlines.insert(id.to_string(), at);
        }
    }

    /// Create a session with a freshly allocated id
    pub fn create_session(
        &mut self,
        remote_origin: &str,
        metadata: Option<HashMap<String, Value>>,
    ) -> Session {
        let id = generate_session_id(&self.config.id_prefix, self.clock.now_ms());
        self.create_session_with_id(&id, remote_origin, PROTOCOL_VERSION, metadata)
    }

    /// Create a session adopting an id negotiated during the handshake, with
    /// this manager's configured timeout and heartbeat interval.
    ///
    /// An existing session with the same id is replaced.
    pub fn create_session_with_id(
        &mut self,
        id: &str,
        remote_origin: &str,
        protocol_version: &str,
        metadata: Option<HashMap<String, Value>>,
    ) -> Session {
        let terms = SessionTerms {
            session_timeout: self.config.default_timeout,
            heartbeat_interval: self.config.heartbeat_interval,
        };
        self.create_session_with_terms(id, remote_origin, protocol_version, terms, metadata)
    }

    /// Create a session with the timeout and heartbeat interval agreed in the
    /// handshake.
    ///
    /// An existing session with the same id is replaced.
    pub fn create_session_with_terms(
        &mut self,
        id: &str,
        remote_origin: &str,
        protocol_version: &str,
        terms: SessionTerms,
        metadata: Option<HashMap<String, Value>>,
    ) -> Session {
        let now = self.clock.now_ms();
        let session = Session {
            id: id.to_string(),
            created_at: now,
            last_activity: now,
            remote_origin: remote_origin.to_string(),
            timeout: millis(terms.session_timeout),
            heartbeat_interval: millis(terms.heartbeat_interval),
            protocol_version: protocol_version.to_string(),
            metadata: metadata.unwrap_or_default(),
            state: SessionState::Active,
            stats: SessionStats::default(),
        };
        if self.sessions.insert(id.to_string(), session.clone()).is_some() {
            warn!("Replacing existing session {}", id);
        }
        self.arm_timer(id);
        self.persist(id);
        info!("Created session {} for {}", id, remote_origin);
        session
    }

    /// The session if it is active, not idle past its timeout, and within
    /// the maximum age. Nothing is removed on a miss.
    pub fn get_session(&self, id: &str) -> Option<Session> {
        let now = self.clock.now_ms();
        self.sessions
            .get(id)
            .filter(|s| s.is_valid_at(now, self.max_age_ms()))
            .cloned()
    }

    /// The stored record regardless of validity
    pub fn peek_session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Refresh `lastActivity` and re-arm the inactivity timer.
    ///
    /// Refused unless the session is active.
    pub fn update_activity(&mut self, id: &str) -> bool {
        let now = self.clock.now_ms();
        let Some(session) = self.active_mut(id) else {
            return false;
        };
        session.last_activity = now;
        self.arm_timer(id);
        self.persist(id);
        true
    }

    /// Count a message and refresh activity; refused unless the session is active
    pub fn update_stats(&mut self, id: &str, direction: MessageDirection, sequence: u64) -> bool {
        let Some(session) = self.active_mut(id) else {
            return false;
        };
        match direction {
            MessageDirection::Sent => {
                session.stats.messages_sent += 1;
                session.stats.last_sequence_sent = sequence;
            }
            MessageDirection::Received => {
                session.stats.messages_received += 1;
                session.stats.last_sequence_received = sequence;
            }
        }
        self.update_activity(id)
    }

    fn active_mut(&mut self, id: &str) -> Option<&mut Session> {
        let session = self.sessions.get_mut(id)?;
        if session.state != SessionState::Active {
            debug!("Session {} is {}, activity ignored", id, session.state);
            return None;
        }
        Some(session)
    }

    /// Freeze timers and mark the session suspended
    pub fn suspend_session(&mut self, id: &str) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        if session.state != SessionState::Active {
            debug!("Session {} not active ({}), not suspending", id, session.state);
            return false;
        }
        session.state = SessionState::Suspended;
        self.deadlines.remove(id);
        self.persist(id);
        info!("Suspended session {}", id);
        true
    }

    /// Reactivate a suspended session within twice its timeout
    pub fn resume_session(&mut self, id: &str) -> Option<Session> {
        let now = self.clock.now_ms();
        let max_age = self.max_age_ms();
        let session = self.sessions.get_mut(id)?;
        if session.state != SessionState::Suspended || !session.is_resumable_at(now, max_age) {
            debug!(
                "Session {} cannot be resumed (state {}, idle {}ms)",
                id,
                session.state,
                session.idle_for(now)
            );
            return None;
        }
        session.state = SessionState::Active;
        session.last_activity = now;
        let resumed = session.clone();
        self.arm_timer(id);
        self.persist(id);
        info!("Resumed session {}", id);
        Some(resumed)
    }

    /// Remove a session from memory and storage
    pub fn expire_session(&mut self, id: &str) -> bool {
        self.deadlines.remove(id);
        let removed = self.sessions.remove(id).is_some();
        self.unpersist(id);
        if removed {
            info!("Expired session {}", id);
        }
        removed
    }

    /// Remove sessions that are expired, too old, or suspended past twice
    /// their timeout; returns how many were removed
    pub fn cleanup_expired_sessions(&mut self) -> usize {
        let now = self.clock.now_ms();
        let max_age = self.max_age_ms();
        let doomed: Vec<String> = self
            .sessions
            .values()
            .filter(|s| {
                s.state == SessionState::Expired
                    || s.exceeds_max_age(now, max_age)
                    || (s.state == SessionState::Suspended
                        && s.idle_for(now) > s.timeout.saturating_mul(2))
            })
            .map(|s| s.id.clone())
            .collect();
        for id in &doomed {
            self.expire_session(id);
        }
        if !doomed.is_empty() {
            debug!("Session sweep removed {}", doomed.len());
        }
        doomed.len()
    }

    /// Resumable and `last_sequence` equals the last sequence received.
    ///
    /// Any gap refuses the resume so the peer performs a full resync.
    pub fn can_resume_session(&self, id: &str, last_sequence: u64) -> bool {
        let now = self.clock.now_ms();
        self.sessions.get(id).is_some_and(|s| {
            s.is_resumable_at(now, self.max_age_ms())
                && s.stats.last_sequence_received == last_sequence
        })
    }

    /// Fire due inactivity timers.
    ///
    /// An active session idle for its full timeout is marked expired and left
    /// for [`SessionManager::cleanup_expired_sessions`]; otherwise the timer
    /// re-arms at `lastActivity + timeout`.
    pub fn poll_timers(&mut self) {
        let instant = Instant::now();
        let mut due: Vec<(Instant, String)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= instant)
            .map(|(id, at)| (*at, id.clone()))
            .collect();
        due.sort();

        let now = self.clock.at(instant);
        for (_, id) in due {
            self.deadlines.remove(&id);
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.state != SessionState::Active {
                continue;
            }
            if session.idle_for(now) >= session.timeout {
                session.state = SessionState::Expired;
                info!("Session {} expired after {}ms idle", id, session.idle_for(now));
                self.persist(&id);
            } else {
                self.arm_timer(&id);
            }
        }
    }

    /// Earliest armed inactivity deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Number of sessions held in memory
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions currently valid
    pub fn active_sessions(&self) -> Vec<Session> {
        let now = self.clock.now_ms();
        let max_age = self.max_age_ms();
        let mut out: Vec<Session> = self
            .sessions
            .values()
            .filter(|s| s.is_valid_at(now, max_age))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}
