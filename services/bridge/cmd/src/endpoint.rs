//! One side of a bridge connection.
//!
//! An [`Endpoint`] owns the per-connection components (router with its
//! connection state machine, heartbeat monitor, session manager) and plays the
//! transport's part: it feeds inbound frames to the router, forwards lifecycle
//! events between the components, and hands encoded outbound frames back to
//! whatever carries them. Session activity is only recorded while the
//! connection is up.

use crate::config::BridgeConfig;
use anyhow::Result;
use bridge_routing::{InboundHandler, MessageRouter, RouteOutcome, RouterStats};
use bridge_session::{
    ConnectionConfig, ConnectionEvent, ConnectionState, ConnectionStateMachine, HealthState,
    HeartbeatEvent, HeartbeatMetrics, HeartbeatMonitor, MessageDirection, ProtocolError, Role,
    SessionManager,
};
use bridge_storage::KeyValueStore;
use bridge_wire::{Clock, Envelope, FrameCodec};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Application-side inbox for routed messages
#[derive(Debug, Default)]
pub struct Inbox {
    pending: Vec<Envelope>,
    delivered: Vec<u64>,
    errors: Vec<String>,
    raw: u64,
}

impl Inbox {
    /// Sequences delivered so far, in delivery order
    pub fn delivered(&self) -> &[u64] {
        &self.delivered
    }

    /// Error codes reported by the peer
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Count of non-envelope messages
    pub fn raw(&self) -> u64 {
        self.raw
    }
}

impl InboundHandler for Inbox {
    fn on_data(&mut self, envelope: &Envelope) -> Result<()> {
        self.delivered.push(envelope.sequence);
        self.pending.push(envelope.clone());
        Ok(())
    }

    fn on_error_message(&mut self, envelope: &Envelope) -> Result<()> {
        warn!("Peer reported {}: {}", envelope.kind, envelope.payload);
        self.errors.push(envelope.kind.clone());
        Ok(())
    }

    fn on_raw(&mut self, data: &Value) -> Result<()> {
        debug!("Raw message: {}", data);
        self.raw += 1;
        Ok(())
    }
}

/// Wiring of the components for one side of a connection
#[derive(Debug)]
pub struct Endpoint {
    role: Role,
    codec: FrameCodec,
    router: MessageRouter<Inbox>,
    heartbeat: HeartbeatMonitor,
    sessions: SessionManager,
    outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    connection_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    heartbeat_rx: mpsc::UnboundedReceiver<HeartbeatEvent>,
    session_id: Option<String>,
    disconnect_reason: Option<String>,
    health_changes: Vec<HealthState>,
}

impl Endpoint {
    /// Build an endpoint for `role` from the bridge configuration
    pub fn new(
        role: Role,
        config: &BridgeConfig,
        clock: Clock,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let mut connection_config = match role {
            Role::Client => ConnectionConfig::client(config.client_origin.clone()),
            Role::Server => ConnectionConfig::server(config.server_origin.clone()),
        };
        connection_config.session_timeout = config.session.timeout;
        connection_config.heartbeat_interval = config.heartbeat.interval;
        connection_config.server_id = config.server_id.clone();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, heartbeat_rx) = mpsc::unbounded_channel();

        let connection =
            ConnectionStateMachine::new(connection_config, clock, outbound_tx.clone(), connection_tx);
        let heartbeat = HeartbeatMonitor::new(
            config.heartbeat_config(),
            clock,
            connection.sequence_counter().clone(),
            outbound_tx,
            heartbeat_tx,
        );
        let sessions = SessionManager::new(config.session_manager_config(), clock, store);

        Self {
            role,
            codec: FrameCodec::new(),
            router: MessageRouter::new(config.router.clone(), connection, Inbox::default()),
            heartbeat,
            sessions,
            outbound_rx,
            connection_rx,
            heartbeat_rx,
            session_id: None,
            disconnect_reason: None,
            health_changes: Vec::new(),
        }
    }

    /// Handshake role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.router.connection().state()
    }

    /// Whether the handshake has completed
    pub fn is_connected(&self) -> bool {
        self.router.connection().is_connected()
    }

    /// Session negotiated in the last handshake
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Reason of the last disconnect
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Health transitions seen so far
    pub fn health_changes(&self) -> &[HealthState] {
        &self.health_changes
    }

    /// Current peer health
    pub fn health(&self) -> HealthState {
        self.heartbeat.health_state()
    }

    /// Heartbeat counters
    pub fn heartbeat_metrics(&self) -> HeartbeatMetrics {
        self.heartbeat.metrics()
    }

    /// Router counters
    pub fn router_stats(&self) -> &RouterStats {
        self.router.stats()
    }

    /// Application inbox
    pub fn inbox(&self) -> &Inbox {
        self.router.handler()
    }

    /// Session manager
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Start the handshake; the inbound sequence baseline is forgotten
    pub fn connect(&mut self) -> bool {
        let started = self.router.connection_mut().connect();
        if started {
            self.router.reset_sequence();
        }
        started
    }

    /// Begin a graceful teardown
    pub fn disconnect(&mut self, reason: &str) -> bool {
        let started = self.router.connection_mut().disconnect(reason);
        self.pump_events();
        started
    }

    /// Send an application message on the data plane
    pub fn send_data(&mut self, kind: &str, payload: Value) -> Result<u64, ProtocolError> {
        self.router.connection_mut().send_data(kind, payload)
    }

    /// Route one inbound frame; returns data envelopes newly delivered in order
    pub fn receive(&mut self, frame: &[u8]) -> (RouteOutcome, Vec<Envelope>) {
        let outcome = self.router.route_frame(frame);
        let delivered = std::mem::take(&mut self.router.handler_mut().pending);
        match self.session_id.clone() {
            Some(id) if self.is_connected() => {
                if delivered.is_empty() {
                    self.sessions.update_activity(&id);
                }
                for envelope in &delivered {
                    self.sessions
                        .update_stats(&id, MessageDirection::Received, envelope.sequence);
                }
            }
            Some(id) => debug!(
                "{} is {}, frame not counted against session {}",
                self.role,
                self.state(),
                id
            ),
            None => {}
        }
        self.pump_events();
        (outcome, delivered)
    }

    /// Fire due heartbeat and session timers
    pub fn poll_timers(&mut self) {
        let metrics = self.router.connection().metrics();
        self.heartbeat
            .update_message_stats(metrics.messages_sent, metrics.messages_received);
        self.heartbeat.poll_timers();
        self.sessions.poll_timers();
        self.pump_events();
    }

    /// Earliest timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.heartbeat.next_deadline(), self.sessions.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Encode everything queued for the peer
    pub fn take_frames(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(envelope) = self.outbound_rx.try_recv() {
            if envelope.is_data() {
                if let Some(id) = self.session_id.clone() {
                    self.sessions
                        .update_stats(&id, MessageDirection::Sent, envelope.sequence);
                }
            }
            match self.codec.encode(&envelope) {
                Ok(frame) => frames.push(frame),
                Err(e) => warn!("{} dropped outbound {}: {}", self.role, envelope.kind, e),
            }
        }
        frames
    }

    fn pump_events(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.connection_rx.try_recv() {
                progressed = true;
                self.on_connection_event(event);
            }
            while let Ok(event) = self.heartbeat_rx.try_recv() {
                progressed = true;
                self.on_heartbeat_event(event);
            }
            if !progressed {
                break;
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { session_id } => {
                let connection = self.router.connection();
                let origin = connection.remote_origin().unwrap_or_default().to_string();
                let version = connection
                    .negotiated_version()
                    .unwrap_or(bridge_wire::PROTOCOL_VERSION)
                    .to_string();
                let terms = connection.session_terms();
                info!("{} connected, session {}", self.role, session_id);
                match terms {
                    Some(terms) => {
                        self.sessions
                            .create_session_with_terms(&session_id, &origin, &version, terms, None);
                        self.heartbeat.set_interval(terms.heartbeat_interval);
                    }
                    None => {
                        self.sessions
                            .create_session_with_id(&session_id, &origin, &version, None);
                    }
                }
                self.heartbeat.start(Some(session_id.clone()));
                self.session_id = Some(session_id);
                self.disconnect_reason = None;
            }
            ConnectionEvent::Disconnected { reason } => {
                info!("{} disconnected: {}", self.role, reason);
                self.heartbeat.stop();
                if let Some(id) = &self.session_id {
                    self.sessions.suspend_session(id);
                }
                self.disconnect_reason = Some(reason);
            }
            ConnectionEvent::Error { error, fatal } => {
                warn!(
                    "{} received {} error {}: {}",
                    self.role,
                    if fatal { "fatal" } else { "recoverable" },
                    error.code,
                    error.message
                );
            }
            ConnectionEvent::Pong(pong) => {
                self.heartbeat.handle_pong(&pong);
            }
        }
    }

    fn on_heartbeat_event(&mut self, event: HeartbeatEvent) {
        let state = match event {
            HeartbeatEvent::MetricsUpdate(metrics) => {
                debug!("{} heartbeat score {}", self.role, metrics.health_score);
                return;
            }
            HeartbeatEvent::Healthy => HealthState::Healthy,
            HeartbeatEvent::Degraded => HealthState::Degraded,
            HeartbeatEvent::Dead => HealthState::Dead,
        };
        self.health_changes.push(state);
        if state == HealthState::Dead {
            warn!("{} peer unresponsive, closing", self.role);
            self.router.connection_mut().disconnect("heartbeat_timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_session::SessionState;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::advance;

    const T0: u64 = 1_700_000_000_000;

    fn pair_with(client: &BridgeConfig, server: &BridgeConfig) -> (Endpoint, Endpoint) {
        let clock = Clock::starting_at(T0);
        (
            Endpoint::new(Role::Client, client, clock, None),
            Endpoint::new(Role::Server, server, clock, None),
        )
    }

    fn pair() -> (Endpoint, Endpoint) {
        let config = BridgeConfig::default();
        pair_with(&config, &config)
    }

    fn decode(frames: &[Bytes]) -> Vec<Envelope> {
        let codec = FrameCodec::new();
        frames
            .iter()
            .map(|f| codec.decode_envelope(f).unwrap())
            .collect()
    }

    /// Shuttle frames until both sides are quiet; returns what each side sent
    fn exchange(client: &mut Endpoint, server: &mut Endpoint) -> (Vec<Envelope>, Vec<Envelope>) {
        let mut sent = (Vec::new(), Vec::new());
        loop {
            let to_server = client.take_frames();
            let to_client = server.take_frames();
            if to_server.is_empty() && to_client.is_empty() {
                return sent;
            }
            sent.0.extend(decode(&to_server));
            sent.1.extend(decode(&to_client));
            for frame in to_server {
                server.receive(&frame);
            }
            for frame in to_client {
                client.receive(&frame);
            }
        }
    }

    fn handshake(client: &mut Endpoint, server: &mut Endpoint) -> (Vec<Envelope>, Vec<Envelope>) {
        server.connect();
        client.connect();
        exchange(client, server)
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_creates_sessions_and_starts_heartbeat() {
        let start = Instant::now();
        let (mut client, mut server) = pair();
        handshake(&mut client, &mut server);

        assert!(client.is_connected());
        assert!(server.is_connected());
        let id = client.session_id().unwrap().to_string();
        assert_eq!(server.session_id(), Some(id.as_str()));
        assert!(client.sessions().get_session(&id).is_some());
        assert_eq!(
            server.sessions().get_session(&id).unwrap().remote_origin,
            "https://dapp.example"
        );
        assert_eq!(client.next_deadline(), Some(start + Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_and_heartbeat_flow() {
        let (mut client, mut server) = pair();
        handshake(&mut client, &mut server);

        let seqs: Vec<u64> = (0..3)
            .map(|i| client.send_data("WALLET_REQUEST", json!({ "id": i })).unwrap())
            .collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        exchange(&mut client, &mut server);
        assert_eq!(server.inbox().delivered(), &[3, 4, 5]);

        advance(Duration::from_secs(30)).await;
        client.poll_timers();
        server.poll_timers();
        exchange(&mut client, &mut server);
        assert_eq!(client.heartbeat_metrics().pongs_received, 1);
        assert_eq!(server.heartbeat_metrics().pongs_received, 1);
        assert_eq!(client.health(), HealthState::Healthy);
        assert_eq!(server.router_stats().duplicates, 0);

        let id = client.session_id().unwrap().to_string();
        let stats = server.sessions().get_session(&id).unwrap().stats;
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.last_sequence_received, 5);
        let stats = client.sessions().get_session(&id).unwrap().stats;
        assert_eq!(stats.messages_sent, 3);
        assert_eq!(stats.last_sequence_sent, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequences_unique_across_categories() {
        let (mut client, mut server) = pair();
        let (mut from_client, mut from_server) = handshake(&mut client, &mut server);
        client.send_data("WALLET_REQUEST", json!({ "id": 1 })).unwrap();
        let (c, s) = exchange(&mut client, &mut server);
        from_client.extend(c);
        from_server.extend(s);
        server.send_data("WALLET_RESPONSE", json!({ "id": 1 })).unwrap();

        for _ in 0..30 {
            advance(Duration::from_secs(1)).await;
            client.poll_timers();
            server.poll_timers();
            let (c, s) = exchange(&mut client, &mut server);
            from_client.extend(c);
            from_server.extend(s);
        }

        for sent in [&from_client, &from_server] {
            let seqs: Vec<u64> = sent.iter().map(|e| e.sequence).collect();
            assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<u64>>());
            assert!(sent.iter().any(|e| e.is_data()));
            assert!(sent.iter().any(|e| e.kind == bridge_wire::kinds::PING));
        }
        assert_eq!(client.heartbeat_metrics().pongs_received, 1);
        assert_eq!(server.heartbeat_metrics().pongs_received, 1);
        assert_eq!(client.router_stats().duplicates, 0);
        assert_eq!(server.router_stats().duplicates, 0);
        assert_eq!(client.inbox().delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_suspends_session() {
        let (mut client, mut server) = pair();
        handshake(&mut client, &mut server);

        assert!(client.disconnect("user_disconnect"));
        assert_eq!(client.state(), ConnectionState::Closing);
        exchange(&mut client, &mut server);

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(server.state(), ConnectionState::Closed);
        assert_eq!(client.disconnect_reason(), Some("user_disconnect"));
        assert_eq!(server.disconnect_reason(), Some("user_disconnect"));

        let id = server.session_id().unwrap().to_string();
        assert!(server.sessions().get_session(&id).is_none());
        assert_eq!(
            server.sessions().peek_session(&id).unwrap().state,
            SessionState::Suspended
        );
        assert_eq!(client.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_frame_after_disconnect_leaves_session_untouched() {
        let (mut client, mut server) = pair();
        handshake(&mut client, &mut server);
        client.send_data("WALLET_REQUEST", json!({ "id": 1 })).unwrap();
        let held = client.take_frames();
        for frame in &held {
            server.receive(frame);
        }

        client.disconnect("user_disconnect");
        exchange(&mut client, &mut server);
        assert_eq!(server.state(), ConnectionState::Closed);
        let id = server.session_id().unwrap().to_string();
        let parked = server.sessions().peek_session(&id).unwrap().clone();

        advance(Duration::from_secs(500)).await;
        for frame in &held {
            server.receive(frame);
        }
        server.receive(b"legacy frame");

        let after = server.sessions().peek_session(&id).unwrap();
        assert_eq!(after.state, SessionState::Suspended);
        assert_eq!(after.last_activity, parked.last_activity);
        assert_eq!(after.stats, parked.stats);
        assert_eq!(server.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_adopts_server_terms() {
        let start = Instant::now();
        let client_config = BridgeConfig::default();
        let mut server_config = BridgeConfig::default();
        server_config.session.timeout = Duration::from_secs(60);
        server_config.heartbeat.interval = Duration::from_secs(10);
        let (mut client, mut server) = pair_with(&client_config, &server_config);
        handshake(&mut client, &mut server);

        let id = client.session_id().unwrap().to_string();
        for endpoint in [&client, &server] {
            let session = endpoint.sessions().peek_session(&id).unwrap();
            assert_eq!(session.timeout, 60_000);
            assert_eq!(session.heartbeat_interval, 10_000);
        }
        assert_eq!(client.next_deadline(), Some(start + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_peer_is_closed() {
        let (mut client, mut server) = pair();
        handshake(&mut client, &mut server);

        // Server goes silent: client frames are never delivered
        for _ in 0..3 {
            advance(Duration::from_secs(30)).await;
            client.poll_timers();
            client.take_frames();
            advance(Duration::from_secs(10)).await;
            client.poll_timers();
            client.take_frames();
        }
        assert_eq!(
            client.health_changes(),
            &[HealthState::Degraded, HealthState::Dead]
        );
        assert_eq!(client.state(), ConnectionState::Closing);
    }
}
