//! Connection handshake and teardown state machine.
//!
//! ```text
//! client: Disconnected --connect()/HELLO--> Connecting --HELLO_ACK/READY--> Connected
//! server: Disconnected --connect()--> Connecting --HELLO/HELLO_ACK--> Handshaking --READY--> Connected
//! Connected --disconnect()/GOODBYE--> Closing --GOODBYE_ACK--> Closed
//! any --GOODBYE--> Closed            any --fatal ERROR--> Error
//! ```
//!
//! The machine performs no I/O. Outbound envelopes are pushed onto an outbound
//! queue and lifecycle notifications onto an event queue; the owning transport
//! drains both. Every envelope it emits is numbered from its
//! [`SequenceCounter`], which the heartbeat monitor shares.

use crate::error::ProtocolError;
use crate::handshake::{build_hello, build_hello_ack, build_ready, generate_session_id};
use crate::sequence::SequenceCounter;
use bridge_wire::{
    default_capabilities, CloseCode, ControlMessage, Envelope, EnvelopeBuilder, Category,
    ErrorPayload, GoodbyeAckPayload, GoodbyePayload, DisconnectedStatus, PingPayload,
    Clock, PongMetrics, PongPayload, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_SESSION_TIMEOUT_MS, SUPPORTED_VERSIONS,
};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Which end of the handshake this connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opens the handshake with HELLO (typically the dApp)
    Client,
    /// Answers HELLO and allocates the session (typically the wallet)
    Server,
}

impl Role {
    /// Prefix used for ids allocated by this role
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Idle; `connect()` is accepted
    Disconnected,
    /// Waiting for HELLO (server) or HELLO_ACK (client)
    Connecting,
    /// Server sent HELLO_ACK, waiting for READY
    Handshaking,
    /// Session established
    Connected,
    /// GOODBYE sent, waiting for GOODBYE_ACK
    Closing,
    /// Torn down
    Closed,
    /// Terminated by a fatal error
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Configuration for one connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Handshake role
    pub role: Role,
    /// Local origin announced to the peer
    pub origin: String,
    /// Capabilities offered (client) or enabled (server)
    pub capabilities: Vec<String>,
    /// Supported versions, newest first
    pub protocol_versions: Vec<String>,
    /// Session timeout advertised by the server
    pub session_timeout: Duration,
    /// Heartbeat interval advertised by the server
    pub heartbeat_interval: Duration,
    /// Optional client identifier sent in HELLO
    pub client_id: Option<String>,
    /// Optional server identifier sent in HELLO_ACK
    pub server_id: Option<String>,
    /// Free-form metadata sent in HELLO
    pub metadata: Option<Value>,
}

impl ConnectionConfig {
    /// Client configuration for `origin`
    pub fn client(origin: impl Into<String>) -> Self {
        Self {
            role: Role::Client,
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Server configuration for `origin`
    pub fn server(origin: impl Into<String>) -> Self {
        Self {
            role: Role::Server,
            origin: origin.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            origin: String::new(),
            capabilities: default_capabilities(),
            protocol_versions: SUPPORTED_VERSIONS.iter().map(|v| (*v).to_string()).collect(),
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            client_id: None,
            server_id: None,
            metadata: None,
        }
    }
}

/// Per-connection counters; these die with the state machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetrics {
    /// Envelopes emitted
    pub messages_sent: u64,
    /// Control envelopes handled
    pub messages_received: u64,
    /// Time of the last inbound control message
    pub last_activity: u64,
    /// Time `connect()` was accepted
    pub connection_start_time: Option<u64>,
    /// Last measured round trip, in milliseconds
    pub latency: Option<u64>,
}

/// Session timeout and heartbeat cadence agreed in the handshake.
///
/// The server announces its own configuration in HELLO_ACK; the client adopts
/// whatever the server announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTerms {
    /// Resume window after a disconnect
    pub session_timeout: Duration,
    /// Delay between PINGs
    pub heartbeat_interval: Duration,
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake completed
    Connected {
        /// Negotiated session id
        session_id: String,
    },
    /// Connection closed
    Disconnected {
        /// Reason given by the closing side, or `error`
        reason: String,
    },
    /// Peer reported an error
    Error {
        /// Error as reported
        error: ErrorPayload,
        /// Whether the error forced the connection into the error state
        fatal: bool,
    },
    /// PONG arrived while connected; forward to the heartbeat monitor
    Pong(PongPayload),
}

/// Handshake and teardown state machine for one connection
#[derive(Debug)]
pub struct ConnectionStateMachine {
    config: ConnectionConfig,
    clock: Clock,
    state: ConnectionState,
    session_id: Option<String>,
    remote_origin: Option<String>,
    negotiated_version: Option<String>,
    session_terms: Option<SessionTerms>,
    sequence: SequenceCounter,
    metrics: ConnectionMetrics,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Disconnected` state
    pub fn new(
        config: ConnectionConfig,
        clock: Clock,
        outbound_tx: mpsc::UnboundedSender<Envelope>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            config,
            clock,
            state: ConnectionState::Disconnected,
            session_id: None,
            remote_origin: None,
            negotiated_version: None,
            session_terms: None,
            sequence: SequenceCounter::new(),
            metrics: ConnectionMetrics::default(),
            outbound_tx,
            event_tx,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Handshake role
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Session id, once allocated (server) or adopted (client)
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Origin announced by the peer
    pub fn remote_origin(&self) -> Option<&str> {
        self.remote_origin.as_deref()
    }

    /// Version agreed during the handshake
    pub fn negotiated_version(&self) -> Option<&str> {
        self.negotiated_version.as_deref()
    }

    /// Timeout and heartbeat cadence in force, once the handshake got far enough
    pub fn session_terms(&self) -> Option<SessionTerms> {
        self.session_terms
    }

    /// Counter numbering every outbound envelope of this connection
    pub fn sequence_counter(&self) -> &SequenceCounter {
        &self.sequence
    }

    /// Connection counters
    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Whether the handshake has completed
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Begin the handshake.
    ///
    /// Only accepted from `Disconnected`; a second call while a handshake is in
    /// flight is ignored so concurrent callers collapse onto one attempt.
    pub fn connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            warn!(
                "connect() ignored: {} connection already {}",
                self.config.role, self.state
            );
            return false;
        }

        self.metrics.connection_start_time = Some(self.clock.now_ms());
        self.transition(ConnectionState::Connecting);

        if self.config.role == Role::Client {
            let hello = build_hello(&self.config);
            self.emit(ControlMessage::Hello(hello));
        }
        true
    }

    /// Start an orderly close.
    ///
    /// Ignored when nothing is open or a close is already under way.
    pub fn disconnect(&mut self, reason: &str) -> bool {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Closed | ConnectionState::Closing
        ) {
            debug!("disconnect({}) ignored in state {}", reason, self.state);
            return false;
        }

        self.emit(ControlMessage::Goodbye(GoodbyePayload {
            reason: reason.to_string(),
            code: CloseCode::Normal.as_u16(),
            can_reconnect: false,
            message: None,
        }));
        self.transition(ConnectionState::Closing);
        true
    }

    /// Force back to `Disconnected`, forgetting the session and all counters
    pub fn reset(&mut self) {
        debug!("Resetting {} connection from {}", self.config.role, self.state);
        self.state = ConnectionState::Disconnected;
        self.session_id = None;
        self.remote_origin = None;
        self.negotiated_version = None;
        self.session_terms = None;
        self.sequence.reset();
        self.metrics = ConnectionMetrics::default();
    }

    /// Send an application payload on the data plane; returns its sequence
    pub fn send_data(&mut self, kind: &str, payload: Value) -> Result<u64, ProtocolError> {
        if self.state != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected(self.state));
        }
        let sequence = self.sequence.next();
        let envelope = EnvelopeBuilder::new(Category::Data, kind)
            .sequence(sequence)
            .session_id(self.session_id.clone())
            .timestamp(self.clock.now_ms())
            .payload(payload)
            .build();
        self.push_outbound(envelope);
        Ok(sequence)
    }

    /// Report an error to the peer on the error plane
    pub fn send_error(&mut self, error: ErrorPayload) -> Result<u64, ProtocolError> {
        let sequence = self.sequence.next();
        let envelope = EnvelopeBuilder::new(Category::Error, error.code.clone())
            .sequence(sequence)
            .session_id(self.session_id.clone())
            .timestamp(self.clock.now_ms())
            .payload(serde_json::to_value(&error).map_err(bridge_wire::WireError::from)?)
            .build();
        self.push_outbound(envelope);
        Ok(sequence)
    }

    /// Handle an inbound control envelope.
    ///
    /// Every call counts as activity, whether or not the message is valid.
    /// Errors are logged here and returned for inspection; they never leave the
    /// machine in a partially updated state.
    pub fn handle_message(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        self.metrics.messages_received += 1;
        self.metrics.last_activity = self.clock.now_ms();

        let result = ControlMessage::decode(envelope)
            .map_err(ProtocolError::from)
            .and_then(|message| self.dispatch(message));

        if let Err(e) = &result {
            warn!(
                "{} dropped {} #{}: {}",
                self.config.role, envelope.kind, envelope.sequence, e
            );
        }
        result
    }

    fn dispatch(&mut self, message: ControlMessage) -> Result<(), ProtocolError> {
        match message {
            ControlMessage::Hello(hello) => {
                self.expect(Role::Server, ConnectionState::Connecting, "HELLO")?;
                let session_id = generate_session_id(self.config.role.prefix(), self.clock.now_ms());
                let ack = build_hello_ack(&self.config, &hello, session_id.clone());
                info!(
                    "HELLO from {} (versions {:?}), negotiated {}, session {}",
                    hello.origin, hello.protocol_versions, ack.negotiated_version, session_id
                );
                self.session_id = Some(session_id);
                self.remote_origin = Some(hello.origin);
                self.negotiated_version = Some(ack.negotiated_version.clone());
                self.session_terms = Some(SessionTerms {
                    session_timeout: self.config.session_timeout,
                    heartbeat_interval: self.config.heartbeat_interval,
                });
                self.emit(ControlMessage::HelloAck(ack));
                self.transition(ConnectionState::Handshaking);
            }
            ControlMessage::HelloAck(ack) => {
                self.expect(Role::Client, ConnectionState::Connecting, "HELLO_ACK")?;
                info!(
                    "HELLO_ACK from {}, session {} on version {}",
                    ack.origin, ack.session_id, ack.negotiated_version
                );
                self.session_id = Some(ack.session_id.clone());
                self.remote_origin = Some(ack.origin);
                self.negotiated_version = Some(ack.negotiated_version);
                self.session_terms = Some(SessionTerms {
                    session_timeout: Duration::from_millis(ack.session_timeout),
                    heartbeat_interval: Duration::from_millis(ack.heartbeat_interval),
                });
                self.emit(ControlMessage::Ready(build_ready(&ack.session_id)));
                self.transition(ConnectionState::Connected);
                self.notify(ConnectionEvent::Connected {
                    session_id: ack.session_id,
                });
            }
            ControlMessage::Ready(ready) => {
                self.expect(Role::Server, ConnectionState::Handshaking, "READY")?;
                if self.session_id.as_deref() != Some(ready.session_id.as_str()) {
                    return Err(ProtocolError::SessionMismatch {
                        expected: self.session_id.clone(),
                        received: ready.session_id,
                    });
                }
                self.transition(ConnectionState::Connected);
                self.notify(ConnectionEvent::Connected {
                    session_id: ready.session_id,
                });
            }
            ControlMessage::Ping(ping) => self.on_ping(ping),
            ControlMessage::Pong(pong) => {
                if self.state != ConnectionState::Connected {
                    debug!("PONG ignored in state {}", self.state);
                    return Ok(());
                }
                self.metrics.latency = Some(self.clock.now_ms().saturating_sub(pong.ping_time));
                self.notify(ConnectionEvent::Pong(pong));
            }
            ControlMessage::Goodbye(goodbye) => {
                info!(
                    "GOODBYE from peer: {} (code {})",
                    goodbye.reason, goodbye.code
                );
                self.emit(ControlMessage::GoodbyeAck(GoodbyeAckPayload {
                    status: DisconnectedStatus::Disconnected,
                    reason: goodbye.reason.clone(),
                }));
                self.transition(ConnectionState::Closed);
                self.notify(ConnectionEvent::Disconnected {
                    reason: goodbye.reason,
                });
            }
            ControlMessage::GoodbyeAck(ack) => {
                self.transition(ConnectionState::Closed);
                self.notify(ConnectionEvent::Disconnected { reason: ack.reason });
            }
            ControlMessage::Error(error) => {
                if error.recoverable {
                    warn!("Recoverable error from peer: {} {}", error.code, error.message);
                    self.notify(ConnectionEvent::Error {
                        error,
                        fatal: false,
                    });
                } else {
                    warn!("Fatal error from peer: {} {}", error.code, error.message);
                    self.transition(ConnectionState::Error);
                    self.notify(ConnectionEvent::Error { error, fatal: true });
                    self.notify(ConnectionEvent::Disconnected {
                        reason: "error".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn on_ping(&mut self, ping: PingPayload) {
        if self.state != ConnectionState::Connected {
            debug!("PING ignored in state {}", self.state);
            return;
        }
        let now = self.clock.now_ms();
        let pong = PongPayload {
            metrics: PongMetrics {
                messages_sent: self.metrics.messages_sent,
                messages_received: self.metrics.messages_received,
                latency: now.saturating_sub(ping.ping_time),
                memory_usage: None,
            },
            ping_time: ping.ping_time,
            pong_time: now,
        };
        self.emit(ControlMessage::Pong(pong));
    }

    fn expect(&self, role: Role, state: ConnectionState, kind: &str) -> Result<(), ProtocolError> {
        if self.config.role != role || self.state != state {
            return Err(ProtocolError::ProtocolViolation {
                kind: kind.to_string(),
                state: self.state,
                role: self.config.role,
            });
        }
        Ok(())
    }

    fn emit(&mut self, message: ControlMessage) {
        let kind = message.kind();
        let payload = match message.payload_value() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {}: {}", kind, e);
                return;
            }
        };
        let sequence = self.sequence.next();
        let envelope = EnvelopeBuilder::new(Category::Control, kind)
            .sequence(sequence)
            .session_id(self.session_id.clone())
            .timestamp(self.clock.now_ms())
            .payload(payload)
            .build();
        debug!("{} -> {} #{}", self.config.role, kind, sequence);
        self.push_outbound(envelope);
    }

    fn push_outbound(&mut self, envelope: Envelope) {
        if self.outbound_tx.send(envelope).is_err() {
            warn!("Outbound channel closed, message dropped");
            return;
        }
        self.metrics.messages_sent += 1;
    }

    fn notify(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Connection event receiver dropped");
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("{} connection {} -> {}", self.config.role, self.state, next);
            self.state = next;
        }
    }
}
