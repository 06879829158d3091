//! End-to-end protocol behaviour across the wire, session and routing crates.

use bridge_routing::{InboundHandler, MessageRouter, RouteOutcome, RouterConfig};
use bridge_session::{
    ConnectionConfig, ConnectionEvent, ConnectionState, ConnectionStateMachine, HealthState,
    HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, SequenceCounter, SessionManager,
    SessionManagerConfig, SessionState,
};
use bridge_storage::{FileStore, FileStoreConfig, KeyValueStore};
use bridge_wire::{
    create_data_message, kinds, negotiate_version, Clock, Envelope, FrameCodec, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::advance;
use wallet_bridge::config::LinkSettings;
use wallet_bridge::{BridgeConfig, Simulator};

const T0: u64 = 1_700_000_000_000;

#[derive(Debug, Default)]
struct Collected {
    data: Vec<u64>,
}

impl InboundHandler for Collected {
    fn on_data(&mut self, envelope: &Envelope) -> anyhow::Result<()> {
        self.data.push(envelope.sequence);
        Ok(())
    }
}

struct Side {
    router: MessageRouter<Collected>,
    outbound: UnboundedReceiver<Envelope>,
    events: UnboundedReceiver<ConnectionEvent>,
}

impl Side {
    fn new(config: ConnectionConfig, clock: Clock) -> Self {
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let connection = ConnectionStateMachine::new(config, clock, out_tx, event_tx);
        Self {
            router: MessageRouter::new(RouterConfig::default(), connection, Collected::default()),
            outbound,
            events,
        }
    }

    fn frames(&mut self) -> Vec<Vec<u8>> {
        let codec = FrameCodec::new();
        let mut frames = Vec::new();
        while let Ok(envelope) = self.outbound.try_recv() {
            frames.push(codec.encode(&envelope).unwrap().to_vec());
        }
        frames
    }

    fn events(&mut self) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn state(&self) -> ConnectionState {
        self.router.connection().state()
    }
}

fn pump(a: &mut Side, b: &mut Side) {
    loop {
        let to_b = a.frames();
        let to_a = b.frames();
        if to_a.is_empty() && to_b.is_empty() {
            return;
        }
        for frame in to_b {
            b.router.route_frame(&frame);
        }
        for frame in to_a {
            a.router.route_frame(&frame);
        }
    }
}

fn connected_pair(clock: Clock) -> (Side, Side) {
    let mut client = Side::new(ConnectionConfig::client("https://dapp.example"), clock);
    let mut server = Side::new(ConnectionConfig::server("https://wallet.example"), clock);
    server.router.connection_mut().connect();
    client.router.connection_mut().connect();
    pump(&mut client, &mut server);
    (client, server)
}

#[test]
fn test_version_negotiation() {
    assert_eq!(negotiate_version(&["3.0.0", "2.0.0", "1.0.0"]), "2.0.0");
    assert_eq!(negotiate_version(&["99.0.0"]), PROTOCOL_VERSION);
}

#[tokio::test(start_paused = true)]
async fn test_full_handshake_over_frames() {
    let clock = Clock::starting_at(T0);
    let mut client = Side::new(ConnectionConfig::client("https://dapp.example"), clock);
    let mut server = Side::new(ConnectionConfig::server("https://wallet.example"), clock);

    server.router.connection_mut().connect();
    assert!(client.router.connection_mut().connect());
    let hello = client.frames();
    assert_eq!(hello.len(), 1);

    server.router.route_frame(&hello[0]);
    assert_eq!(server.state(), ConnectionState::Handshaking);
    let session_id = server.router.connection().session_id().unwrap().to_string();
    assert!(session_id.starts_with("server_"));

    pump(&mut client, &mut server);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(server.state(), ConnectionState::Connected);
    assert_eq!(client.router.connection().session_id(), Some(session_id.as_str()));

    let expected = vec![ConnectionEvent::Connected {
        session_id: session_id.clone(),
    }];
    assert_eq!(client.events(), expected);
    assert_eq!(server.events(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_data_reordering_end_to_end() {
    let clock = Clock::starting_at(T0);
    let (mut client, mut server) = connected_pair(clock);

    for i in 1..=6 {
        client
            .router
            .connection_mut()
            .send_data("WALLET_REQUEST", json!({ "i": i }))
            .unwrap();
    }
    let frames = client.frames();
    assert_eq!(frames.len(), 6);

    // HELLO and READY took sequences 1 and 2
    for idx in [0, 2, 3, 5] {
        server.router.route_frame(&frames[idx]);
    }
    assert_eq!(server.router.handler().data, vec![3]);
    server.router.route_frame(&frames[1]);
    server.router.route_frame(&frames[4]);
    assert_eq!(server.router.handler().data, vec![3, 4, 5, 6, 7, 8]);

    assert_eq!(
        server.router.route_frame(&frames[0]),
        RouteOutcome::Duplicate
    );
    assert_eq!(server.router.handler().data.len(), 6);
    assert_eq!(server.router.stats().dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_raw_values_bypass_sequencing() {
    let clock = Clock::starting_at(T0);
    let (_client, mut server) = connected_pair(clock);
    let legacy: Value = json!({ "jsonrpc": "2.0", "method": "eth_accounts", "id": 1 });
    assert_eq!(server.router.route(legacy), RouteOutcome::Raw);
    let data = |seq| create_data_message("X", json!(null), seq, None).to_value().unwrap();
    assert_eq!(server.router.route(data(9)), RouteOutcome::Buffered);
    assert_eq!(server.router.route(data(3)), RouteOutcome::Delivered(1));
    assert_eq!(server.router.stats().raw_messages, 1);
    assert_eq!(server.router.buffered_sequences(), vec![9]);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_shares_connection_sequence() {
    let clock = Clock::starting_at(T0);
    let (mut client, mut server) = connected_pair(clock);
    let (ping_tx, mut pings) = mpsc::unbounded_channel();
    let (event_tx, _events) = mpsc::unbounded_channel();
    let mut monitor = HeartbeatMonitor::new(
        HeartbeatConfig::default(),
        clock,
        client.router.connection().sequence_counter().clone(),
        ping_tx,
        event_tx,
    );

    client
        .router
        .connection_mut()
        .send_data("WALLET_REQUEST", json!({ "i": 1 }))
        .unwrap();
    monitor.send_ping();
    client
        .router
        .connection_mut()
        .send_data("WALLET_REQUEST", json!({ "i": 2 }))
        .unwrap();

    let codec = FrameCodec::new();
    let mut frames = client.frames();
    let ping = pings.try_recv().unwrap();
    assert_eq!(ping.sequence, 4);
    frames.insert(1, codec.encode(&ping).unwrap().to_vec());
    for frame in &frames {
        server.router.route_frame(frame);
    }
    assert_eq!(server.router.handler().data, vec![3, 5]);
    assert_eq!(server.router.stats().duplicates, 0);
    assert_eq!(server.router.stats().last_sequence, Some(5));
    let pong = server.frames();
    assert_eq!(codec.decode_envelope(&pong[0]).unwrap().kind, kinds::PONG);
}

#[tokio::test(start_paused = true)]
async fn test_teardown() {
    let clock = Clock::starting_at(T0);
    let (mut client, mut server) = connected_pair(clock);
    client.events();
    server.events();

    assert!(client.router.connection_mut().disconnect("user_disconnect"));
    assert_eq!(client.state(), ConnectionState::Closing);
    let goodbye = client.frames();
    let envelope = FrameCodec::new().decode_envelope(&goodbye[0]).unwrap();
    assert_eq!(envelope.kind, kinds::GOODBYE);
    assert_eq!(envelope.payload["reason"], "user_disconnect");
    assert_eq!(envelope.payload["code"], 1000);

    server.router.route_frame(&goodbye[0]);
    assert_eq!(server.state(), ConnectionState::Closed);
    pump(&mut client, &mut server);

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(
        client.events(),
        vec![ConnectionEvent::Disconnected {
            reason: "user_disconnect".into()
        }]
    );
    assert!(!client.router.connection_mut().disconnect("again"));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_death_without_pongs() {
    let clock = Clock::starting_at(T0);
    let (ping_tx, mut pings) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let mut monitor = HeartbeatMonitor::new(
        HeartbeatConfig::default(),
        clock,
        SequenceCounter::new(),
        ping_tx,
        event_tx,
    );
    monitor.start(Some("server_x_y".into()));

    let mut sent = 0;
    for _ in 0..40 {
        advance(Duration::from_secs(5)).await;
        monitor.poll_timers();
        while pings.try_recv().is_ok() {
            sent += 1;
        }
    }
    assert_eq!(sent, 3);
    assert_eq!(monitor.health_state(), HealthState::Dead);

    let mut health = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !matches!(event, HeartbeatEvent::MetricsUpdate(_)) {
            health.push(event);
        }
    }
    assert_eq!(health, vec![HeartbeatEvent::Degraded, HeartbeatEvent::Dead]);
}

#[tokio::test(start_paused = true)]
async fn test_session_resume_window_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::new(FileStoreConfig {
            data_dir: dir.path().to_path_buf(),
            sync_writes: false,
        })
        .unwrap(),
    );
    let clock = Clock::starting_at(T0);
    let timeout = 300_000;

    let id = {
        let mut manager = SessionManager::new(
            SessionManagerConfig::default(),
            clock,
            Some(store.clone()),
        );
        let session = manager.create_session("https://dapp.example", None);
        manager.suspend_session(&session.id);
        session.id
    };

    advance(Duration::from_millis(timeout + 1)).await;
    let mut manager =
        SessionManager::new(SessionManagerConfig::default(), clock, Some(store.clone()));
    assert_eq!(
        manager.peek_session(&id).map(|s| s.state),
        Some(SessionState::Suspended)
    );
    assert!(manager.resume_session(&id).is_some());
    assert!(manager.suspend_session(&id));

    advance(Duration::from_millis(2 * timeout + 1)).await;
    assert!(manager.resume_session(&id).is_none());
    assert_eq!(manager.cleanup_expired_sessions(), 1);
    assert!(store.keys_with_prefix("wallet_bridge_session_").unwrap().is_empty());
}

fn simulation_config(loss: f64, jitter_ms: u64) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.simulation.messages = 25;
    config.simulation.send_interval = Duration::from_millis(10);
    config.simulation.linger = Duration::from_secs(65);
    config.simulation.link = LinkSettings {
        latency: Duration::from_millis(2),
        jitter: Duration::from_millis(jitter_ms),
        loss,
    };
    config
}

#[tokio::test(start_paused = true)]
async fn test_loopback_simulation_lossless() {
    let config = simulation_config(0.0, 0);
    let mut simulator = Simulator::new(config).unwrap();
    let report = simulator.run().await;

    assert!(report.clean_shutdown);
    assert_eq!(report.requests_sent, 25);
    assert_eq!(report.responses_received, 25);
    assert_eq!(report.server.delivered.len(), 25);
    assert!(report.in_order());
    assert_eq!(report.server.router.duplicates, 0);
    assert_eq!(report.client.router.duplicates, 0);
    assert_eq!(report.client.disconnect_reason.as_deref(), Some("user_disconnect"));
    assert_eq!(report.server.disconnect_reason.as_deref(), Some("user_disconnect"));
    assert!(report.client.heartbeat.pongs_received >= 2);
    assert_eq!(report.client.heartbeat.missed_pongs, 0);
    assert_eq!(report.frames_lost, 0);
}

#[tokio::test(start_paused = true)]
async fn test_loopback_simulation_with_jitter_stays_ordered() {
    let config = simulation_config(0.0, 40);
    let mut simulator = Simulator::new(config).unwrap();
    let report = simulator.run().await;

    assert!(report.clean_shutdown);
    assert_eq!(report.server.delivered.len(), 25);
    assert_eq!(report.responses_received, 25);
    assert!(report.server.router.out_of_sequence > 0);
    assert!(report.in_order());
}

#[tokio::test(start_paused = true)]
async fn test_loopback_simulation_with_loss_never_misorders() {
    let config = simulation_config(0.2, 5);
    let mut simulator = Simulator::new(config).unwrap();
    let report = simulator.run().await;

    assert!(report.frames_lost > 0);
    assert!(report.in_order());
    assert!(report.server.delivered.len() <= 25);
    assert!(report.elapsed_ms <= 600_000);
}
