//! Loopback simulation of a dapp window talking to a wallet window.
//!
//! Two [`Endpoint`]s are joined by a [`Link`] that delays, reorders and
//! optionally loses frames. The client handshakes, sends a batch of wallet
//! requests (the server answers each one), lingers so heartbeats run, then
//! disconnects. Every wait is a tokio `sleep_until`, so on a runtime whose
//! clock is paused a run covering minutes of protocol time finishes instantly.

use crate::config::{BridgeConfig, LinkSettings};
use crate::endpoint::Endpoint;
use crate::{component_debug, component_info};
use anyhow::Result;
use bridge_routing::RouterStats;
use bridge_session::{ConnectionState, HeartbeatMetrics, Role};
use bridge_storage::open_store;
use bridge_wire::{millis, Clock};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Request type sent by the client
pub const WALLET_REQUEST: &str = "WALLET_REQUEST";
/// Response type sent by the server
pub const WALLET_RESPONSE: &str = "WALLET_RESPONSE";

/// Which endpoint a frame is travelling to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Side {
    /// Dapp window
    Client,
    /// Wallet window
    Server,
}

/// Lossy, reordering channel between the two sides
#[derive(Debug)]
pub struct Link {
    settings: LinkSettings,
    rng: StdRng,
    lossy: bool,
    next_id: u64,
    in_flight: BTreeMap<(Instant, u64), (Side, Bytes)>,
    frames_sent: u64,
    frames_lost: u64,
}

impl Link {
    /// Create a link; loss applies only after [`Link::set_lossy`]
    pub fn new(settings: LinkSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: StdRng::seed_from_u64(seed),
            lossy: false,
            next_id: 0,
            in_flight: BTreeMap::new(),
            frames_sent: 0,
            frames_lost: 0,
        }
    }

    /// Enable or disable frame loss
    pub fn set_lossy(&mut self, lossy: bool) {
        self.lossy = lossy;
    }

    /// Put a frame on the wire at `now`
    pub fn send(&mut self, now: Instant, to: Side, frame: Bytes) {
        self.frames_sent += 1;
        if self.lossy && self.settings.loss > 0.0 && self.rng.gen_bool(self.settings.loss) {
            self.frames_lost += 1;
            component_debug!("link", "Lost frame to {:?} ({} bytes)", to, frame.len());
            return;
        }
        let jitter_ms = millis(self.settings.jitter);
        let jitter = if jitter_ms > 0 {
            self.rng.gen_range(0..=jitter_ms)
        } else {
            0
        };
        let deliver_at = now + self.settings.latency + Duration::from_millis(jitter);
        self.next_id += 1;
        self.in_flight.insert((deliver_at, self.next_id), (to, frame));
    }

    /// Frames due at or before `now`, in arrival order
    pub fn due(&mut self, now: Instant) -> Vec<(Side, Bytes)> {
        let later = self.in_flight.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.in_flight, later);
        due.into_values().collect()
    }

    /// Arrival time of the next frame
    pub fn next_arrival(&self) -> Option<Instant> {
        self.in_flight.keys().next().map(|(at, _)| *at)
    }

    /// Frames accepted onto the link
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames dropped by the link
    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }
}

/// Summary of one endpoint after a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointReport {
    /// Final connection state
    pub state: String,
    /// Reason of the last disconnect
    pub disconnect_reason: Option<String>,
    /// Final peer health
    pub health: String,
    /// Heartbeat counters
    pub heartbeat: HeartbeatMetrics,
    /// Router counters
    pub router: RouterStats,
    /// Data sequences delivered, in order of delivery
    pub delivered: Vec<u64>,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    /// Negotiated session id
    pub session_id: Option<String>,
    /// Milliseconds elapsed on the runtime clock
    pub elapsed_ms: u64,
    /// Requests sent by the client
    pub requests_sent: u64,
    /// Responses received by the client
    pub responses_received: u64,
    /// Frames put on the link
    pub frames_sent: u64,
    /// Frames lost by the link
    pub frames_lost: u64,
    /// Whether the run ended with both sides closed
    pub clean_shutdown: bool,
    /// Dapp side
    pub client: EndpointReport,
    /// Wallet side
    pub server: EndpointReport,
}

impl SimulationReport {
    /// Whether both sides saw strictly increasing data sequences.
    ///
    /// Gaps are expected: control and data envelopes share one sequence.
    pub fn in_order(&self) -> bool {
        let increasing = |seqs: &[u64]| seqs.windows(2).all(|w| w[1] > w[0]);
        increasing(&self.client.delivered) && increasing(&self.server.delivered)
    }
}

/// Dapp/wallet loopback driver
#[derive(Debug)]
pub struct Simulator {
    config: BridgeConfig,
    client: Endpoint,
    server: Endpoint,
    link: Link,
    started_at: Instant,
    requests_sent: u64,
    responses_received: u64,
    next_send_at: Option<Instant>,
    linger_until: Option<Instant>,
    disconnect_requested: bool,
}

impl Simulator {
    /// Build a simulator; the server side gets the configured session store.
    ///
    /// Pause the runtime clock first for a virtual-time run.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let clock = Clock::system();
        let store = if config.session.enable_persistence {
            Some(open_store(&config.storage)?)
        } else {
            None
        };
        let client = Endpoint::new(Role::Client, &config, clock, None);
        let server = Endpoint::new(Role::Server, &config, clock, store);
        let link = Link::new(config.simulation.link.clone(), config.simulation.seed);

        Ok(Self {
            config,
            client,
            server,
            link,
            started_at: Instant::now(),
            requests_sent: 0,
            responses_received: 0,
            next_send_at: None,
            linger_until: None,
            disconnect_requested: false,
        })
    }

    /// Dapp endpoint
    pub fn client(&self) -> &Endpoint {
        &self.client
    }

    /// Wallet endpoint
    pub fn server(&self) -> &Endpoint {
        &self.server
    }

    /// Run the scenario to completion
    pub async fn run(&mut self) -> SimulationReport {
        let deadline = self.started_at + self.config.simulation.max_duration;
        component_info!(
            "simulator",
            "Starting loopback: {} -> {}, {} requests",
            self.config.client_origin,
            self.config.server_origin,
            self.config.simulation.messages
        );

        self.server.connect();
        self.client.connect();
        self.flush();

        loop {
            self.step();
            if self.finished() {
                break;
            }
            let Some(next) = self.next_event() else {
                component_info!("simulator", "No pending events, stopping");
                break;
            };
            if next > deadline {
                component_info!("simulator", "Time limit reached, stopping");
                break;
            }
            sleep_until(next).await;
        }

        self.report()
    }

    fn finished(&self) -> bool {
        let closed = |state: ConnectionState| {
            matches!(state, ConnectionState::Closed | ConnectionState::Error)
        };
        self.disconnect_requested && closed(self.client.state()) && closed(self.server.state())
    }

    fn next_event(&self) -> Option<Instant> {
        [
            self.link.next_arrival(),
            self.client.next_deadline(),
            self.server.next_deadline(),
            self.next_send_at,
            self.linger_until
                .filter(|_| !self.disconnect_requested && self.client.is_connected()),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Process everything due at the current time
    fn step(&mut self) {
        let now = Instant::now();

        for (to, frame) in self.link.due(now) {
            match to {
                Side::Server => {
                    let (_, delivered) = self.server.receive(&frame);
                    for request in delivered.iter().filter(|e| e.kind == WALLET_REQUEST) {
                        let reply = json!({ "id": request.payload["id"], "result": "0x1" });
                        if let Err(e) = self.server.send_data(WALLET_RESPONSE, reply) {
                            component_debug!("simulator", "Response not sent: {}", e);
                        }
                    }
                }
                Side::Client => {
                    let (_, delivered) = self.client.receive(&frame);
                    self.responses_received += delivered
                        .iter()
                        .filter(|e| e.kind == WALLET_RESPONSE)
                        .count() as u64;
                }
            }
        }

        self.client.poll_timers();
        self.server.poll_timers();
        self.drive_script(now);
        self.flush();
    }

    fn drive_script(&mut self, now: Instant) {
        if !self.client.is_connected() {
            self.next_send_at = None;
            return;
        }
        self.link.set_lossy(true);

        let total = self.config.simulation.messages;
        if self.requests_sent < total {
            let due = *self.next_send_at.get_or_insert(now);
            if now >= due {
                let id = self.requests_sent + 1;
                let request = json!({ "id": id, "method": "eth_chainId" });
                match self.client.send_data(WALLET_REQUEST, request) {
                    Ok(_) => self.requests_sent += 1,
                    Err(e) => component_debug!("simulator", "Request not sent: {}", e),
                }
                self.next_send_at = if self.requests_sent < total {
                    Some(now + self.config.simulation.send_interval)
                } else {
                    None
                };
            }
            return;
        }

        let linger_until = *self
            .linger_until
            .get_or_insert(now + self.config.simulation.linger);
        if !self.disconnect_requested && now >= linger_until {
            component_info!("simulator", "Scenario complete, disconnecting");
            self.link.set_lossy(false);
            self.client.disconnect("user_disconnect");
            self.disconnect_requested = true;
        }
    }

    fn flush(&mut self) {
        let now = Instant::now();
        for frame in self.client.take_frames() {
            self.link.send(now, Side::Server, frame);
        }
        for frame in self.server.take_frames() {
            self.link.send(now, Side::Client, frame);
        }
    }

    fn endpoint_report(endpoint: &Endpoint) -> EndpointReport {
        EndpointReport {
            state: endpoint.state().to_string(),
            disconnect_reason: endpoint.disconnect_reason().map(str::to_string),
            health: endpoint.health().to_string(),
            heartbeat: endpoint.heartbeat_metrics(),
            router: endpoint.router_stats().clone(),
            delivered: endpoint.inbox().delivered().to_vec(),
        }
    }

    /// Current summary
    pub fn report(&self) -> SimulationReport {
        let clean_shutdown = self.client.state() == ConnectionState::Closed
            && self.server.state() == ConnectionState::Closed;
        let client = Self::endpoint_report(&self.client);
        let server = Self::endpoint_report(&self.server);
        SimulationReport {
            session_id: self.client.session_id().map(str::to_string),
            elapsed_ms: millis(self.started_at.elapsed()),
            requests_sent: self.requests_sent,
            responses_received: self.responses_received,
            frames_sent: self.link.frames_sent(),
            frames_lost: self.link.frames_lost(),
            clean_shutdown,
            client,
            server,
        }
    }
}
