//! PING/PONG liveness probing and health scoring.
//!
//! Each PING is tracked by its envelope sequence, drawn from the connection's
//! [`SequenceCounter`]; the matching PONG echoes the `pingTime`, which is only
//! a secondary lookup since two PINGs may share a millisecond. A PING that
//! goes unanswered for `timeout` counts as missed. After `max_missed`
//! consecutive misses the peer is declared dead and the ping loop stops until
//! [`HeartbeatMonitor::start`] is called again.

use crate::sequence::SequenceCounter;
use bridge_wire::{
    kinds, Category, Clock, Envelope, EnvelopeBuilder, PingMetrics, PingPayload, PongPayload,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Number of latency samples kept for the rolling average
pub const LATENCY_WINDOW: usize = 10;

/// Score below which a responsive peer is still considered degraded
pub const DEGRADED_SCORE: u8 = 70;

/// Heartbeat configuration
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Delay between PINGs
    pub interval: Duration,
    /// How long to wait for a PONG
    pub timeout: Duration,
    /// Consecutive misses before the peer is dead
    pub max_missed: u32,
    /// Embed message statistics in PINGs
    pub include_metrics: bool,
    /// Start probing as soon as the monitor is created
    pub auto_start: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            max_missed: 3,
            include_metrics: true,
            auto_start: false,
        }
    }
}

/// Peer health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    /// Answering promptly
    Healthy,
    /// Missing PONGs or slow
    Degraded,
    /// Too many consecutive misses
    Dead,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Snapshot of heartbeat counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMetrics {
    /// PINGs sent
    pub pings_sent: u64,
    /// PONGs matched to a pending PING
    pub pongs_received: u64,
    /// PINGs that timed out
    pub missed_pongs: u64,
    /// Misses since the last matched PONG
    pub consecutive_missed: u32,
    /// Mean of the last ten round trips, in milliseconds
    pub avg_latency: f64,
    /// Smallest observed round trip
    pub min_latency: Option<u64>,
    /// Largest observed round trip
    pub max_latency: Option<u64>,
    /// Time of the last matched PONG
    pub last_successful: Option<u64>,
    /// Health score in `0..=100`, derived from the counters above
    pub health_score: u8,
}

/// Heartbeat notifications; health events fire only on a state change
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatEvent {
    /// Peer became healthy
    Healthy,
    /// Peer became degraded
    Degraded,
    /// Peer declared dead; the ping loop has stopped
    Dead,
    /// Counters changed after a PONG
    MetricsUpdate(HeartbeatMetrics),
}

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    ping_time: u64,
    deadline: Instant,
}

/// Latency multiplier applied to the health score
fn latency_band(avg_latency: f64) -> f64 {
    if avg_latency < 50.0 {
        1.0
    } else if avg_latency < 200.0 {
        0.8
    } else if avg_latency < 500.0 {
        0.6
    } else if avg_latency < 1000.0 {
        0.4
    } else {
        0.2
    }
}

/// Liveness monitor for one connection
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    clock: Clock,
    session_id: Option<String>,
    sequence: SequenceCounter,
    running: bool,
    state: HealthState,
    next_ping: Option<Instant>,
    pending: BTreeMap<u64, PendingPing>,
    latencies: VecDeque<u64>,
    pings_sent: u64,
    pongs_received: u64,
    missed_pongs: u64,
    consecutive_missed: u32,
    min_latency: Option<u64>,
    max_latency: Option<u64>,
    last_successful: Option<u64>,
    messages_sent: u64,
    messages_received: u64,
    last_activity: u64,
    ping_tx: mpsc::UnboundedSender<Envelope>,
    event_tx: mpsc::UnboundedSender<HeartbeatEvent>,
}

impl HeartbeatMonitor {
    /// Create a monitor numbering its PINGs from `sequence`.
    ///
    /// Starts probing immediately when `auto_start` is set.
    pub fn new(
        config: HeartbeatConfig,
        clock: Clock,
        sequence: SequenceCounter,
        ping_tx: mpsc::UnboundedSender<Envelope>,
        event_tx: mpsc::UnboundedSender<HeartbeatEvent>,
    ) -> Self {
        let auto_start = config.auto_start;
        let mut monitor = Self {
            config,
            clock,
            session_id: None,
            sequence,
            running: false,
            state: HealthState::Healthy,
            next_ping: None,
            pending: BTreeMap::new(),
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            pings_sent: 0,
            pongs_received: 0,
            missed_pongs: 0,
            consecutive_missed: 0,
            min_latency: None,
            max_latency: None,
            last_successful: None,
            messages_sent: 0,
            messages_received: 0,
            last_activity: 0,
            ping_tx,
            event_tx,
        };
        if auto_start {
            monitor.start(None);
        }
        monitor
    }

    /// (Re)start probing; the first PING goes out after one interval.
    ///
    /// Any armed timers are cancelled first. A dead monitor is revived.
    pub fn start(&mut self, session_id: Option<String>) {
        self.pending.clear();
        if session_id.is_some() {
            self.session_id = session_id;
        }
        if self.state == HealthState::Dead {
            self.consecutive_missed = 0;
            self.set_state(HealthState::Healthy);
        }
        self.running = true;
        self.next_ping = Some(Instant::now() + self.config.interval);
        debug!(
            "Heartbeat started for {:?}, interval {:?}",
            self.session_id, self.config.interval
        );
    }

    /// Cancel all timers and forget pending PINGs; safe to call repeatedly
    pub fn stop(&mut self) {
        if self.running {
            debug!("Heartbeat stopped for {:?}", self.session_id);
        }
        self.running = false;
        self.next_ping = None;
        self.pending.clear();
    }

    /// Stop and detach from the session
    pub fn dispose(&mut self) {
        self.stop();
        self.session_id = None;
    }

    /// Whether the ping loop is active
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current health
    pub fn health_state(&self) -> HealthState {
        self.state
    }

    /// Delay between PINGs
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Change the PING cadence; takes effect from the next [`start`](Self::start)
    pub fn set_interval(&mut self, interval: Duration) {
        self.config.interval = interval;
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.deadline)
            .chain(self.next_ping)
            .min()
    }

    /// Number of PINGs awaiting a PONG
    pub fn pending_pings(&self) -> usize {
        self.pending.len()
    }

    /// Message counters to embed in the next PING
    pub fn update_message_stats(&mut self, sent: u64, received: u64) {
        self.messages_sent = sent;
        self.messages_received = received;
        self.last_activity = self.clock.now_ms();
    }

    /// Send a PING now; returns its sequence, or `None` once dead
    pub fn send_ping(&mut self) -> Option<u64> {
        if self.state == HealthState::Dead {
            debug!("PING suppressed: peer is dead");
            return None;
        }

        let now = self.clock.now_ms();
        let sequence = self.sequence.next();
        self.pings_sent += 1;
        self.pending.insert(
            sequence,
            PendingPing {
                ping_time: now,
                deadline: Instant::now() + self.config.timeout,
            },
        );

        let metrics = if self.config.include_metrics {
            PingMetrics {
                messages_sent: self.messages_sent,
                messages_received: self.messages_received,
                last_activity: self.last_activity,
                memory_usage: None,
            }
        } else {
            PingMetrics::default()
        };
        let payload = PingPayload {
            metrics,
            ping_time: now,
        };
        match serde_json::to_value(&payload) {
            Ok(value) => {
                let envelope = EnvelopeBuilder::new(Category::Control, kinds::PING)
                    .sequence(sequence)
                    .session_id(self.session_id.clone())
                    .timestamp(now)
                    .payload(value)
                    .build();
                if self.ping_tx.send(envelope).is_err() {
                    warn!("Ping channel closed, PING #{} dropped", sequence);
                }
            }
            Err(e) => warn!("Failed to encode PING: {}", e),
        }
        Some(sequence)
    }

    /// Match a PONG against the oldest pending PING with the same `pingTime`.
    ///
    /// Unknown or duplicate PONGs are ignored; returns whether it matched.
    pub fn handle_pong(&mut self, pong: &PongPayload) -> bool {
        let matched = self
            .pending
            .iter()
            .find(|(_, p)| p.ping_time == pong.ping_time)
            .map(|(sequence, _)| *sequence);
        let Some(sequence) = matched else {
            warn!(
                "Ignoring unknown or duplicate PONG for pingTime {}",
                pong.ping_time
            );
            return false;
        };
        self.pending.remove(&sequence);

        let latency = pong.pong_time.saturating_sub(pong.ping_time);
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
        self.pongs_received += 1;
        self.consecutive_missed = 0;
        self.last_successful = Some(self.clock.now_ms());

        if self.state != HealthState::Dead {
            let next = if self.health_score() < DEGRADED_SCORE {
                HealthState::Degraded
            } else {
                HealthState::Healthy
            };
            self.set_state(next);
        }
        self.notify(HeartbeatEvent::MetricsUpdate(self.metrics()));
        true
    }

    /// Fire every timer due now, earliest first; a PING due at the same
    /// instant as a timeout goes out first
    pub fn poll_timers(&mut self) {
        let now = Instant::now();
        let mut due: Vec<(Instant, Option<u64>)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(sequence, p)| (p.deadline, Some(*sequence)))
            .collect();
        if let Some(at) = self.next_ping.filter(|at| *at <= now) {
            due.push((at, None));
        }
        due.sort();

        for (_, timer) in due {
            match timer {
                None => {
                    if !self.running {
                        continue;
                    }
                    self.next_ping = None;
                    self.send_ping();
                    if self.running {
                        self.next_ping = Some(now + self.config.interval);
                    }
                }
                Some(sequence) => {
                    if let Some(ping) = self.pending.remove(&sequence) {
                        self.on_missed(sequence, ping.ping_time);
                    }
                }
            }
        }
    }

    fn on_missed(&mut self, sequence: u64, ping_time: u64) {
        self.missed_pongs += 1;
        self.consecutive_missed += 1;
        warn!(
            "PONG missed for PING #{} at {} ({}/{} consecutive)",
            sequence, ping_time, self.consecutive_missed, self.config.max_missed
        );

        if self.consecutive_missed >= self.config.max_missed {
            info!(
                "Peer dead after {} missed PONGs, score {}",
                self.consecutive_missed,
                self.health_score()
            );
            self.stop();
            self.set_state(HealthState::Dead);
        } else {
            self.set_state(HealthState::Degraded);
        }
    }

    /// Mean of the latency window, or zero before the first PONG
    pub fn average_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.latencies.iter().sum();
        sum as f64 / self.latencies.len() as f64
    }

    /// Health score in `0..=100`, always derived from the live counters
    pub fn health_score(&self) -> u8 {
        let max_missed = f64::from(self.config.max_missed.max(1));
        let miss_ratio = (f64::from(self.consecutive_missed) / max_missed).min(1.0);
        let score = (1.0 - miss_ratio * 0.7) * latency_band(self.average_latency()) * 100.0;
        score.round().clamp(0.0, 100.0) as u8
    }

    /// Counter snapshot
    pub fn metrics(&self) -> HeartbeatMetrics {
        HeartbeatMetrics {
            pings_sent: self.pings_sent,
            pongs_received: self.pongs_received,
            missed_pongs: self.missed_pongs,
            consecutive_missed: self.consecutive_missed,
            avg_latency: self.average_latency(),
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            last_successful: self.last_successful,
            health_score: self.health_score(),
        }
    }

    fn set_state(&mut self, next: HealthState) {
        if self.state == next {
            return;
        }
        info!("Peer health {} -> {}", self.state, next);
        self.state = next;
        self.notify(match next {
            HealthState::Healthy => HeartbeatEvent::Healthy,
            HealthState::Degraded => HeartbeatEvent::Degraded,
            HealthState::Dead => HeartbeatEvent::Dead,
        });
    }

    fn notify(&self, event: HeartbeatEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Heartbeat event receiver dropped");
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_wire::PongMetrics;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        sequence: SequenceCounter,
        monitor: HeartbeatMonitor,
        pings: UnboundedReceiver<Envelope>,
        events: UnboundedReceiver<HeartbeatEvent>,
    }

    impl Harness {
        fn new(config: HeartbeatConfig) -> Self {
            let clock = Clock::starting_at(1_000_000);
            let sequence = SequenceCounter::new();
            let (ping_tx, pings) = mpsc::unbounded_channel();
            let (event_tx, events) = mpsc::unbounded_channel();
            let monitor =
                HeartbeatMonitor::new(config, clock, sequence.clone(), ping_tx, event_tx);
            Self {
                sequence,
                monitor,
                pings,
                events,
            }
        }

        async fn advance(&mut self, ms: u64) {
            tokio::time::advance(Duration::from_millis(ms)).await;
            self.monitor.poll_timers();
        }

        fn pings(&mut self) -> Vec<Envelope> {
            let mut out = Vec::new();
            while let Ok(p) = self.pings.try_recv() {
                out.push(p);
            }
            out
        }

        fn health_events(&mut self) -> Vec<HeartbeatEvent> {
            let mut out = Vec::new();
            while let Ok(e) = self.events.try_recv() {
                if !matches!(e, HeartbeatEvent::MetricsUpdate(_)) {
                    out.push(e);
                }
            }
            out
        }
    }

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_millis(1_000),
            timeout: Duration::from_millis(500),
            max_missed: 3,
            include_metrics: true,
            auto_start: false,
        }
    }

    fn pong_for(ping: &Envelope, rtt: u64) -> PongPayload {
        let ping_time = ping.payload["pingTime"].as_u64().unwrap();
        PongPayload {
            metrics: PongMetrics::default(),
            ping_time,
            pong_time: ping_time + rtt,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ping_after_interval() {
        let mut h = Harness::new(config());
        h.monitor.start(Some("server_a_b".into()));
        h.advance(999).await;
        assert!(h.pings().is_empty());
        h.advance(1).await;
        let pings = h.pings();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].kind, kinds::PING);
        assert_eq!(pings[0].session_id.as_deref(), Some("server_a_b"));
        assert_eq!(pings[0].payload["pingTime"], 1_001_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_start() {
        let mut h = Harness::new(HeartbeatConfig {
            auto_start: true,
            ..config()
        });
        assert!(h.monitor.is_running());
        h.advance(1_000).await;
        assert_eq!(h.pings().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrades_then_dies_after_max_missed() {
        let mut h = Harness::new(config());
        h.monitor.start(None);

        h.advance(1_000).await; // ping 1
        assert_eq!(h.pings().len(), 1);
        h.advance(500).await; // miss 1
        assert_eq!(h.monitor.health_state(), HealthState::Degraded);
        assert_eq!(h.health_events(), vec![HeartbeatEvent::Degraded]);

        h.advance(500).await; // ping 2
        assert_eq!(h.pings().len(), 1);
        h.advance(500).await; // miss 2
        assert_eq!(h.monitor.health_state(), HealthState::Degraded);
        assert!(h.health_events().is_empty());

        h.advance(500).await; // ping 3
        assert_eq!(h.pings().len(), 1);
        h.advance(500).await; // miss 3
        assert_eq!(h.monitor.health_state(), HealthState::Dead);
        assert_eq!(h.health_events(), vec![HeartbeatEvent::Dead]);
        assert!(!h.monitor.is_running());

        h.advance(10_000).await;
        assert!(h.pings().is_empty());
        assert!(h.health_events().is_empty());
        assert_eq!(h.monitor.send_ping(), None);

        let metrics = h.monitor.metrics();
        assert_eq!(metrics.pings_sent, 3);
        assert_eq!(metrics.missed_pongs, 3);
        assert_eq!(metrics.consecutive_missed, 3);
        assert_eq!(metrics.health_score, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_recovers_health() {
        let mut h = Harness::new(config());
        h.monitor.start(None);
        h.advance(1_000).await;
        h.pings();
        h.advance(500).await;
        assert_eq!(h.monitor.health_state(), HealthState::Degraded);

        h.advance(500).await;
        let ping = h.pings().remove(0);
        assert!(h.monitor.handle_pong(&pong_for(&ping, 20)));
        assert_eq!(h.monitor.health_state(), HealthState::Healthy);
        assert_eq!(
            h.health_events(),
            vec![HeartbeatEvent::Degraded, HeartbeatEvent::Healthy]
        );

        let metrics = h.monitor.metrics();
        assert_eq!(metrics.consecutive_missed, 0);
        assert_eq!(metrics.missed_pongs, 1);
        assert_eq!(metrics.pongs_received, 1);
        assert_eq!(metrics.health_score, 100);
        assert_eq!(metrics.min_latency, Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_and_unknown_pongs_ignored() {
        let mut h = Harness::new(config());
        h.monitor.start(None);
        h.advance(1_000).await;
        let ping = h.pings().remove(0);
        let pong = pong_for(&ping, 10);

        assert!(h.monitor.handle_pong(&pong));
        assert!(!h.monitor.handle_pong(&pong));
        assert!(!h.monitor.handle_pong(&PongPayload {
            ping_time: 42,
            ..pong.clone()
        }));
        assert_eq!(h.monitor.metrics().pongs_received, 1);

        // Timeout for the answered ping never fires
        h.advance(500).await;
        assert_eq!(h.monitor.metrics().missed_pongs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_peer_is_degraded() {
        let mut h = Harness::new(config());
        h.monitor.start(None);
        h.advance(1_000).await;
        let ping = h.pings().remove(0);
        h.monitor.handle_pong(&pong_for(&ping, 600));
        assert_eq!(h.monitor.health_score(), 40);
        assert_eq!(h.monitor.health_state(), HealthState::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_window_rolls() {
        let mut h = Harness::new(HeartbeatConfig {
            timeout: Duration::from_millis(100),
            ..config()
        });
        h.monitor.start(None);
        for i in 0..12u64 {
            h.advance(1_000).await;
            let ping = h.pings().remove(0);
            let rtt = if i < 2 { 1_000 } else { 10 };
            h.monitor.handle_pong(&pong_for(&ping, rtt));
        }
        let metrics = h.monitor.metrics();
        assert_eq!(metrics.avg_latency, 10.0);
        assert_eq!(metrics.max_latency, Some(1_000));
        assert_eq!(metrics.min_latency, Some(10));
        assert_eq!(metrics.health_score, 100);
    }

    #[test]
    fn test_latency_bands() {
        assert_eq!(latency_band(0.0), 1.0);
        assert_eq!(latency_band(49.9), 1.0);
        assert_eq!(latency_band(50.0), 0.8);
        assert_eq!(latency_band(199.0), 0.8);
        assert_eq!(latency_band(200.0), 0.6);
        assert_eq!(latency_band(999.0), 0.4);
        assert_eq!(latency_band(1000.0), 0.2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_restart_revives() {
        let mut h = Harness::new(HeartbeatConfig {
            max_missed: 1,
            ..config()
        });
        h.monitor.start(None);
        h.advance(1_000).await;
        h.advance(500).await;
        assert_eq!(h.monitor.health_state(), HealthState::Dead);

        h.monitor.stop();
        h.monitor.stop();
        h.monitor.dispose();
        assert_eq!(h.monitor.pending_pings(), 0);
        assert_eq!(h.monitor.next_deadline(), None);

        h.pings();
        h.health_events();
        h.monitor.start(None);
        h.monitor.start(None);
        assert_eq!(h.monitor.health_state(), HealthState::Healthy);
        assert_eq!(h.health_events(), vec![HeartbeatEvent::Healthy]);
        h.advance(1_000).await;
        assert_eq!(h.pings().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_embeds_message_stats() {
        let mut h = Harness::new(config());
        h.monitor.update_message_stats(12, 34);
        h.monitor.send_ping();
        let ping = h.pings().remove(0);
        assert_eq!(ping.payload["metrics"]["messagesSent"], 12);
        assert_eq!(ping.payload["metrics"]["messagesReceived"], 34);

        let mut h = Harness::new(HeartbeatConfig {
            include_metrics: false,
            ..config()
        });
        h.monitor.update_message_stats(12, 34);
        h.monitor.send_ping();
        let ping = h.pings().remove(0);
        assert_eq!(ping.payload["metrics"]["messagesSent"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_draw_from_connection_sequence() {
        let mut h = Harness::new(config());
        assert_eq!(h.sequence.next(), 1);
        assert_eq!(h.sequence.next(), 2);
        assert_eq!(h.monitor.send_ping(), Some(3));
        assert_eq!(h.sequence.next(), 4);
        h.monitor.start(None);
        h.advance(1_000).await;
        let seqs: Vec<u64> = h.pings().iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, vec![3, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_in_same_millisecond_tracked_separately() {
        let mut h = Harness::new(config());
        let first = h.monitor.send_ping().unwrap();
        let second = h.monitor.send_ping().unwrap();
        assert_ne!(first, second);
        assert_eq!(h.monitor.pending_pings(), 2);

        let pings = h.pings();
        assert_eq!(pings[0].payload["pingTime"], pings[1].payload["pingTime"]);
        assert!(h.monitor.handle_pong(&pong_for(&pings[1], 5)));
        assert_eq!(h.monitor.pending_pings(), 1);

        h.advance(500).await;
        let metrics = h.monitor.metrics();
        assert_eq!(metrics.pongs_received, 1);
        assert_eq!(metrics.missed_pongs, 1);
        assert_eq!(h.monitor.pending_pings(), 0);
        assert_eq!(h.monitor.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_on_restart() {
        let mut h = Harness::new(config());
        h.monitor.set_interval(Duration::from_millis(3_000));
        h.monitor.start(None);
        assert_eq!(
            h.monitor.next_deadline(),
            Some(Instant::now() + Duration::from_millis(3_000))
        );
        h.advance(2_999).await;
        assert!(h.pings().is_empty());
        h.advance(1).await;
        assert_eq!(h.pings().len(), 1);
    }
}
