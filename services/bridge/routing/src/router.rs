//! Inbound message router.
//!
//! Every inbound value is classified once. Anything that is not an envelope
//! goes straight to the raw handler. Envelopes of every category share the
//! sender's sequence, so they all pass through the [`Sequencer`] and are then
//! dispatched in order: control to the connection state machine, errors to the
//! error handler, data to the data handler. A HELLO opens a new stream and
//! resets the baseline. Handler errors and panics are contained here and never
//! stop the pipeline.

use crate::sequencer::{Admission, Sequencer};
use bridge_session::ConnectionStateMachine;
use bridge_wire::{is_transport_message, kinds, Category, Envelope, FrameCodec, WireError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Consumer of routed messages
pub trait InboundHandler {
    /// Data-plane envelope, delivered in sequence order
    fn on_data(&mut self, envelope: &Envelope) -> anyhow::Result<()>;

    /// Error envelope reported by the peer
    fn on_error_message(&mut self, envelope: &Envelope) -> anyhow::Result<()> {
        warn!("Unhandled error message {}", envelope.kind);
        Ok(())
    }

    /// Value that is not an envelope (legacy unframed message)
    fn on_raw(&mut self, data: &Value) -> anyhow::Result<()> {
        debug!("Ignoring raw message: {}", data);
        Ok(())
    }
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Apply sequence discipline to envelopes
    pub enforce_sequence: bool,
    /// Buffer envelopes that arrive ahead of the expected sequence
    pub allow_out_of_order: bool,
    /// Reorder buffer capacity
    pub max_buffer_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enforce_sequence: true,
            allow_out_of_order: true,
            max_buffer_size: 100,
        }
    }
}

/// Reason for dropping a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Evicted from a full reorder buffer
    BufferOverflow,
    /// Ahead of the expected sequence with buffering disabled
    OutOfOrder,
    /// Frame exceeds the size limit
    Oversized,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::BufferOverflow => write!(f, "reorder buffer overflow"),
            DropReason::OutOfOrder => write!(f, "out of order"),
            DropReason::Oversized => write!(f, "frame too large"),
        }
    }
}

/// What happened to one routed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Envelopes dispatched in sequence order, counting any drained from the buffer
    Delivered(usize),
    /// Parked in the reorder buffer
    Buffered,
    /// At or behind the last delivered sequence
    Duplicate,
    /// Handed to the raw handler
    Raw,
    /// Discarded
    Dropped(DropReason),
}

/// Live router counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Control envelopes received
    pub control_messages: u64,
    /// Data envelopes received
    pub data_messages: u64,
    /// Error envelopes received
    pub error_messages: u64,
    /// Non-envelope values routed
    pub raw_messages: u64,
    /// Envelopes that arrived ahead of the expected sequence
    pub out_of_sequence: u64,
    /// Duplicate or stale envelopes ignored
    pub duplicates: u64,
    /// Messages discarded
    pub dropped: u64,
    /// Handler calls that failed or panicked
    pub handler_failures: u64,
    /// Last sequence dispatched
    pub last_sequence: Option<u64>,
    /// Breakdown of drop reasons
    pub drop_reasons: HashMap<String, u64>,
}

impl RouterStats {
    fn record_drop(&mut self, reason: DropReason) {
        self.dropped += 1;
        *self.drop_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }
}

/// Routes inbound values for one connection
#[derive(Debug)]
pub struct MessageRouter<H> {
    codec: FrameCodec,
    connection: ConnectionStateMachine,
    sequencer: Sequencer,
    handler: H,
    stats: RouterStats,
}

impl<H: InboundHandler> MessageRouter<H> {
    /// Create a router in front of `connection`
    pub fn new(config: RouterConfig, connection: ConnectionStateMachine, handler: H) -> Self {
        Self::with_codec(config, connection, handler, FrameCodec::new())
    }

    /// Create a router with a custom frame codec
    pub fn with_codec(
        config: RouterConfig,
        connection: ConnectionStateMachine,
        handler: H,
        codec: FrameCodec,
    ) -> Self {
        let sequencer = Sequencer::new(
            config.enforce_sequence,
            config.allow_out_of_order,
            config.max_buffer_size,
        );
        Self {
            codec,
            connection,
            sequencer,
            handler,
            stats: RouterStats::default(),
        }
    }

    /// The connection state machine
    pub fn connection(&self) -> &ConnectionStateMachine {
        &self.connection
    }

    /// Mutable access to the connection state machine
    pub fn connection_mut(&mut self) -> &mut ConnectionStateMachine {
        &mut self.connection
    }

    /// The handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the handler
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Counter snapshot
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Sequences waiting in the reorder buffer, ascending
    pub fn buffered_sequences(&self) -> Vec<u64> {
        self.sequencer.buffered_sequences()
    }

    /// Discard the reorder buffer; discarded envelopes count as dropped
    pub fn clear_buffer(&mut self) -> usize {
        let cleared = self.sequencer.clear_buffer();
        for _ in 0..cleared {
            self.stats.record_drop(DropReason::BufferOverflow);
        }
        cleared
    }

    /// Forget the sequence baseline, e.g. after a reconnect
    pub fn reset_sequence(&mut self) {
        self.sequencer.reset();
        self.stats.last_sequence = None;
        debug!("Router sequence reset");
    }

    /// Route a raw frame from the channel
    pub fn route_frame(&mut self, frame: &[u8]) -> RouteOutcome {
        match self.codec.decode(frame) {
            Ok(value) => self.route(value),
            Err(WireError::Size(len)) => {
                warn!("Dropping {} byte frame: {}", len, DropReason::Oversized);
                self.stats.record_drop(DropReason::Oversized);
                RouteOutcome::Dropped(DropReason::Oversized)
            }
            Err(e) => {
                debug!("Frame is not JSON ({}), routing as raw", e);
                let text = Value::String(String::from_utf8_lossy(frame).into_owned());
                self.route_raw(&text)
            }
        }
    }

    /// Route one inbound value
    pub fn route(&mut self, value: Value) -> RouteOutcome {
        if !is_transport_message(&value) {
            return self.route_raw(&value);
        }
        let envelope = match Envelope::from_value(value.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Envelope-shaped value failed to decode ({}), routing as raw", e);
                return self.route_raw(&value);
            }
        };

        match envelope.category {
            Category::Control => self.stats.control_messages += 1,
            Category::Error => self.stats.error_messages += 1,
            Category::Data => self.stats.data_messages += 1,
        }
        if envelope.is_control() && envelope.kind == kinds::HELLO {
            self.reset_sequence();
        }
        self.route_sequenced(envelope)
    }

    fn route_raw(&mut self, value: &Value) -> RouteOutcome {
        self.stats.raw_messages += 1;
        self.invoke("raw", |h| h.on_raw(value));
        RouteOutcome::Raw
    }

    fn route_sequenced(&mut self, envelope: Envelope) -> RouteOutcome {
        let sequence = envelope.sequence;
        let kind = envelope.kind.clone();
        match self.sequencer.admit(envelope) {
            Admission::Deliver(ready) => {
                let count = ready.len();
                for envelope in &ready {
                    self.dispatch(envelope);
                }
                RouteOutcome::Delivered(count)
            }
            Admission::Buffered { evicted } => {
                self.stats.out_of_sequence += 1;
                debug!(
                    "Buffered {} #{} (expecting {:?})",
                    kind,
                    sequence,
                    self.sequencer.expected()
                );
                if let Some(evicted) = evicted {
                    warn!("Reorder buffer full, evicted #{}", evicted);
                    self.stats.record_drop(DropReason::BufferOverflow);
                }
                RouteOutcome::Buffered
            }
            Admission::Duplicate => {
                self.stats.duplicates += 1;
                debug!("Ignoring duplicate {} #{}", kind, sequence);
                RouteOutcome::Duplicate
            }
            Admission::Rejected => {
                self.stats.out_of_sequence += 1;
                self.stats.record_drop(DropReason::OutOfOrder);
                warn!(
                    "Dropping {} #{} (expecting {:?}): {}",
                    kind,
                    sequence,
                    self.sequencer.expected(),
                    DropReason::OutOfOrder
                );
                RouteOutcome::Dropped(DropReason::OutOfOrder)
            }
        }
    }

    fn dispatch(&mut self, envelope: &Envelope) {
        match envelope.category {
            Category::Control => {
                // Violations are logged by the state machine
                let _ = self.connection.handle_message(envelope);
            }
            Category::Error => self.invoke("error", |h| h.on_error_message(envelope)),
            Category::Data => self.invoke("data", |h| h.on_data(envelope)),
        }
        self.stats.last_sequence = Some(envelope.sequence);
    }

    fn invoke<F>(&mut self, what: &str, f: F)
    where
        F: FnOnce(&mut H) -> anyhow::Result<()>,
    {
        let handler = &mut self.handler;
        match catch_unwind(AssertUnwindSafe(|| f(handler))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.handler_failures += 1;
                error!("{} handler failed: {:#}", what, e);
            }
            Err(panic) => {
                self.stats.handler_failures += 1;
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("{} handler panicked: {}", what, message);
            }
        }
    }
}
