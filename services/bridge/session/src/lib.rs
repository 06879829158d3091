//! HELLO/READY handshake, PING/PONG health, GOODBYE teardown and resumable
//! sessions for the wallet bridge.
//!
//! Every component here is a plain state machine: it performs no I/O and never
//! sleeps. Outbound envelopes and notifications are pushed into unbounded
//! channels supplied at construction, and timers are [`tokio::time::Instant`]
//! deadlines the owner polls. One connection owns exactly one instance of each
//! component, and all of them number outbound envelopes from the connection's
//! single [`SequenceCounter`].
//!
//! ## Features
//!
//! - **Connection state machine**: asymmetric client/server handshake and teardown
//! - **Heartbeat**: PING/PONG with rolling latency and a 0-100 health score
//! - **Session manager**: suspend/resume with a grace window, expiry sweep, persistence
//!
//! ## Example
//!
//! ```rust,no_run
//! use bridge_session::{ConnectionConfig, ConnectionStateMachine};
//! use bridge_wire::Clock;
//! use tokio::sync::mpsc;
//!
//! let (out_tx, mut out_rx) = mpsc::unbounded_channel();
//! let (event_tx, _event_rx) = mpsc::unbounded_channel();
//! let mut client = ConnectionStateMachine::new(
//!     ConnectionConfig::client("https://dapp.example"),
//!     Clock::system(),
//!     out_tx,
//!     event_tx,
//! );
//!
//! client.connect();
//! let hello = out_rx.try_recv().unwrap();
//! assert_eq!(hello.kind, "HELLO");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod manager;
pub mod sequence;
pub mod session;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionMetrics, ConnectionState,
    ConnectionStateMachine, Role, SessionTerms,
};
pub use error::ProtocolError;
pub use handshake::{generate_session_id, SESSION_ID_RANDOM_LEN};
pub use heartbeat::{
    HealthState, HeartbeatConfig, HeartbeatEvent, HeartbeatMetrics, HeartbeatMonitor,
};
pub use manager::{MessageDirection, SessionManager, SessionManagerConfig};
pub use sequence::SequenceCounter;
pub use session::{Session, SessionState, SessionStats};
