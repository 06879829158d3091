//! Inbound classification, sequence ordering and handler dispatch for the
//! wallet bridge.
//!
//! A [`MessageRouter`] sits between the channel and one connection. It orders
//! every inbound envelope with a bounded reorder buffer, sends control
//! envelopes to the [`bridge_session::ConnectionStateMachine`], and contains
//! every handler failure so that one bad message cannot halt the pipeline.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod router;
pub mod sequencer;

pub use router::*;
pub use sequencer::*;
