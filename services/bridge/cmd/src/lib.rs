//! Wallet bridge runtime: configuration, log formatting, per-connection
//! wiring of the protocol components, and a loopback simulator that exercises
//! a dapp window and a wallet window over a lossy, reordering channel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod logging;
pub mod simulator;

pub use config::BridgeConfig;
pub use endpoint::{Endpoint, Inbox};
pub use logging::BridgeLogFormatter;
pub use simulator::{Link, Side, SimulationReport, Simulator};
