//! Wallet bridge loopback binary.
//!
//! Runs a dapp window and a wallet window against each other over a simulated
//! channel with latency, reordering and loss, then prints a JSON report of the
//! handshake, data delivery, heartbeat health and teardown.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wallet_bridge::{component_info, BridgeConfig, BridgeLogFormatter, Simulator};

/// Wallet bridge protocol simulator
#[derive(Parser, Debug)]
#[command(name = "wallet-bridge", version, about = "Cross-window wallet bridge protocol simulator")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "bridge.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of wallet requests to send
    #[arg(long)]
    messages: Option<u64>,

    /// Delay between wallet requests, e.g. 100ms
    #[arg(long)]
    send_interval: Option<humantime::Duration>,

    /// Heartbeat interval, e.g. 30s
    #[arg(long)]
    heartbeat_interval: Option<humantime::Duration>,

    /// One-way link latency, e.g. 5ms
    #[arg(long)]
    latency: Option<humantime::Duration>,

    /// Extra random link delay, e.g. 20ms
    #[arg(long)]
    jitter: Option<humantime::Duration>,

    /// Frame loss probability once connected (0.0 - 1.0)
    #[arg(long)]
    loss: Option<f64>,

    /// Link RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Keep the connection open this long after the last request, e.g. 65s
    #[arg(long)]
    linger: Option<humantime::Duration>,

    /// Run against the wall clock instead of virtual time
    #[arg(long)]
    realtime: bool,
}

impl Args {
    fn apply(&self, config: &mut BridgeConfig) {
        let sim = &mut config.simulation;
        if let Some(messages) = self.messages {
            sim.messages = messages;
        }
        if let Some(interval) = self.send_interval {
            sim.send_interval = interval.into();
        }
        if let Some(latency) = self.latency {
            sim.link.latency = latency.into();
        }
        if let Some(jitter) = self.jitter {
            sim.link.jitter = jitter.into();
        }
        if let Some(loss) = self.loss {
            sim.link.loss = loss;
        }
        if let Some(seed) = self.seed {
            sim.seed = seed;
        }
        if let Some(linger) = self.linger {
            sim.linger = linger.into();
        }
        if self.realtime {
            sim.realtime = true;
        }
        if let Some(interval) = self.heartbeat_interval {
            config.heartbeat.interval = interval.into();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("wallet_bridge={}", args.log_level).parse()?)
        .add_directive(format!("bridge_wire={}", args.log_level).parse()?)
        .add_directive(format!("bridge_session={}", args.log_level).parse()?)
        .add_directive(format!("bridge_routing={}", args.log_level).parse()?)
        .add_directive(format!("bridge_storage={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(BridgeLogFormatter::new("bridge"))
        .init();

    info!("Starting wallet bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = BridgeConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    if !config.simulation.realtime {
        // Idle waits now jump straight to the next deadline
        tokio::time::pause();
    }
    let mut simulator = Simulator::new(config).context("failed to build simulator")?;

    let finished = tokio::select! {
        report = simulator.run() => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    let report = match finished {
        Some(report) => report,
        None => {
            warn!("Interrupted, reporting partial results");
            simulator.report()
        }
    };

    component_info!(
        "simulator",
        "Finished after {}ms: {}/{} responses, {} of {} frames lost, clean shutdown: {}",
        report.elapsed_ms,
        report.responses_received,
        report.requests_sent,
        report.frames_lost,
        report.frames_sent,
        report.clean_shutdown
    );
    if !report.in_order() {
        warn!("Data was delivered out of order");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
