//! Configuration handling for the wallet bridge.
//!
//! Settings come from an optional YAML file (the `bridge:` section), then
//! `BRIDGE_*` environment variables, then command-line flags applied by the
//! binary. Durations are written in humantime form (`30s`, `5m`, `24h`).

use anyhow::{Context, Result};
use bridge_routing::RouterConfig;
use bridge_session::{HeartbeatConfig, SessionManagerConfig};
use bridge_storage::StorageMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Serde adapter for humantime durations
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as e.g. `30s`
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    /// Parse e.g. `30s` or `1h 30m`
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Heartbeat settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Delay between PINGs
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// How long to wait for a PONG
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Consecutive misses before the peer is dead
    pub max_missed: u32,
    /// Embed message counters in PINGs
    pub include_metrics: bool,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        let defaults = HeartbeatConfig::default();
        Self {
            interval: defaults.interval,
            timeout: defaults.timeout,
            max_missed: defaults.max_missed,
            include_metrics: defaults.include_metrics,
        }
    }
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Idle timeout
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Hard limit on session lifetime
    #[serde(with = "duration_str")]
    pub max_age: Duration,
    /// Persist sessions to the store
    pub enable_persistence: bool,
    /// Store key prefix
    pub storage_prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionManagerConfig::default();
        Self {
            timeout: defaults.default_timeout,
            max_age: defaults.max_session_age,
            enable_persistence: defaults.enable_persistence,
            storage_prefix: defaults.storage_prefix,
        }
    }
}

/// Simulated channel between the two windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Base one-way delay
    #[serde(with = "duration_str")]
    pub latency: Duration,
    /// Extra random delay; frames overtake each other within this window
    #[serde(with = "duration_str")]
    pub jitter: Duration,
    /// Probability in `0.0..=1.0` that a frame is lost once connected
    pub loss: f64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(5),
            jitter: Duration::from_millis(20),
            loss: 0.0,
        }
    }
}

/// Loopback simulation scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Data messages the client sends
    pub messages: u64,
    /// Delay between data messages
    #[serde(with = "duration_str")]
    pub send_interval: Duration,
    /// How long to keep the connection open after the last message
    #[serde(with = "duration_str")]
    pub linger: Duration,
    /// Give up after this much simulated time
    #[serde(with = "duration_str")]
    pub max_duration: Duration,
    /// RNG seed for the link
    pub seed: u64,
    /// Run against the wall clock instead of virtual time
    pub realtime: bool,
    /// Link behaviour
    pub link: LinkSettings,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            messages: 20,
            send_interval: Duration::from_millis(100),
            linger: Duration::from_secs(65),
            max_duration: Duration::from_secs(600),
            seed: 7,
            realtime: false,
            link: LinkSettings::default(),
        }
    }
}

/// Wallet bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Origin of the dapp (client) window
    pub client_origin: String,
    /// Origin of the wallet (server) window
    pub server_origin: String,
    /// Server identifier announced in HELLO_ACK
    pub server_id: Option<String>,
    /// Heartbeat settings
    pub heartbeat: HeartbeatSettings,
    /// Session settings
    pub session: SessionSettings,
    /// Router settings
    pub router: RouterConfig,
    /// Session store backend
    pub storage: StorageMode,
    /// Loopback simulation
    pub simulation: SimulationSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            client_origin: "https://dapp.example".to_string(),
            server_origin: "https://wallet.example".to_string(),
            server_id: None,
            heartbeat: HeartbeatSettings::default(),
            session: SessionSettings::default(),
            router: RouterConfig::default(),
            storage: StorageMode::InMemory,
            simulation: SimulationSettings::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    bridge: Option<BridgeConfig>,
}

impl BridgeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing file falls back to defaults; a malformed one is an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                root.bridge.unwrap_or_default()
            }
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();
        config.validate()?;

        info!(
            "Bridge configuration: client={}, server={}, heartbeat={}, session timeout={}",
            config.client_origin,
            config.server_origin,
            humantime::format_duration(config.heartbeat.interval),
            humantime::format_duration(config.session.timeout)
        );
        Ok(config)
    }

    /// Apply `BRIDGE_*` environment variables
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let duration = |key: &str| {
            lookup(key).and_then(|raw| match humantime::parse_duration(&raw) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("Ignoring {}={:?}: {}", key, raw, e);
                    None
                }
            })
        };

        if let Some(origin) = lookup("BRIDGE_CLIENT_ORIGIN") {
            info!("Client origin overridden by environment: {}", origin);
            self.client_origin = origin;
        }
        if let Some(origin) = lookup("BRIDGE_SERVER_ORIGIN") {
            info!("Server origin overridden by environment: {}", origin);
            self.server_origin = origin;
        }
        if let Some(interval) = duration("BRIDGE_HEARTBEAT_INTERVAL") {
            self.heartbeat.interval = interval;
        }
        if let Some(timeout) = duration("BRIDGE_HEARTBEAT_TIMEOUT") {
            self.heartbeat.timeout = timeout;
        }
        if let Some(timeout) = duration("BRIDGE_SESSION_TIMEOUT") {
            self.session.timeout = timeout;
        }
        if let Some(dir) = lookup("BRIDGE_STORAGE_DIR") {
            info!("Session store overridden by environment: {}", dir);
            self.storage = StorageMode::File {
                data_dir: PathBuf::from(dir),
                sync_writes: false,
            };
        }
        if let Some(raw) = lookup("BRIDGE_MESSAGES") {
            match raw.parse::<u64>() {
                Ok(n) => self.simulation.messages = n,
                Err(e) => warn!("Ignoring BRIDGE_MESSAGES={:?}: {}", raw, e),
            }
        }
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval.is_zero() {
            anyhow::bail!("heartbeat interval must be greater than zero");
        }
        if self.heartbeat.max_missed == 0 {
            anyhow::bail!("heartbeat max_missed must be at least 1");
        }
        if self.session.timeout.is_zero() {
            anyhow::bail!("session timeout must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.simulation.link.loss) {
            anyhow::bail!(
                "link loss must be within 0.0..=1.0, got {}",
                self.simulation.link.loss
            );
        }
        Ok(())
    }

    /// Heartbeat monitor configuration
    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: self.heartbeat.interval,
            timeout: self.heartbeat.timeout,
            max_missed: self.heartbeat.max_missed,
            include_metrics: self.heartbeat.include_metrics,
            auto_start: false,
        }
    }

    /// Session manager configuration
    pub fn session_manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            default_timeout: self.session.timeout,
            heartbeat_interval: self.heartbeat.interval,
            max_session_age: self.session.max_age,
            enable_persistence: self.session.enable_persistence,
            storage_prefix: self.session.storage_prefix.clone(),
            ..SessionManagerConfig::default()
        }
    }
}
