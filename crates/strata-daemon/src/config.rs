//! Daemon configuration.
//!
//! Read from the file named by `STRATA_CONFIG`, else `strata.toml` in the
//! working directory, else built-in defaults. Every field has a default, so a
//! file only needs the settings it changes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use strata_crypto::x25519::X25519PublicKey;
use strata_onion::engine::EngineConfig;
use strata_onion::session::Node;

pub const CONFIG_ENV: &str = "STRATA_CONFIG";
pub const CONFIG_FILE: &str = "strata.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Price per byte this node charges as a relay.
    #[serde(default = "default_relay_rate")]
    pub relay_rate: u32,
    /// Lifetime of the ads sent at startup.
    #[serde(default = "default_ad_ttl")]
    pub ad_ttl_secs: u64,
    /// Relays known without discovery.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// A statically configured relay. Keys are hex encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub addr: SocketAddr,
    /// X25519 identity key.
    pub identity: String,
    /// Ed25519 ad signing key.
    pub signing: String,
    #[serde(default = "default_relay_rate")]
    pub relay_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_exit_timeout")]
    pub exit_timeout_ms: u64,
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4433))
}

fn default_relay_rate() -> u32 {
    1
}

fn default_ad_ttl() -> u64 {
    3600
}

fn default_exit_timeout() -> u64 {
    2_000
}

fn default_pending_timeout() -> u64 {
    10_000
}

fn default_sweep_interval() -> u64 {
    1_000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            relay_rate: default_relay_rate(),
            ad_ttl_secs: default_ad_ttl(),
            peers: Vec::new(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            exit_timeout_ms: default_exit_timeout(),
            pending_timeout_ms: default_pending_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn decode_key(field: &str, value: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(value).with_context(|| format!("{field} is not hex"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("{field} is {} bytes, expected 32", b.len()))
}

impl PeerConfig {
    pub fn node(&self) -> anyhow::Result<Node> {
        let identity = decode_key("identity", &self.identity)?;
        let signing = decode_key("signing", &self.signing)?;
        Ok(Node::new(
            self.addr,
            X25519PublicKey::from_bytes(identity),
            signing,
            self.relay_rate,
        ))
    }
}

impl DaemonConfig {
    /// Load from the first config file found, or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        match Self::config_path(std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// An explicit path wins even if missing, so a typo fails loudly.
    fn config_path(env: Option<String>) -> Option<PathBuf> {
        if let Some(path) = env.filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(CONFIG_FILE);
        local.exists().then_some(local)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            relay_rate: self.network.relay_rate,
            exit_timeout: Duration::from_millis(self.engine.exit_timeout_ms),
            pending_timeout: Duration::from_millis(self.engine.pending_timeout_ms),
            sweep_interval: Duration::from_millis(self.engine.sweep_interval_ms.max(1)),
            channel_capacity: self.engine.channel_capacity,
        }
    }

    pub fn peers(&self) -> anyhow::Result<Vec<Node>> {
        self.network
            .peers
            .iter()
            .map(|p| p.node().with_context(|| format!("peer {}", p.addr)))
            .collect()
    }
}
