//! Configuration schema and loader for gossipkv nodes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's cluster identifier.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// This node's listen address (`host:port`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Statically known peers.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Gossip / failure-detection settings.
    #[serde(default)]
    pub gossip: GossipConfig,

    /// Ring placement settings.
    #[serde(default)]
    pub ring: RingConfig,

    /// KV engine settings.
    #[serde(default)]
    pub kv: KvConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// A statically configured peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Ping round interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Outbound dial timeout in milliseconds.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// How long to wait for `OK` replies during an election, in milliseconds.
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            election_timeout_ms: default_election_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Virtual nodes per physical node.
    #[serde(default = "default_vnodes")]
    pub vnodes: usize,

    /// Replica set size used when propagating writes.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            vnodes: default_vnodes(),
            replicas: default_replicas(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Hinted-handoff drain interval in seconds.
    #[serde(default = "default_handoff_interval_secs")]
    pub handoff_interval_secs: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            handoff_interval_secs: default_handoff_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the data file, hint file, pages file and index log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// --- Defaults ---

fn default_node_id() -> String {
    "node1".to_string()
}
fn default_listen() -> String {
    "127.0.0.1:8081".to_string()
}
fn default_tick_interval_ms() -> u64 {
    2000
}
fn default_dial_timeout_ms() -> u64 {
    3000
}
fn default_election_timeout_ms() -> u64 {
    3000
}
fn default_vnodes() -> usize {
    3
}
fn default_replicas() -> usize {
    3
}
fn default_handoff_interval_secs() -> u64 {
    5
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen: default_listen(),
            peers: Vec::new(),
            gossip: GossipConfig::default(),
            ring: RingConfig::default(),
            kv: KvConfig::default(),
            storage: StorageConfig::default(),
            metrics_port: None,
        }
    }
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("config validation failed: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Read and validate a config file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.ring.vnodes == 0 {
            return Err(ConfigError::Invalid("ring.vnodes must be > 0".into()));
        }
        if self.ring.replicas == 0 {
            return Err(ConfigError::Invalid("ring.replicas must be > 0".into()));
        }
        if self.gossip.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "gossip.tick_interval_ms must be > 0".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for peer in &self.peers {
            if peer.id == self.node_id {
                return Err(ConfigError::Invalid(format!(
                    "peer id '{}' collides with node_id",
                    peer.id
                )));
            }
            if !seen.insert(&peer.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate peer id '{}'",
                    peer.id
                )));
            }
        }
        Ok(())
    }
}
