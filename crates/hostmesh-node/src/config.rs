//! Configuration types for hostmesh-node.
//! Parsed from ~/.hostmesh/config.toml.

use hostmesh_protocol::{
    DEFAULT_REGISTRY_PORT, DEFAULT_TIMING, HOST_TIMEOUT_SECS, MONITOR_INTERVAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub timing: TimingSection,
}

/// Whether this node gossips with peers or only serves as a registry target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Peer,
    Central,
}

impl NodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeMode::Peer => "peer",
            NodeMode::Central => "central",
        }
    }

    pub fn gossips(&self) -> bool {
        matches!(self, NodeMode::Peer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub mode: NodeMode,
    #[serde(default = "default_api_addr")]
    pub api_addr: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            mode: NodeMode::default(),
            api_addr: default_api_addr(),
            token_path: default_token_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_host_timeout")]
    pub host_timeout_secs: u64,
    #[serde(default = "default_connect_interval")]
    pub peer_connect_interval_secs: u64,
    #[serde(default = "default_broadcast_interval")]
    pub peer_broadcast_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub peer_connect_timeout_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval(),
            host_timeout_secs: default_host_timeout(),
            peer_connect_interval_secs: default_connect_interval(),
            peer_broadcast_interval_secs: default_broadcast_interval(),
            peer_connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Loop intervals and timeouts as the runtime consumes them.
///
/// Config files speak whole seconds; tests drive the runtime with
/// millisecond values through this type directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeTiming {
    pub monitor_interval: Duration,
    pub host_timeout: Duration,
    pub peer_connect_interval: Duration,
    pub peer_broadcast_interval: Duration,
    pub peer_connect_timeout: Duration,
}

impl Default for RuntimeTiming {
    fn default() -> Self {
        Self::from(&TimingSection::default())
    }
}

impl From<&TimingSection> for RuntimeTiming {
    fn from(t: &TimingSection) -> Self {
        Self {
            monitor_interval: Duration::from_secs(t.monitor_interval_secs.max(1)),
            host_timeout: Duration::from_secs(t.host_timeout_secs),
            peer_connect_interval: Duration::from_secs(t.peer_connect_interval_secs.max(1)),
            peer_broadcast_interval: Duration::from_secs(t.peer_broadcast_interval_secs.max(1)),
            peer_connect_timeout: Duration::from_secs(t.peer_connect_timeout_secs.max(1)),
        }
    }
}

// Default value functions
fn default_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "hostmesh".into())
}
fn default_api_addr() -> String {
    "127.0.0.1:25567".into()
}
fn default_token_path() -> String {
    "~/.hostmesh/node-token".into()
}
fn default_listen_addr() -> String {
    format!("0.0.0.0:{DEFAULT_REGISTRY_PORT}")
}
fn default_monitor_interval() -> u64 {
    MONITOR_INTERVAL_SECS
}
fn default_host_timeout() -> u64 {
    HOST_TIMEOUT_SECS
}
fn default_connect_interval() -> u64 {
    DEFAULT_TIMING.peer_connect_interval_secs
}
fn default_broadcast_interval() -> u64 {
    DEFAULT_TIMING.peer_broadcast_interval_secs
}
fn default_connect_timeout() -> u64 {
    DEFAULT_TIMING.peer_connect_timeout_secs
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Port of the registry listener, used for peers configured without one.
    pub fn listen_port(&self) -> u16 {
        self.network
            .listen_addr
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(DEFAULT_REGISTRY_PORT)
    }

    pub fn peer_addrs(&self) -> Vec<String> {
        self.network.peers.iter().map(|p| p.addr.clone()).collect()
    }

    pub fn runtime_timing(&self) -> RuntimeTiming {
        RuntimeTiming::from(&self.timing)
    }
}
