//! Session configuration - who this node is and who it talks to.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::infra::tcp_endpoint;

/// Byte width of an activity label on the experiment-control stream (`S26`).
pub const ACTIVITY_LABEL_WIDTH: usize = 26;

/// Session membership, peers, and domain labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Name this node registers with at the sync barrier.
    /// Default: hermes
    #[serde(default = "SessionConfig::default_node_name")]
    pub node_name: String,

    /// Activity labels of the experiment-control stream, in index order.
    #[serde(default)]
    pub activities: Vec<String>,

    /// Data-plane endpoints a consumer subscribes to.
    /// Empty means `network.port_sub` on `network.host_ip`.
    #[serde(default)]
    pub feeds: Vec<String>,

    /// Nodes the experiment controller can pause or kill.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

impl SessionConfig {
    fn default_node_name() -> String {
        "hermes".to_string()
    }

    /// Look up a peer by name.
    pub fn peer(&self, name: &str) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| p.name == name)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_name: Self::default_node_name(),
            activities: Vec::new(),
            feeds: Vec::new(),
            peers: Vec::new(),
            sync: SyncConfig::default(),
            control: ControlConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Startup rendezvous settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Number of distinct nodes the barrier host waits for.
    /// Default: 1
    #[serde(default = "SyncConfig::default_quorum")]
    pub quorum: usize,

    /// Bounded wait for the quorum, on both host and nodes.
    /// Default: 30000 (30s)
    #[serde(default = "SyncConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl SyncConfig {
    fn default_quorum() -> usize {
        1
    }

    fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            quorum: Self::default_quorum(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Control-plane request settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    /// Timeout applied to every control request (pause toggle, kill).
    /// Default: 10000 (10s)
    #[serde(default = "ControlConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ControlConfig {
    fn default_request_timeout_ms() -> u64 {
        10_000
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Stream buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamConfig {
    /// Maximum records kept per stream. Unset keeps the whole session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<usize>,
}

/// A remote node the controller issues commands to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    pub name: String,

    #[serde(default = "PeerConfig::default_host_ip")]
    pub host_ip: String,

    pub port_killsig: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_pause: Option<u16>,
}

impl PeerConfig {
    fn default_host_ip() -> String {
        "127.0.0.1".to_string()
    }

    pub fn kill_endpoint(&self) -> String {
        tcp_endpoint(&self.host_ip, self.port_killsig)
    }

    pub fn pause_endpoint(&self) -> Option<String> {
        self.port_pause.map(|port| tcp_endpoint(&self.host_ip, port))
    }
}
