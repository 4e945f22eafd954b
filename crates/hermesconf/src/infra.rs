//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Infrastructure settings for this process.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InfraConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Host address and the fixed-role ports of this node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Address other nodes use to reach this one.
    /// Default: 127.0.0.1
    #[serde(default = "NetworkConfig::default_host_ip")]
    pub host_ip: String,

    /// Data-plane PUB port this node binds when it produces samples.
    /// Default: 42069
    #[serde(default = "NetworkConfig::default_port_pub")]
    pub port_pub: u16,

    /// Data-plane port a consumer subscribes to when no feeds are listed.
    /// Default: 42069 (the local producer port)
    #[serde(default = "NetworkConfig::default_port_sub")]
    pub port_sub: u16,

    /// Sync barrier port (ROUTER on the host, REQ on every node).
    /// Default: 42071
    #[serde(default = "NetworkConfig::default_port_sync")]
    pub port_sync: u16,

    /// Kill-signal REP port of this node.
    /// Default: 42066
    #[serde(default = "NetworkConfig::default_port_killsig")]
    pub port_killsig: u16,

    /// Optional pause-toggle REP port of this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_pause: Option<u16>,
}

impl NetworkConfig {
    fn default_host_ip() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port_pub() -> u16 {
        42069
    }

    fn default_port_sub() -> u16 {
        42069
    }

    fn default_port_sync() -> u16 {
        42071
    }

    fn default_port_killsig() -> u16 {
        42066
    }

    /// `tcp://host_ip:port`
    pub fn endpoint(&self, port: u16) -> String {
        tcp_endpoint(&self.host_ip, port)
    }

    pub fn publish_endpoint(&self) -> String {
        self.endpoint(self.port_pub)
    }

    pub fn subscribe_endpoint(&self) -> String {
        self.endpoint(self.port_sub)
    }

    pub fn sync_endpoint(&self) -> String {
        self.endpoint(self.port_sync)
    }

    pub fn killsig_endpoint(&self) -> String {
        self.endpoint(self.port_killsig)
    }

    pub fn pause_endpoint(&self) -> Option<String> {
        self.port_pause.map(|port| self.endpoint(port))
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_ip: Self::default_host_ip(),
            port_pub: Self::default_port_pub(),
            port_sub: Self::default_port_sub(),
            port_sync: Self::default_port_sync(),
            port_killsig: Self::default_port_killsig(),
            port_pause: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Log level or full `EnvFilter` directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Format a ZMQ TCP endpoint.
pub fn tcp_endpoint(host: &str, port: u16) -> String {
    format!("tcp://{}:{}", host, port)
}
