//! Layered configuration loading for hermes recording nodes.
//!
//! Every node in a recording session (device producers, loggers, the
//! experiment controller, the barrier host) reads the same file format.
//!
//! # Configuration Philosophy
//!
//! - **Infrastructure** (`InfraConfig`): how this process is reached on the
//!   network and how it logs. Fixed for the lifetime of the process.
//!
//! - **Session** (`SessionConfig`): who this node is in the session, which
//!   peers it talks to, and the domain labels of the recording.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/hermes/config.toml` (system)
//! 2. `~/.config/hermes/config.toml` (user)
//! 3. `./hermes.toml` (local override) or the path given on the command line
//! 4. Environment variables (`HERMES_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [network]
//! host_ip = "192.168.0.10"
//! port_pub = 42069
//! port_sync = 42071
//! port_killsig = 42066
//!
//! [telemetry]
//! log_level = "info"
//!
//! [session]
//! node_name = "control"
//! activities = ["walk", "sit", "stand", "turn"]
//!
//! [session.sync]
//! quorum = 3
//! timeout_ms = 30000
//!
//! [[session.peers]]
//! name = "eye"
//! host_ip = "192.168.0.11"
//! port_killsig = 42066
//! port_pause = 42073
//! ```

pub mod infra;
pub mod loader;
pub mod session;

pub use infra::{InfraConfig, NetworkConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use session::{
    ControlConfig, PeerConfig, SessionConfig, StreamConfig, SyncConfig, ACTIVITY_LABEL_WIDTH,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HermesConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Session membership and domain labels.
    #[serde(default)]
    pub session: SessionConfig,
}

impl HermesConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of `./hermes.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::read_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::table_to_config(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Parse a single TOML document (no discovery, no environment overlay).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let path = Path::new("<string>");
        let table = loader::parse_table(contents, path)?;
        let config = loader::table_to_config(table, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the session protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let net = &self.infra.network;
        if net.host_ip.trim().is_empty() {
            return Err(ConfigError::Invalid("network.host_ip is empty".to_string()));
        }

        let mut bound = vec![
            ("port_pub", net.port_pub),
            ("port_sync", net.port_sync),
            ("port_killsig", net.port_killsig),
        ];
        if let Some(port) = net.port_pause {
            bound.push(("port_pause", port));
        }
        for (i, (name, port)) in bound.iter().enumerate() {
            if *port == 0 {
                return Err(ConfigError::Invalid(format!("network.{} must be non-zero", name)));
            }
            if let Some((other, _)) = bound[..i].iter().find(|(_, p)| p == port) {
                return Err(ConfigError::Invalid(format!(
                    "network.{} and network.{} share port {}",
                    other, name, port
                )));
            }
        }

        if self.session.sync.quorum == 0 {
            return Err(ConfigError::Invalid("session.sync.quorum must be at least 1".to_string()));
        }
        if let Some(label) = self
            .session
            .activities
            .iter()
            .find(|a| a.len() > ACTIVITY_LABEL_WIDTH)
        {
            return Err(ConfigError::Invalid(format!(
                "session.activities entry {:?} is {} bytes, at most {} allowed",
                label,
                label.len(),
                ACTIVITY_LABEL_WIDTH
            )));
        }
        if self.session.sync.timeout_ms == 0 {
            return Err(ConfigError::Invalid("session.sync.timeout_ms must be non-zero".to_string()));
        }
        if self.session.control.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.control.request_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.session.stream.retention == Some(0) {
            return Err(ConfigError::Invalid("session.stream.retention must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_else(|e| format!("# unrenderable: {}\n", e));
        format!("# hermes configuration\n\n{}", body)
    }
}
