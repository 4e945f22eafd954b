//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, HermesConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/hermes/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("hermes/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("hermes.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a single config file (no layering, no environment overlay).
pub fn load_from_file(path: &Path) -> Result<HermesConfig, ConfigError> {
    let table = read_table(path)?;
    table_to_config(table, path)
}

pub(crate) fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub(crate) fn table_to_config(table: toml::Table, path: &Path) -> Result<HermesConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base` key by key. Nested tables merge recursively;
/// any other value (arrays included) is replaced wholesale.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut HermesConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup. Unparseable numeric values
/// are ignored and not recorded as overrides.
pub fn apply_overrides_from<F>(config: &mut HermesConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let net = &mut config.infra.network;

    if let Some(v) = lookup("HERMES_HOST_IP") {
        net.host_ip = v;
        sources.env_overrides.push("HERMES_HOST_IP".to_string());
    }

    for (key, slot) in [
        ("HERMES_PORT_PUB", &mut net.port_pub),
        ("HERMES_PORT_SUB", &mut net.port_sub),
        ("HERMES_PORT_SYNC", &mut net.port_sync),
        ("HERMES_PORT_KILLSIG", &mut net.port_killsig),
    ] {
        if let Some(port) = lookup(key).and_then(|v| v.parse().ok()) {
            *slot = port;
            sources.env_overrides.push(key.to_string());
        }
    }
    if let Some(port) = lookup("HERMES_PORT_PAUSE").and_then(|v| v.parse().ok()) {
        net.port_pause = Some(port);
        sources.env_overrides.push("HERMES_PORT_PAUSE".to_string());
    }

    // Telemetry
    if let Some(v) = lookup("HERMES_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("HERMES_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    // Session
    let session = &mut config.session;
    if let Some(v) = lookup("HERMES_NODE_NAME") {
        session.node_name = v;
        sources.env_overrides.push("HERMES_NODE_NAME".to_string());
    }
    if let Some(v) = lookup("HERMES_ACTIVITIES") {
        session.activities = split_list(&v);
        sources.env_overrides.push("HERMES_ACTIVITIES".to_string());
    }
    if let Some(v) = lookup("HERMES_FEEDS") {
        session.feeds = split_list(&v);
        sources.env_overrides.push("HERMES_FEEDS".to_string());
    }
    if let Some(quorum) = lookup("HERMES_SYNC_QUORUM").and_then(|v| v.parse().ok()) {
        session.sync.quorum = quorum;
        sources.env_overrides.push("HERMES_SYNC_QUORUM".to_string());
    }
    if let Some(ms) = lookup("HERMES_SYNC_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        session.sync.timeout_ms = ms;
        sources.env_overrides.push("HERMES_SYNC_TIMEOUT_MS".to_string());
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
