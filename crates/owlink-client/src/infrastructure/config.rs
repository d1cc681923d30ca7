//! TOML configuration for the tunnel client.
//!
//! Looked up at `--config`, or at `owlink/client.toml` under the platform
//! config directory.  A missing file means "all defaults".
//!
//! ```toml
//! server = "192.168.1.20:6161"
//! secret = "Adapter Secret Default"
//! socket_timeout_secs = 30
//! exclusive_timeout_ms = 10000
//!
//! [host_secrets]
//! "192.168.1.30" = "lab secret"
//! "192.168.1.31:7000" = "bench secret"
//!
//! [multicast]
//! group = "228.5.6.7"
//! port = 6163
//! probe_timeout_ms = 2000
//! ```
//!
//! `[host_secrets]` overrides `secret` per server.  A `host:port` key wins
//! over a bare `host` key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use owlink_core::protocol::messages::{DEFAULT_PORT, DEFAULT_SECRET, MULTICAST_GROUP, MULTICAST_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::TunnelOptions;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// `host:port` of the tunnel server.
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Per-server secret overrides, keyed by `host:port` or `host`.
    #[serde(default)]
    pub host_secrets: BTreeMap<String, String>,
    /// Socket read timeout in seconds.  `0` blocks forever.
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
    /// Upper bound for a blocking local `begin_exclusive`.
    #[serde(default = "default_exclusive_timeout_ms")]
    pub exclusive_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub multicast: MulticastConfig,
}

/// Where to send beacon probes and how long to wait for answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MulticastConfig {
    #[serde(default = "default_multicast_group")]
    pub group: String,
    #[serde(default = "default_multicast_port")]
    pub port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_server() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}
fn default_secret() -> String {
    DEFAULT_SECRET.to_string()
}
fn default_socket_timeout_secs() -> u64 {
    30
}
fn default_exclusive_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_multicast_group() -> String {
    MULTICAST_GROUP.to_string()
}
fn default_multicast_port() -> u16 {
    MULTICAST_PORT
}
fn default_probe_timeout_ms() -> u64 {
    2_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            secret: default_secret(),
            host_secrets: BTreeMap::new(),
            socket_timeout_secs: default_socket_timeout_secs(),
            exclusive_timeout_ms: default_exclusive_timeout_ms(),
            log_level: default_log_level(),
            multicast: MulticastConfig::default(),
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: default_multicast_group(),
            port: default_multicast_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// The secret to present to `server`.
    pub fn secret_for(&self, server: &str) -> &str {
        if let Some(secret) = self.host_secrets.get(server) {
            return secret;
        }
        let host = server.rsplit_once(':').map_or(server, |(host, _)| host);
        self.host_secrets
            .get(host)
            .map_or(self.secret.as_str(), String::as_str)
    }

    /// Connection settings for the configured server.
    pub fn tunnel_options(&self) -> TunnelOptions {
        TunnelOptions {
            server: self.server.clone(),
            secret: self.secret_for(&self.server).as_bytes().to_vec(),
            socket_timeout: (self.socket_timeout_secs > 0)
                .then(|| Duration::from_secs(self.socket_timeout_secs)),
            exclusive_timeout: Duration::from_millis(self.exclusive_timeout_ms),
        }
    }
}

/// Resolves the default config file path.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("client.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `ClientConfig` from `path`, returning the defaults if the file does
/// not exist.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("owlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("owlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("owlink"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn with_overrides() -> ClientConfig {
        let mut cfg = ClientConfig::default();
        cfg.host_secrets.insert("10.0.0.5".into(), "host-wide".into());
        cfg.host_secrets.insert("10.0.0.5:7000".into(), "port-specific".into());
        cfg
    }

    #[test]
    fn test_client_config_defaults() {
        // Arrange / Act
        let cfg = ClientConfig::default();

        // Assert
        assert_eq!(cfg.server, "127.0.0.1:6161");
        assert_eq!(cfg.secret, "Adapter Secret Default");
        assert_eq!(cfg.exclusive_timeout_ms, 10_000);
        assert_eq!(cfg.multicast.group, "228.5.6.7");
        assert_eq!(cfg.multicast.port, 6163);
    }

    #[test]
    fn test_secret_for_prefers_host_and_port_key() {
        let cfg = with_overrides();
        assert_eq!(cfg.secret_for("10.0.0.5:7000"), "port-specific");
    }

    #[test]
    fn test_secret_for_falls_back_to_host_key() {
        let cfg = with_overrides();
        assert_eq!(cfg.secret_for("10.0.0.5:6161"), "host-wide");
    }

    #[test]
    fn test_secret_for_unknown_host_uses_default_secret() {
        let cfg = with_overrides();
        assert_eq!(cfg.secret_for("10.0.0.6:6161"), "Adapter Secret Default");
    }

    #[test]
    fn test_tunnel_options_pick_host_secret_and_timeouts() {
        // Arrange
        let mut cfg = with_overrides();
        cfg.server = "10.0.0.5:6161".into();
        cfg.socket_timeout_secs = 0;
        cfg.exclusive_timeout_ms = 250;

        // Act
        let options = cfg.tunnel_options();

        // Assert
        assert_eq!(options.secret, b"host-wide".to_vec());
        assert_eq!(options.socket_timeout, None);
        assert_eq!(options.exclusive_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        // Arrange
        let text = r#"
            server = "lab:6161"

            [host_secrets]
            lab = "x"
        "#;

        // Act
        let cfg: ClientConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.server, "lab:6161");
        assert_eq!(cfg.secret_for("lab:6161"), "x");
        assert_eq!(cfg.socket_timeout_secs, 30);
        assert_eq!(cfg.multicast, MulticastConfig::default());
    }

    #[test]
    fn test_load_config_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("owlink-client-{}-none.toml", std::process::id()));
        let _ = std::fs::remove_file(&path);
        assert_eq!(load_config(&path).unwrap(), ClientConfig::default());
    }
}
