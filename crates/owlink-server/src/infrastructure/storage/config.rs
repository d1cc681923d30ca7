//! TOML-based configuration for the tunnel server.
//!
//! The file is looked up at an explicit `--config` path, or otherwise at the
//! platform-appropriate location:
//! - Windows:  `%APPDATA%\owlink\server.toml`
//! - Linux:    `~/.config/owlink/server.toml`
//! - macOS:    `~/Library/Application Support/owlink/server.toml`
//!
//! A missing file is not an error; every field has a default.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 6161
//! multithreaded = true
//! # 30 when multithreaded, 0 (no timeout) when single-threaded
//! # socket_timeout_secs = 30
//! log_level = "info"
//!
//! [auth]
//! secret = "Adapter Secret Default"
//!
//! [multicast]
//! enabled = false
//!
//! [[simulated_devices]]
//! address = "0807060504030201"
//! alarm = false
//! ```
//!
//! # Serde default values (for beginners)
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take the value of
//! `some_fn()` when absent from the file, so a config with only `[auth]`
//! in it is perfectly valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use owlink_core::protocol::messages::{DEFAULT_PORT, DEFAULT_SECRET, MULTICAST_GROUP, MULTICAST_PORT};
use owlink_core::{RomId, SimulatedBus, SimulatedDevice};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No `--config` path was given and the platform config directory could
    /// not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The bind address and port do not form a socket address.
    #[error("invalid listen address {0:?}")]
    InvalidListenAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub multicast: MulticastConfig,
    /// Devices placed on the demo bus.
    #[serde(default)]
    pub simulated_devices: Vec<SimulatedDeviceEntry>,
}

/// Listener and threading settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// One handler thread per connection when `true`; otherwise connections
    /// are served one after another.
    #[serde(default = "default_true")]
    pub multithreaded: bool,
    /// Read timeout per connection in seconds.  `0` blocks forever.  When
    /// unset the default follows `multithreaded`; see
    /// [`socket_timeout`](Self::socket_timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_timeout_secs: Option<u64>,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Shared-secret settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    #[serde(default = "default_secret")]
    pub secret: String,
}

/// Multicast beacon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MulticastConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_multicast_group")]
    pub group: String,
    #[serde(default = "default_multicast_port")]
    pub port: u16,
}

/// One device on the simulated bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedDeviceEntry {
    /// 16 hex digits, CRC byte first.
    pub address: RomId,
    #[serde(default)]
    pub alarm: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

/// Read timeout of a multi-threaded server with no `socket_timeout_secs`.
pub const MULTITHREADED_SOCKET_TIMEOUT_SECS: u64 = 30;

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_secret() -> String {
    DEFAULT_SECRET.to_string()
}
fn default_multicast_group() -> String {
    MULTICAST_GROUP.to_string()
}
fn default_multicast_port() -> u16 {
    MULTICAST_PORT
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            multithreaded: default_true(),
            socket_timeout_secs: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: default_multicast_group(),
            port: default_multicast_port(),
        }
    }
}

impl ListenConfig {
    /// `host:port` string handed to the listener.
    pub fn listen_address(&self) -> Result<std::net::SocketAddr, ConfigError> {
        let text = format!("{}:{}", self.bind_address, self.port);
        text.parse()
            .map_err(|_| ConfigError::InvalidListenAddress(text))
    }

    /// The read timeout, or `None` to block forever.
    ///
    /// An explicit `0` means no timeout.  Without an explicit value a
    /// multi-threaded server uses [`MULTITHREADED_SOCKET_TIMEOUT_SECS`] and a
    /// single-threaded one never times out.
    pub fn socket_timeout(&self) -> Option<Duration> {
        let secs = match self.socket_timeout_secs {
            Some(secs) => secs,
            None if self.multithreaded => MULTITHREADED_SOCKET_TIMEOUT_SECS,
            None => 0,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

impl ServerConfig {
    /// Builds the demo bus described by `[[simulated_devices]]`.
    pub fn simulated_bus(&self) -> SimulatedBus {
        let mut bus = SimulatedBus::new();
        for entry in &self.simulated_devices {
            bus.attach(SimulatedDevice {
                address: entry.address,
                alarm: entry.alarm,
            });
        }
        bus
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("server.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `ServerConfig` from `path`, returning the defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
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
    use owlink_core::{BusAdapter, OwnerId};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("owlink-server-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_server_config_default_matches_protocol_constants() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.server.port, 6161);
        assert_eq!(cfg.auth.secret, "Adapter Secret Default");
        assert_eq!(cfg.multicast.group, "228.5.6.7");
        assert_eq!(cfg.multicast.port, 6163);
    }

    #[test]
    fn test_server_config_default_is_multithreaded_with_thirty_second_timeout() {
        let cfg = ServerConfig::default();
        assert!(cfg.server.multithreaded);
        assert_eq!(cfg.server.socket_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_multicast_is_disabled_by_default() {
        assert!(!ServerConfig::default().multicast.enabled);
    }

    #[test]
    fn test_zero_socket_timeout_means_no_timeout() {
        // Arrange
        let cfg = ListenConfig {
            socket_timeout_secs: Some(0),
            ..ListenConfig::default()
        };

        // Act / Assert
        assert_eq!(cfg.socket_timeout(), None);
    }

    #[test]
    fn test_single_threaded_default_is_no_timeout() {
        // Arrange
        let cfg = ListenConfig {
            multithreaded: false,
            ..ListenConfig::default()
        };

        // Act / Assert
        assert_eq!(cfg.socket_timeout(), None);
    }

    #[test]
    fn test_explicit_timeout_applies_in_either_mode() {
        for multithreaded in [true, false] {
            let cfg = ListenConfig {
                multithreaded,
                socket_timeout_secs: Some(5),
                ..ListenConfig::default()
            };
            assert_eq!(cfg.socket_timeout(), Some(Duration::from_secs(5)));
        }
    }

    #[test]
    fn test_single_threaded_toml_without_timeout_blocks_forever() {
        // Arrange
        let text = "[server]\nmultithreaded = false\n";

        // Act
        let cfg: ServerConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.server.socket_timeout_secs, None);
        assert_eq!(cfg.server.socket_timeout(), None);
    }

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        // Arrange
        let text = r#"
            [auth]
            secret = "s3cret"
        "#;

        // Act
        let cfg: ServerConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.auth.secret, "s3cret");
        assert_eq!(cfg.server, ListenConfig::default());
        assert!(cfg.simulated_devices.is_empty());
    }

    #[test]
    fn test_simulated_devices_parse_from_conventional_notation() {
        // Arrange
        let text = r#"
            [[simulated_devices]]
            address = "0807060504030201"

            [[simulated_devices]]
            address = "5A0000000000AB28"
            alarm = true
        "#;

        // Act
        let cfg: ServerConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.simulated_devices.len(), 2);
        assert_eq!(cfg.simulated_devices[0].address.bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!cfg.simulated_devices[0].alarm);
        assert_eq!(cfg.simulated_devices[1].address.family(), 0x28);
        assert!(cfg.simulated_devices[1].alarm);
    }

    #[test]
    fn test_malformed_device_address_is_a_parse_error() {
        let text = r#"
            [[simulated_devices]]
            address = "not-an-address"
        "#;
        assert!(toml::from_str::<ServerConfig>(text).is_err());
    }

    #[test]
    fn test_simulated_bus_contains_configured_devices() {
        // Arrange
        let address = RomId::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let cfg = ServerConfig {
            simulated_devices: vec![SimulatedDeviceEntry {
                address,
                alarm: false,
            }],
            ..ServerConfig::default()
        };

        // Act
        let adapter = owlink_core::LocalAdapter::new("demo", cfg.simulated_bus());

        // Assert
        assert_eq!(adapter.devices(OwnerId::new()).expect("enumerate"), vec![address]);
    }

    #[test]
    fn test_listen_address_combines_bind_address_and_port() {
        let cfg = ListenConfig {
            bind_address: "127.0.0.1".into(),
            port: 7000,
            ..ListenConfig::default()
        };
        assert_eq!(cfg.listen_address().unwrap(), "127.0.0.1:7000".parse().unwrap());
    }

    #[test]
    fn test_listen_address_rejects_hostnames() {
        let cfg = ListenConfig {
            bind_address: "not an ip".into(),
            ..ListenConfig::default()
        };
        assert!(matches!(
            cfg.listen_address(),
            Err(ConfigError::InvalidListenAddress(_))
        ));
    }

    #[test]
    fn test_load_config_returns_default_when_file_missing() {
        // Arrange
        let path = temp_path("missing.toml");
        let _ = std::fs::remove_file(&path);

        // Act
        let cfg = load_config(&path).expect("missing file is not an error");

        // Assert
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_config() {
        // Arrange
        let path = temp_path("saved.toml");
        let mut cfg = ServerConfig::default();
        cfg.server.port = 7001;
        cfg.multicast.enabled = true;
        cfg.simulated_devices.push(SimulatedDeviceEntry {
            address: RomId::with_crc(0x10, [9, 8, 7, 6, 5, 4]),
            alarm: true,
        });

        // Act
        save_config(&path, &cfg).expect("save");
        let restored = load_config(&path).expect("load");
        let _ = std::fs::remove_file(&path);

        // Assert
        assert_eq!(restored, cfg);
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        // Arrange
        let path = temp_path("broken.toml");
        std::fs::write(&path, "[server\nport = ").expect("write");

        // Act
        let result = load_config(&path);
        let _ = std::fs::remove_file(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
