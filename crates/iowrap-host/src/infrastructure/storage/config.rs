//! TOML-based configuration persistence for the input monitor.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\IOWrap\config.toml`
//! - Linux:    `~/.config/iowrap/config.toml`
//! - macOS:    `~/Library/Application Support/IOWrap/config.toml`
//!
//! ```toml
//! [monitor]
//! log_level = "debug"
//!
//! [polling]
//! interval_ms = 1
//!
//! [network]
//! listen_port = 8090
//!
//! [[network.agents]]
//! hostname = "esp-cockpit"
//! address = "192.168.1.40"
//! ```
//!
//! Every field carries a serde default so a missing file, a missing section
//! or a missing key all fall back to working values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use iowrap_core::protocol::messages::DEFAULT_AGENT_PORT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
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
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General monitor behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Schema version string; bump when breaking changes are introduced.
    #[serde(default = "default_version")]
    pub version: String,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How often providers re-enumerate devices.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Use in-memory devices instead of the OS input APIs.
    #[serde(default)]
    pub virtual_devices: bool,
}

/// Poll-loop timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingConfig {
    /// Joystick poll interval.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Game-pad poll interval.
    #[serde(default = "default_gamepad_interval_ms")]
    pub gamepad_interval_ms: u64,
    /// How long disposal waits for a poll worker to exit.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

/// UDP agent settings for the network provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IP address to bind the agent socket to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Minimum gap between two output transmissions to one agent.
    #[serde(default = "default_anti_flood_ms")]
    pub anti_flood_ms: u64,
    /// Period of the unconditional output refresh.
    #[serde(default = "default_output_interval_ms")]
    pub output_interval_ms: u64,
    /// Silence after which an input subscription is renewed.
    #[serde(default = "default_resubscribe_timeout_ms")]
    pub resubscribe_timeout_ms: u64,
    /// Agents known without discovery.
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

/// One statically configured agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEntry {
    /// Name the agent reports in every message.
    pub hostname: String,
    /// IP address or resolvable host name.
    pub address: String,
    #[serde(default = "default_agent_port")]
    pub port: u16,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_version() -> String {
    "1.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_refresh_interval_ms() -> u64 {
    5000
}
fn default_interval_ms() -> u64 {
    1
}
fn default_gamepad_interval_ms() -> u64 {
    10
}
fn default_stop_timeout_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    DEFAULT_AGENT_PORT
}
fn default_anti_flood_ms() -> u64 {
    10
}
fn default_output_interval_ms() -> u64 {
    1000
}
fn default_resubscribe_timeout_ms() -> u64 {
    10_000
}
fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            log_level: default_log_level(),
            refresh_interval_ms: default_refresh_interval_ms(),
            virtual_devices: false,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            gamepad_interval_ms: default_gamepad_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn gamepad_interval(&self) -> Duration {
        Duration::from_millis(self.gamepad_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_address: default_bind_address(),
            listen_port: default_listen_port(),
            anti_flood_ms: default_anti_flood_ms(),
            output_interval_ms: default_output_interval_ms(),
            resubscribe_timeout_ms: default_resubscribe_timeout_ms(),
            agents: Vec::new(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file, returning
/// `AppConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`; a missing file yields the defaults.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// See [`save_config`].
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
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

/// Resolves the platform config directory, including the `iowrap` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("IOWrap"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("iowrap"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("IOWrap"))
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
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("iowrap_test_{}", Uuid::new_v4()))
    }

    // ── AppConfig defaults ────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_network_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert!(cfg.network.enabled);
        assert_eq!(cfg.network.listen_port, 8090);
        assert_eq!(cfg.network.anti_flood_ms, 10);
        assert_eq!(cfg.network.output_interval_ms, 1000);
        assert_eq!(cfg.network.resubscribe_timeout_ms, 10_000);
        assert!(cfg.network.agents.is_empty());
    }

    #[test]
    fn test_polling_config_default_durations() {
        let cfg = PollingConfig::default();

        assert_eq!(cfg.interval(), Duration::from_millis(1));
        assert_eq!(cfg.gamepad_interval(), Duration::from_millis(10));
        assert_eq!(cfg.stop_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_monitor_config_default_log_level_is_info() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.virtual_devices);
    }

    // ── TOML round-trip ───────────────────────────────────────────────────────

    #[test]
    fn test_app_config_with_agents_round_trips() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.network.anti_flood_ms = 20;
        cfg.network.agents.push(AgentEntry {
            hostname: "esp-cockpit".to_string(),
            address: "192.168.1.40".to_string(),
            port: 8091,
        });

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        // Arrange / Act
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");

        // Assert
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_sections_keep_other_defaults() {
        // Arrange
        let toml_str = r#"
[polling]
interval_ms = 4

[[network.agents]]
hostname = "esp-1"
address = "10.0.0.7"
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.polling.interval_ms, 4);
        assert_eq!(cfg.polling.gamepad_interval_ms, 10);
        assert_eq!(cfg.network.agents[0].port, 8090);
        assert_eq!(cfg.monitor.log_level, "info");
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── load/save against a temp directory ────────────────────────────────────

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = temp_dir().join("config.toml");

        let cfg = load_config_from(&path).unwrap();

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.monitor.log_level = "debug".to_string();
        cfg.network.listen_port = 9001;

        // Act
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
