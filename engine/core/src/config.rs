//! TOML Configuration File Support
//!
//! Centralized configuration loading for the sync engine, supporting a TOML
//! configuration file at `~/.config/medsync/engine.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! kind = "bridge"
//! bridge_dir = "/run/user/1000/medsync/bridge"
//! connect_timeout_ms = 10000
//! mtu = 512
//! scan_interval_ms = 1000
//!
//! [sync]
//! call_timeout_secs = 60
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionConfig;
use crate::transport::config::{TransportConfig, TransportType};

/// Default deadline for correlated calls
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// "bridge" (alias "unix") or "simulated"
    pub kind: Option<String>,

    /// Bridge socket directory
    pub bridge_dir: Option<String>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Requested MTU
    pub mtu: Option<u16>,

    /// Bridge directory poll interval in milliseconds
    pub scan_interval_ms: Option<u64>,
}

/// Sync section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncToml {
    /// Deadline for correlated calls in seconds
    pub call_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Transport configuration section
    pub transport: TransportToml,

    /// Sync configuration section
    pub sync: SyncToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective engine configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Transport configuration
    pub transport: TransportConfig,

    /// Deadline for correlated calls
    pub call_timeout: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Session settings derived from this configuration
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mtu: self.transport.mtu,
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
            call_timeout: self.call_timeout,
        }
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if usize::from(self.transport.mtu) <= crate::protocol::frame::ATT_HEADER_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "mtu {} leaves no room for payload",
                self.transport.mtu
            )));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.transport.scan_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scan_interval_ms must be positive".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "call_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/medsync/engine.toml` or
/// `~/.config/medsync/engine.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("medsync").join("engine.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// If `path` is `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or names an unknown transport kind.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: EngineToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn parse_transport_kind(kind: &str, bridge_dir: Option<PathBuf>) -> Option<TransportType> {
    match kind.to_lowercase().as_str() {
        "simulated" | "sim" => Some(TransportType::Simulated),
        #[cfg(unix)]
        "bridge" | "unix" => Some(TransportType::UnixSocket { bridge_dir }),
        _ => None,
    }
}

fn set_bridge_dir(transport: &mut TransportType, dir: PathBuf) {
    match transport {
        #[cfg(unix)]
        TransportType::UnixSocket { bridge_dir } => *bridge_dir = Some(dir),
        TransportType::Simulated => {}
    }
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut EngineConfig, toml: &EngineToml) -> Result<(), ConfigError> {
    let bridge_dir = toml.transport.bridge_dir.as_ref().map(PathBuf::from);

    if let Some(ref kind) = toml.transport.kind {
        config.transport.transport =
            parse_transport_kind(kind, bridge_dir).ok_or_else(|| {
                ConfigError::ValidationError(format!("unknown transport kind {kind:?}"))
            })?;
    } else if let Some(dir) = bridge_dir {
        set_bridge_dir(&mut config.transport.transport, dir);
    }
    if let Some(timeout) = toml.transport.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if let Some(mtu) = toml.transport.mtu {
        config.transport.mtu = mtu;
    }
    if let Some(interval) = toml.transport.scan_interval_ms {
        config.transport.scan_interval_ms = interval;
    }

    if let Some(secs) = toml.sync.call_timeout_secs {
        config.call_timeout = Duration::from_secs(secs);
    }
    Ok(())
}

/// Apply environment variable overrides to the config
///
/// Unparsable values are logged and ignored.
fn apply_env_config<F>(config: &mut EngineConfig, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
        let parsed = value.parse().ok();
        if parsed.is_none() {
            tracing::warn!(key, value, "Ignoring unparsable environment override");
        }
        parsed
    }

    if let Some(kind) = var("MEDSYNC_TRANSPORT") {
        match parse_transport_kind(&kind, None) {
            Some(transport) => {
                config.transport.transport = transport;
                config.source = ConfigSource::Env;
            }
            None => tracing::warn!(kind = %kind, "Ignoring unknown MEDSYNC_TRANSPORT"),
        }
    }
    if let Some(dir) = var("MEDSYNC_BRIDGE_DIR") {
        set_bridge_dir(&mut config.transport.transport, PathBuf::from(dir));
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = var("MEDSYNC_CONNECT_TIMEOUT")
        .and_then(|v| parsed::<u64>("MEDSYNC_CONNECT_TIMEOUT", &v))
    {
        config.transport.connect_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(mtu) = var("MEDSYNC_MTU").and_then(|v| parsed::<u16>("MEDSYNC_MTU", &v)) {
        config.transport.mtu = mtu;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        var("MEDSYNC_SCAN_INTERVAL").and_then(|v| parsed::<u64>("MEDSYNC_SCAN_INTERVAL", &v))
    {
        config.transport.scan_interval_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) =
        var("MEDSYNC_CALL_TIMEOUT").and_then(|v| parsed::<u64>("MEDSYNC_CALL_TIMEOUT", &v))
    {
        config.call_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    bridge_dir: Option<PathBuf>,
    connect_timeout_ms: Option<u64>,
    call_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the bridge directory (selects the bridge transport)
    #[must_use]
    pub fn with_bridge_dir(mut self, dir: PathBuf) -> Self {
        self.bridge_dir = Some(dir);
        self
    }

    /// Override the connect timeout
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Override the correlated call timeout
    #[must_use]
    pub fn with_call_timeout_secs(mut self, secs: u64) -> Self {
        self.call_timeout_secs = Some(secs);
        self
    }

    /// Apply overrides to a loaded configuration
    pub fn apply(&self, config: &mut EngineConfig) {
        let mut applied = false;

        #[cfg(unix)]
        if let Some(ref dir) = self.bridge_dir {
            config.transport.transport = TransportType::UnixSocket {
                bridge_dir: Some(dir.clone()),
            };
            applied = true;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.transport.connect_timeout_ms = ms;
            applied = true;
        }
        if let Some(secs) = self.call_timeout_secs {
            config.call_timeout = Duration::from_secs(secs);
            applied = true;
        }

        if applied {
            config.source = ConfigSource::Cli;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
