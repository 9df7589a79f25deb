//! Arabica configuration system.
//!
//! Every field carries a serde default, so a missing or partial
//! `config.toml` still produces a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ArabicaError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArabicaConfig {
    /// Root of the file-backed data directory. `~` is expanded.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_data_dir() -> String { "~/.arabica/data".into() }

impl Default for ArabicaConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            gateway: GatewayConfig::default(),
            scheduler: SchedulerConfig::default(),
            presence: PresenceConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl ArabicaConfig {
    /// Load config from the default path (~/.arabica/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArabicaError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ArabicaError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ArabicaError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Arabica home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".arabica")
    }

    /// Resolved data directory with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).to_string())
    }
}

/// HTTP/WebSocket gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 3000 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Lifecycle scheduler configuration, shared by the shift and envelope engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// First shift tick fires this long after startup.
    #[serde(default = "default_shift_delay")]
    pub shift_initial_delay_secs: u64,
    /// Offset from the shift engine so both never start in the same instant.
    #[serde(default = "default_envelope_delay")]
    pub envelope_initial_delay_secs: u64,
    /// Fixed business timezone offset (hours east of UTC).
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
    /// Day partitions of the scheduler state older than this are pruned.
    #[serde(default = "default_retention")]
    pub state_retention_days: u32,
}

fn bool_true() -> bool { true }
fn default_check_interval() -> u64 { 300 }
fn default_shift_delay() -> u64 { 2 }
fn default_envelope_delay() -> u64 { 6 }
fn default_utc_offset() -> i32 { 3 }
fn default_retention() -> u32 { 7 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval(),
            shift_initial_delay_secs: default_shift_delay(),
            envelope_initial_delay_secs: default_envelope_delay(),
            utc_offset_hours: default_utc_offset(),
            state_retention_days: default_retention(),
        }
    }
}

/// Presence/typing coordinator timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_typing_ttl")]
    pub typing_ttl_secs: u64,
}

fn default_heartbeat() -> u64 { 30 }
fn default_connection_timeout() -> u64 { 60 }
fn default_typing_ttl() -> u64 { 5 }

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
            connection_timeout_secs: default_connection_timeout(),
            typing_ttl_secs: default_typing_ttl(),
        }
    }
}

impl PresenceConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn typing_ttl(&self) -> Duration {
        Duration::from_secs(self.typing_ttl_secs)
    }
}

/// Push notification sink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// When set, notifications are POSTed here as JSON. Otherwise they are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
}
