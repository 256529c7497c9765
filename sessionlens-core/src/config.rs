//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/sessionlens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/sessionlens/` (~/.config/sessionlens/)
//! - State/Logs: `$XDG_STATE_HOME/sessionlens/` (~/.local/state/sessionlens/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Claude data directory overrides
    #[serde(default)]
    pub claude: ClaudeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Statistics configuration
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Override paths for the Claude data directory
#[derive(Debug, Deserialize, Default)]
pub struct ClaudeConfig {
    /// Override path for the Claude home directory (default: ~/.claude)
    pub home: Option<PathBuf>,
}

impl ClaudeConfig {
    /// Resolve the transcript projects directory.
    ///
    /// `~/.claude/projects` unless overridden in config.
    pub fn projects_dir(&self) -> Option<PathBuf> {
        self.home
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".claude")))
            .map(|h| h.join("projects"))
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Statistics and query configuration
#[derive(Debug, Deserialize)]
pub struct StatsConfig {
    /// Default number of sessions returned by `recent`
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,

    /// Seconds a query waits for an in-flight aggregation before
    /// falling back to the last fresh snapshot
    #[serde(default = "default_snapshot_wait_secs")]
    pub snapshot_wait_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            snapshot_wait_secs: default_snapshot_wait_secs(),
        }
    }
}

fn default_recent_limit() -> u32 {
    20
}

fn default_snapshot_wait_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/sessionlens/config.toml` (~/.config/sessionlens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("sessionlens").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/sessionlens/` (~/.local/state/sessionlens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("sessionlens")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/sessionlens/sessionlens.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("sessionlens.log")
    }
}
