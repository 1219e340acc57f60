//! Configuration schema definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extensions: ExtensionsConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Directory holding `extensions.json`.
    pub fn state_dir(&self) -> PathBuf {
        match self.extensions.state_dir {
            Some(ref dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => default_home_dir(),
        }
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        match self.logging.directory {
            Some(ref dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => default_home_dir().join("logs"),
        }
    }
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".exthost"))
        .unwrap_or_else(|| PathBuf::from(".exthost"))
}

/// Extension lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Where the record store lives (default `~/.exthost`).
    #[serde(default)]
    pub state_dir: Option<String>,

    /// Apply updates to live connections and hooks. When off, an update is
    /// persisted and takes effect on the next start.
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    #[serde(default)]
    pub disable_auto_update: bool,

    #[serde(default = "default_update_interval")]
    pub update_check_interval_seconds: u64,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            hot_reload: true,
            disable_auto_update: false,
            update_check_interval_seconds: default_update_interval(),
        }
    }
}

impl ExtensionsConfig {
    pub fn update_check_interval(&self) -> Duration {
        Duration::from_secs(self.update_check_interval_seconds)
    }
}

fn default_true() -> bool {
    true
}

fn default_update_interval() -> u64 {
    300
}

/// Hook execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Applies to hooks that do not declare their own timeout.
    #[serde(default = "default_hook_timeout")]
    pub timeout_ms: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_hook_timeout(),
        }
    }
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_hook_timeout() -> u64 {
    60_000
}

/// MCP connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Connect, initialize and tool discovery budget per server.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// How long a superseded generation's in-flight calls may run before
    /// its connections are torn down anyway.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,

    #[serde(default)]
    pub partial_activation: PartialActivationPolicy,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            drain_timeout_ms: default_drain_timeout(),
            partial_activation: PartialActivationPolicy::default(),
        }
    }
}

impl McpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn default_connect_timeout() -> u64 {
    30_000
}

fn default_drain_timeout() -> u64 {
    5_000
}

/// How many servers of a new generation must come up for it to commit.
///
/// A generation with no servers always passes; one where no server came up
/// never does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialActivationPolicy {
    /// At least one server ready.
    #[default]
    AnyReady,
    /// Every server ready.
    AllReady,
    /// At least this fraction (0.0, 1.0] of servers ready.
    Fraction(f64),
}

impl PartialActivationPolicy {
    pub fn accepts(&self, ready: usize, total: usize) -> bool {
        if total == 0 {
            return true;
        }
        if ready == 0 {
            return false;
        }
        match self {
            PartialActivationPolicy::AnyReady => true,
            PartialActivationPolicy::AllReady => ready == total,
            PartialActivationPolicy::Fraction(min) => ready as f64 / total as f64 >= *min,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            file: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
