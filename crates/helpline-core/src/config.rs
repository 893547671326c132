//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/helpline/config.toml)
//! 3. Environment variables (HELPLINE_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "HELPLINE";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the local cache and logs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the support REST API
    #[serde(default)]
    pub api_url: Option<String>,

    /// WebSocket URL of the push connection
    #[serde(default)]
    pub socket_url: Option<String>,

    /// Id of the signed-in user (joins the personal notification room)
    #[serde(default)]
    pub user_id: Option<String>,

    /// Bearer token sent to both the REST API and the push connection
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Automatic reconnection attempts before giving up
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Local typing indicator auto-stop delay
    #[serde(default = "default_typing_idle_ms")]
    pub typing_idle_ms: u64,

    /// Log file path (defaults to <data_dir>/helpline.log)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: None,
            socket_url: None,
            user_id: None,
            auth_token: None,
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            typing_idle_ms: default_typing_idle_ms(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (HELPLINE_DATA_DIR, HELPLINE_API_URL, ...)
    /// 2. Config file (~/.config/helpline/config.toml or HELPLINE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        let optional = |name: &str| {
            std::env::var(format!("{}_{}", ENV_PREFIX, name))
                .ok()
                .map(|val| if val.is_empty() { None } else { Some(val) })
        };

        if let Some(val) = optional("API_URL") {
            self.api_url = val;
        }
        if let Some(val) = optional("SOCKET_URL") {
            self.socket_url = val;
        }
        if let Some(val) = optional("USER_ID") {
            self.user_id = val;
        }
        if let Some(val) = optional("AUTH_TOKEN") {
            self.auth_token = val;
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with HELPLINE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("helpline")
            .join("config.toml")
    }

    /// Get the path to the SQLite cache
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("helpline.db")
    }

    /// Get the log file path
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("helpline.log"))
    }

    /// Connection Manager settings derived from this config
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            user_id: self.user_id.clone(),
            max_attempts: self.reconnect_attempts.max(1),
            retry_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    /// Typing indicator inactivity timeout
    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("helpline")
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_typing_idle_ms() -> u64 {
    2000
}
