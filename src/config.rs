//! Daemon configuration
//!
//! Loaded once at startup from a TOML file. Every field has a built-in
//! default, so an empty file (or no file at all) yields a working daemon.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// File name looked up in the working directory and the config directory
pub const CONFIG_FILE_NAME: &str = "musicbotd.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and timeout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Idle time before a connection is stopped
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Idle time before a pending conversation is discarded
    #[serde(default = "default_conversation_timeout_ms")]
    pub conversation_timeout_ms: u64,

    /// Read timeout of connection loops
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            connection_timeout_ms: default_connection_timeout_ms(),
            conversation_timeout_ms: default_conversation_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ServerConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_millis(self.conversation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file, appended to in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connection_timeout_ms() -> u64 {
    CONNECTION_TIMEOUT.as_millis() as u64
}

fn default_conversation_timeout_ms() -> u64 {
    CONVERSATION_TIMEOUT.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    POLL_INTERVAL.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Pick the configuration file to use.
    ///
    /// An explicit path is returned as is, whether or not it exists.
    /// Otherwise the working directory and then the platform config
    /// directory are searched.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::candidates().into_iter().find(|p| p.is_file()),
        }
    }

    /// Load the file picked by [`AppConfig::locate`], defaults without one
    pub fn load(source: Option<&Path>) -> Result<Self> {
        match source {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Implicit configuration locations, in lookup order
    pub fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dirs) = ProjectDirs::from("", "", "musicbotd") {
            paths.push(dirs.config_dir().join(CONFIG_FILE_NAME));
        }
        paths
    }

    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if server.connection_timeout_ms < server.poll_interval_ms {
            return Err(Error::Config(
                "connection_timeout_ms must not be shorter than poll_interval_ms".into(),
            ));
        }
        if server.conversation_timeout_ms < server.poll_interval_ms {
            return Err(Error::Config(
                "conversation_timeout_ms must not be shorter than poll_interval_ms".into(),
            ));
        }
        Ok(())
    }
}
