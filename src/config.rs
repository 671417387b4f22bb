//! Configuration management for the ledger node

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address announced to peers in `HELLO`. Falls back to the bound
    /// listener address.
    #[serde(default)]
    pub advertise_addr: Option<String>,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            bootstrap_peers: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or
    /// `hashledger=debug`. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_reply_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn from_toml(input: &str) -> Result<Config, ChainError> {
        let config: Config = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.network.listen_addr.trim().is_empty() {
            return Err(ChainError::ConfigError(
                "network.listen_addr must not be empty".to_string(),
            ));
        }
        if self.network.connect_timeout_ms == 0 {
            return Err(ChainError::ConfigError(
                "network.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.network.reply_timeout_ms == 0 {
            return Err(ChainError::ConfigError(
                "network.reply_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self
            .network
            .bootstrap_peers
            .iter()
            .any(|peer| peer.trim().is_empty())
        {
            return Err(ChainError::ConfigError(
                "network.bootstrap_peers must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from `path` (or `config.toml`). A missing file yields
/// the defaults; an unreadable or invalid one is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ChainError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let config_str = fs::read_to_string(path)?;
    if config_str.trim().is_empty() {
        return Ok(Config::default());
    }
    Config::from_toml(&config_str)
}
