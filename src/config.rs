//! Configuration management for SentinelChain

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "SENTINEL_CONFIG";
pub const PORT_ENV: &str = "PORT";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `"*"` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainConfig {
    /// Discard whatever storage holds and start from a fresh genesis block.
    #[serde(default)]
    pub reset_on_start: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_storage_path() -> String {
    "blockchain.json".to_string()
}

impl Config {
    /// Parse a TOML document; absent sections take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.storage.backend != StorageBackend::Memory && self.storage.path.trim().is_empty() {
            return Err(ChainError::ConfigError(
                "storage.path must be set for json and sqlite backends".to_string(),
            ));
        }
        if self.server.cors_origins.is_empty() {
            return Err(ChainError::ConfigError(
                "server.cors_origins must list at least one origin".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ChainError> {
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.server.port = port
                .parse()
                .map_err(|e| ChainError::ConfigError(format!("Invalid {}: {}", PORT_ENV, e)))?;
        }
        Ok(())
    }
}

/// Read the config file at `path`; a missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ChainError> {
    let mut config = if path.exists() {
        Config::from_toml(&fs::read_to_string(path)?)?
    } else {
        Config::default()
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Load the config from `$SENTINEL_CONFIG` or `config.toml`.
pub fn load_config() -> Result<Config, ChainError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config_from(Path::new(&path))
}
