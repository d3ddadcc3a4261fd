//! Error types for SentinelChain

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
