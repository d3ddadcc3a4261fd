//! Process bootstrap: logging, storage, chain and API server, in that order.

use crate::blockchain::Blockchain;
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::error::ChainError;
use crate::persistence::{Database, InMemoryPersistence, JsonFilePersistence, Persistence};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, honoring `RUST_LOG` (default `info`).
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn ensure_parent_dir(path: &str) -> Result<(), ChainError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                ChainError::IoError(format!("Failed to create data dir {:?}: {}", parent, e))
            })?;
        }
    }
    Ok(())
}

/// Build the storage backend named by the config.
pub fn open_persistence(storage: &StorageConfig) -> Result<Arc<dyn Persistence>, ChainError> {
    let persistence: Arc<dyn Persistence> = match storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryPersistence::new()),
        StorageBackend::Json => {
            ensure_parent_dir(&storage.path)?;
            Arc::new(JsonFilePersistence::new(&storage.path))
        }
        StorageBackend::Sqlite => {
            ensure_parent_dir(&storage.path)?;
            match Database::open(&storage.path) {
                Ok(db) => Arc::new(db),
                Err(e) => {
                    warn!(
                        "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                        storage.path, e
                    );
                    Arc::new(InMemoryPersistence::new())
                }
            }
        }
    };
    info!(backend = ?storage.backend, path = %storage.path, "Storage ready");
    Ok(persistence)
}

/// Open storage and load the chain it holds, or start a new one.
///
/// A stored chain that cannot be read is an error rather than a reason to
/// start over: starting over would overwrite the evidence.
pub fn load_blockchain(config: &Config) -> Result<Blockchain, ChainError> {
    let persistence = open_persistence(&config.storage)?;
    let blockchain = if config.chain.reset_on_start {
        warn!("reset_on_start is set; discarding stored chain");
        Blockchain::start_fresh(persistence)?
    } else {
        Blockchain::new_with_persistence(persistence)?
    };
    info!(length = blockchain.len(), "Chain loaded");
    Ok(blockchain)
}

/// Run the node until the API server stops.
#[cfg(feature = "api")]
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let blockchain = load_blockchain(&config)?;
    if let Err(violation) = blockchain.verify() {
        warn!(%violation, "Stored chain failed verification at startup");
    }

    let node = Arc::new(crate::api::Node::new(blockchain));
    crate::api::run_api_server(node, &config.server).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn config_for(backend: StorageBackend, path: &Path) -> Config {
        let mut config = Config::default();
        config.storage.backend = backend;
        config.storage.path = path.to_string_lossy().into_owned();
        config
    }

    #[test]
    fn test_memory_backend_starts_with_genesis() {
        let chain = load_blockchain(&Config::default()).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_json_backend_reloads_and_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("blockchain.json");
        let mut config = config_for(StorageBackend::Json, &path);

        let mut chain = load_blockchain(&config).unwrap();
        chain.add_block(json!({"id": "t1"}).as_object().cloned().unwrap()).unwrap();
        let original = chain.to_records();
        drop(chain);

        let reloaded = load_blockchain(&config).unwrap();
        assert_eq!(reloaded.to_records(), original);

        config.chain.reset_on_start = true;
        let fresh = load_blockchain(&config).unwrap();
        assert_eq!(fresh.len(), 1);
        assert!(!fresh.contains_data_hash(&original[1].data_hash));
    }

    #[test]
    fn test_sqlite_backend_reloads() {
        let dir = TempDir::new().unwrap();
        let config = config_for(StorageBackend::Sqlite, &dir.path().join("chain.db"));

        let mut chain = load_blockchain(&config).unwrap();
        chain.add_block(json!({"id": "t1"}).as_object().cloned().unwrap()).unwrap();
        chain.add_block(json!({"id": "t2"}).as_object().cloned().unwrap()).unwrap();
        drop(chain);

        let reloaded = load_blockchain(&config).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert!(reloaded.verify().is_ok());
    }

    #[test]
    fn test_unreadable_json_chain_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blockchain.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_blockchain(&config_for(StorageBackend::Json, &path)).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }
}
