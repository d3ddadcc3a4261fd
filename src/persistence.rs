//! Storage backends for SentinelChain
//!
//! The chain only talks to the [`Persistence`] trait. Backends store
//! [`BlockRecord`]s exactly as produced by `Block::to_record`, so whatever a
//! backend returns can be handed straight to `verify_chain`.

use crate::blockchain::BlockRecord;
use crate::error::{ChainError, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub const STORAGE_FORMAT_VERSION: &str = "1.0";

fn default_version() -> String {
    STORAGE_FORMAT_VERSION.to_string()
}

/// The stored chain document: `{"version": "1.0", "chain": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedChain {
    #[serde(default = "default_version")]
    pub version: String,
    pub chain: Vec<BlockRecord>,
}

impl PersistedChain {
    pub fn new(chain: Vec<BlockRecord>) -> Self {
        Self {
            version: default_version(),
            chain,
        }
    }
}

/// Abstraction for persistence backends.
pub trait Persistence: Send + Sync {
    /// The stored chain, or `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<PersistedChain>>;
    /// Replace the stored chain.
    fn save(&self, chain: &PersistedChain) -> Result<()>;
    /// Store `block` at position `index`, dropping anything stored after it.
    fn save_block(&self, index: u64, block: &BlockRecord) -> Result<()>;
    /// Forget the stored chain.
    fn clear(&self) -> Result<()>;
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::DatabaseError("Mutex poisoned".to_string())
}

/// A block may replace a stored one or extend the chain by one, never leave a gap.
fn check_block_index(index: u64, stored_len: usize) -> Result<()> {
    if index > stored_len as u64 {
        return Err(ChainError::InvalidBlock(format!(
            "Block index {} is past the end of the stored chain ({} blocks)",
            index, stored_len
        )));
    }
    Ok(())
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub blocks: Arc<Mutex<Vec<BlockRecord>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn load(&self) -> Result<Option<PersistedChain>> {
        let blocks = self.blocks.lock().map_err(poisoned)?;
        if blocks.is_empty() {
            return Ok(None);
        }
        Ok(Some(PersistedChain::new(blocks.clone())))
    }

    fn save(&self, chain: &PersistedChain) -> Result<()> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        *blocks = chain.chain.clone();
        Ok(())
    }

    fn save_block(&self, index: u64, block: &BlockRecord) -> Result<()> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        check_block_index(index, blocks.len())?;
        blocks.truncate(index as usize);
        blocks.push(block.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.blocks.lock().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// Whole-chain JSON document on disk. Every write replaces the file through a
/// temporary sibling so readers never see a half-written chain.
pub struct JsonFilePersistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_document(&self) -> Result<Option<PersistedChain>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let doc: PersistedChain = serde_json::from_str(&contents).map_err(|e| {
            ChainError::Serialization(format!(
                "Failed to parse chain file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(doc))
    }

    fn write_document(&self, doc: &PersistedChain) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<PersistedChain>> {
        self.read_document()
    }

    fn save(&self, chain: &PersistedChain) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        self.write_document(chain)
    }

    fn save_block(&self, index: u64, block: &BlockRecord) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let mut doc = self.read_document()?.unwrap_or_else(|| PersistedChain::new(Vec::new()));
        check_block_index(index, doc.chain.len())?;
        doc.chain.truncate(index as usize);
        doc.chain.push(block.clone());
        self.write_document(&doc)
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// SQLite-backed storage, one row per block.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                idx INTEGER PRIMARY KEY,
                data TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create metadata table: {}", e))
        })?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    fn insert_block(conn: &Connection, index: u64, block: &BlockRecord) -> Result<()> {
        let data_json = serde_json::to_string(&block.data).map_err(|e| {
            ChainError::DatabaseError(format!("Failed to serialize block data: {}", e))
        })?;

        conn.execute(
            "INSERT OR REPLACE INTO blocks (idx, data, previous_hash, timestamp, data_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                index as i64,
                data_json,
                block.previous_hash,
                block.timestamp,
                block.data_hash,
                block.hash,
            ],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        Ok(())
    }

    fn write_version(conn: &Connection, version: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('version', ?1)",
            params![version],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save version: {}", e)))?;
        Ok(())
    }
}

impl Persistence for Database {
    fn load(&self) -> Result<Option<PersistedChain>> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn
            .prepare(
                "SELECT data, previous_hash, timestamp, data_hash, hash
                 FROM blocks ORDER BY idx ASC",
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut chain = Vec::new();
        for row in rows {
            let (data_json, previous_hash, timestamp, data_hash, hash) =
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?;
            let data = serde_json::from_str(&data_json).map_err(|e| {
                ChainError::DatabaseError(format!("Failed to deserialize block data: {}", e))
            })?;
            chain.push(BlockRecord {
                data,
                previous_hash,
                timestamp,
                data_hash,
                hash,
            });
        }

        if chain.is_empty() {
            return Ok(None);
        }

        let version = conn
            .query_row("SELECT value FROM metadata WHERE key = 'version'", [], |row| {
                row.get::<_, String>(0)
            })
            .unwrap_or_else(|_| default_version());

        Ok(Some(PersistedChain { version, chain }))
    }

    fn save(&self, chain: &PersistedChain) -> Result<()> {
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        tx.execute("DELETE FROM blocks", [])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to clear blocks: {}", e)))?;
        for (index, block) in chain.chain.iter().enumerate() {
            Self::insert_block(&tx, index as u64, block)?;
        }
        Self::write_version(&tx, &chain.version)?;

        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    fn save_block(&self, index: u64, block: &BlockRecord) -> Result<()> {
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        let stored_len: i64 = tx
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to count blocks: {}", e)))?;
        check_block_index(index, stored_len as usize)?;

        tx.execute("DELETE FROM blocks WHERE idx >= ?1", params![index as i64])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to trim blocks: {}", e)))?;
        Self::insert_block(&tx, index, block)?;

        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.execute("DELETE FROM blocks", [])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to clear blocks: {}", e)))?;
        Ok(())
    }
}

/// In-memory backend whose writes can be switched to fail.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyPersistence {
    inner: InMemoryPersistence,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyPersistence {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ChainError::IoError("disk unavailable".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Persistence for FlakyPersistence {
    fn load(&self) -> Result<Option<PersistedChain>> {
        self.inner.load()
    }

    fn save(&self, chain: &PersistedChain) -> Result<()> {
        self.check()?;
        self.inner.save(chain)
    }

    fn save_block(&self, index: u64, block: &BlockRecord) -> Result<()> {
        self.check()?;
        self.inner.save_block(index, block)
    }

    fn clear(&self) -> Result<()> {
        self.check()?;
        self.inner.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use serde_json::json;

    fn sample_records() -> Vec<BlockRecord> {
        let mut chain = Blockchain::new().unwrap();
        chain
            .add_block(json!({"id": "t1", "details": {"source_port": 52949}}).as_object().cloned().unwrap())
            .unwrap();
        chain.to_records()
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
        assert!(db.load().unwrap().is_none());
    }

    #[test]
    fn test_database_save_and_load() {
        let db = Database::open(":memory:").unwrap();
        let records = sample_records();
        db.save(&PersistedChain::new(records.clone())).unwrap();

        let loaded = db.load().unwrap().unwrap();
        assert_eq!(loaded.version, STORAGE_FORMAT_VERSION);
        assert_eq!(loaded.chain, records);
    }

    #[test]
    fn test_database_save_block_truncates_tail() {
        let db = Database::open(":memory:").unwrap();
        let records = sample_records();
        db.save(&PersistedChain::new(records.clone())).unwrap();

        db.save_block(1, &records[0]).unwrap();
        let loaded = db.load().unwrap().unwrap();
        assert_eq!(loaded.chain.len(), 2);
        assert_eq!(loaded.chain[1], records[0]);

        db.clear().unwrap();
        assert!(db.load().unwrap().is_none());
    }

    #[test]
    fn test_in_memory_persistence() {
        let store = InMemoryPersistence::new();
        assert!(store.load().unwrap().is_none());

        let records = sample_records();
        store.save_block(0, &records[0]).unwrap();
        store.save_block(1, &records[1]).unwrap();
        assert_eq!(store.load().unwrap().unwrap().chain, records);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_block_rejects_gap() {
        let records = sample_records();

        let store = InMemoryPersistence::new();
        assert!(matches!(store.save_block(1, &records[1]), Err(ChainError::InvalidBlock(_))));
        assert!(store.load().unwrap().is_none());

        let db = Database::open(":memory:").unwrap();
        assert!(db.save_block(3, &records[1]).is_err());
        assert!(db.load().unwrap().is_none());

        let dir = tempfile::TempDir::new().unwrap();
        let file = JsonFilePersistence::new(dir.path().join("blockchain.json"));
        file.save_block(0, &records[0]).unwrap();
        assert!(file.save_block(2, &records[1]).is_err());
        assert_eq!(file.load().unwrap().unwrap().chain, vec![records[0].clone()]);
    }

    #[test]
    fn test_persisted_chain_document_shape() {
        let doc = PersistedChain::new(sample_records());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["version"], "1.0");
        let first = &value["chain"][0];
        for field in ["data", "previous_hash", "timestamp", "data_hash", "hash"] {
            assert!(first.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_persisted_chain_version_is_optional() {
        let doc: PersistedChain = serde_json::from_str(r#"{"chain": []}"#).unwrap();
        assert_eq!(doc.version, STORAGE_FORMAT_VERSION);
        assert!(doc.chain.is_empty());
    }
}
