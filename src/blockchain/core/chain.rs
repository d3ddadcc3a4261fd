use crate::blockchain::core::validation::{verify_chain, IntegrityViolation};
use crate::crypto::canonical_digest;
use crate::error::ChainError;
use crate::persistence::{InMemoryPersistence, PersistedChain, Persistence};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Block payload: a JSON object, opaque to the chain.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_MESSAGE: &str = "Zero-Day Sentinel Started";

/// UTC, second precision, no zone suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn current_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Plain transport form of a block. This is what `/chain` returns, what
/// storage backends write and what [`verify_chain`] consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub data: Payload,
    pub previous_hash: String,
    pub timestamp: String,
    pub data_hash: String,
    pub hash: String,
}

#[derive(Serialize)]
struct LinkPreimage<'a> {
    data_hash: &'a str,
    previous_hash: &'a str,
    timestamp: &'a str,
}

/// An immutable chain entry. Fields are only readable; changing a payload
/// means building a new block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    data: Payload,
    previous_hash: String,
    timestamp: String,
    data_hash: String,
    hash: String,
}

impl Block {
    /// Build a fresh block stamped with the current UTC time.
    pub fn new(data: Payload, previous_hash: impl Into<String>) -> Result<Self, ChainError> {
        Self::with_parts(data, previous_hash, None, None, None)
    }

    /// Build a block from whatever parts are already known. Missing parts are
    /// derived; supplied parts are taken verbatim, which is how stored blocks
    /// are reconstructed without masking tampering.
    pub fn with_parts(
        data: Payload,
        previous_hash: impl Into<String>,
        timestamp: Option<String>,
        data_hash: Option<String>,
        hash: Option<String>,
    ) -> Result<Self, ChainError> {
        let previous_hash = previous_hash.into();
        let timestamp = timestamp.unwrap_or_else(current_timestamp);
        let data_hash = match data_hash {
            Some(h) => h,
            None => Self::calculate_data_hash(&data)?,
        };
        let hash = match hash {
            Some(h) => h,
            None => Self::calculate_hash(&data_hash, &previous_hash, &timestamp)?,
        };

        Ok(Block {
            data,
            previous_hash,
            timestamp,
            data_hash,
            hash,
        })
    }

    pub fn from_record(record: BlockRecord) -> Result<Self, ChainError> {
        Self::with_parts(
            record.data,
            record.previous_hash,
            Some(record.timestamp),
            Some(record.data_hash),
            Some(record.hash),
        )
    }

    pub fn calculate_data_hash(data: &Payload) -> Result<String, ChainError> {
        canonical_digest(data)
    }

    /// Link digest over `(data_hash, previous_hash, timestamp)`. The payload
    /// itself never enters this hash.
    pub fn calculate_hash(
        data_hash: &str,
        previous_hash: &str,
        timestamp: &str,
    ) -> Result<String, ChainError> {
        canonical_digest(&LinkPreimage {
            data_hash,
            previous_hash,
            timestamp,
        })
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn data_hash(&self) -> &str {
        &self.data_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    pub fn to_record(&self) -> BlockRecord {
        BlockRecord {
            data: self.data.clone(),
            previous_hash: self.previous_hash.clone(),
            timestamp: self.timestamp.clone(),
            data_hash: self.data_hash.clone(),
            hash: self.hash.clone(),
        }
    }
}

pub struct Blockchain {
    blocks: Vec<Block>,
    /// data_hash -> position in `blocks`
    data_hash_index: HashMap<String, usize>,
    persistence: Arc<dyn Persistence>,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("blocks", &self.blocks)
            .finish_non_exhaustive()
    }
}

impl Blockchain {
    /// Create a new `Blockchain` using an in-memory persistence backend.
    pub fn new() -> Result<Self, ChainError> {
        Self::new_with_persistence(Arc::new(InMemoryPersistence::new()))
    }

    /// Create a `Blockchain` backed by `persistence`. A chain already held by
    /// the backend is loaded as stored; an empty backend gets a new genesis
    /// block, which is saved immediately.
    pub fn new_with_persistence(persistence: Arc<dyn Persistence>) -> Result<Self, ChainError> {
        let stored = persistence.load()?.filter(|doc| !doc.chain.is_empty());

        let blocks = match stored {
            Some(doc) => {
                let blocks = doc
                    .chain
                    .into_iter()
                    .map(Block::from_record)
                    .collect::<Result<Vec<_>, _>>()?;
                info!(blocks = blocks.len(), "Loaded chain from storage");
                blocks
            }
            None => return Self::start_fresh(persistence),
        };

        let mut data_hash_index = HashMap::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            data_hash_index.entry(block.data_hash.clone()).or_insert(i);
        }

        Ok(Blockchain {
            blocks,
            data_hash_index,
            persistence,
        })
    }

    /// Replace whatever `persistence` holds with a new genesis-only chain.
    ///
    /// The stored chain is swapped in a single `save`, so a failure leaves
    /// the previous stored chain in place.
    pub fn start_fresh(persistence: Arc<dyn Persistence>) -> Result<Self, ChainError> {
        let genesis = Self::create_genesis_block()?;
        persistence.save(&PersistedChain::new(vec![genesis.to_record()]))?;
        info!(hash = %genesis.hash(), "Created genesis block");

        let mut data_hash_index = HashMap::new();
        data_hash_index.insert(genesis.data_hash.clone(), 0);
        Ok(Blockchain {
            blocks: vec![genesis],
            data_hash_index,
            persistence,
        })
    }

    pub fn genesis_payload() -> Payload {
        let mut data = Payload::new();
        data.insert("type".to_string(), "genesis".into());
        data.insert("message".to_string(), GENESIS_MESSAGE.into());
        data
    }

    pub fn create_genesis_block() -> Result<Block, ChainError> {
        Block::new(Self::genesis_payload(), GENESIS_PREVIOUS_HASH)
    }

    /// Append `data` as a new block linked to the current tail.
    ///
    /// Returns `Ok(false)` without touching the chain when a block with the
    /// same payload digest already exists. Storage errors leave the chain
    /// unchanged.
    pub fn add_block(&mut self, data: Payload) -> Result<bool, ChainError> {
        let data_hash = Block::calculate_data_hash(&data)?;
        if let Some(existing) = self.data_hash_index.get(&data_hash) {
            warn!(data_hash = %data_hash, existing_index = *existing, "Skipping duplicate block");
            return Ok(false);
        }

        let previous_hash = self.last_block()?.hash.clone();
        let block = Block::with_parts(data, previous_hash, None, Some(data_hash), None)?;
        let index = self.blocks.len();

        self.persistence.save_block(index as u64, &block.to_record())?;

        debug!(index, hash = %block.hash, "Appended block");
        self.data_hash_index.insert(block.data_hash.clone(), index);
        self.blocks.push(block);
        Ok(true)
    }

    pub fn last_block(&self) -> Result<&Block, ChainError> {
        self.blocks
            .last()
            .ok_or_else(|| ChainError::InvalidBlock("The chain has no genesis block.".to_string()))
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains_data_hash(&self, data_hash: &str) -> bool {
        self.data_hash_index.contains_key(data_hash)
    }

    pub fn to_records(&self) -> Vec<BlockRecord> {
        self.blocks.iter().map(Block::to_record).collect()
    }

    /// The chain as the storage backend currently holds it, falling back to
    /// the in-memory blocks when the backend has nothing.
    pub fn stored_records(&self) -> Result<Vec<BlockRecord>, ChainError> {
        Ok(match self.persistence.load()? {
            Some(doc) => doc.chain,
            None => self.to_records(),
        })
    }

    pub fn persistence(&self) -> Arc<dyn Persistence> {
        self.persistence.clone()
    }

    /// Verify the in-memory chain.
    pub fn verify(&self) -> Result<(), IntegrityViolation> {
        verify_chain(&self.to_records())
    }
}
