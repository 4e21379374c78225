use std::path::Path;

use log::{debug, warn};
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use thiserror::Error;

use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Unreadable block {index}: {reason}")]
    CorruptBlock { index: u64, reason: String },

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// Disk storage for ledger blocks
pub struct LedgerStorage {
    /// The database instance
    db: Db,

    /// Blocks keyed by big-endian index, so iteration follows chain order
    blocks: Tree,

    /// Tail hash and height
    metadata: Tree,
}

impl std::fmt::Debug for LedgerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStorage").finish()
    }
}

impl LedgerStorage {
    /// Opens (or creates) the ledger database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Saves a block and records it as the tail
    ///
    /// The block and the tail metadata are written in one transaction.
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let key = block.index.to_be_bytes();
        let value = bincode::serialize(block)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        (&self.blocks, &self.metadata)
            .transaction(|(blocks, metadata)| -> ConflictableTransactionResult<(), ()> {
                blocks.insert(&key[..], value.as_slice())?;
                metadata.insert("latest_block_hash", block.hash.as_bytes())?;
                metadata.insert("block_height", &key[..])?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => StorageError::DatabaseError(e),
                TransactionError::Abort(()) => {
                    StorageError::SerializationError("block write aborted".to_string())
                }
            })?;

        debug!("Stored block {}", block.index);
        Ok(())
    }

    /// Gets all stored blocks in index order
    ///
    /// Fails with [`StorageError::CorruptBlock`] on the first unreadable block.
    pub fn get_all_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();

        for (position, result) in self.blocks.iter().enumerate() {
            let (key, value) = result?;
            let block = bincode::deserialize::<Block>(&value).map_err(|e| {
                let index = <[u8; 8]>::try_from(key.as_ref())
                    .map(u64::from_be_bytes)
                    .unwrap_or(position as u64);
                warn!(
                    "Failed to deserialize block with key {}: {}",
                    hex::encode(key.as_ref()),
                    e
                );
                StorageError::CorruptBlock {
                    index,
                    reason: e.to_string(),
                }
            })?;
            blocks.push(block);
        }

        Ok(blocks)
    }

    /// Gets the hash of the last saved block
    pub fn get_latest_block_hash(&self) -> Result<String, StorageError> {
        match self.metadata.get("latest_block_hash")? {
            Some(value) => Ok(String::from_utf8_lossy(&value).to_string()),
            None => Err(StorageError::NotFound("Latest block hash not found".to_string())),
        }
    }

    /// Gets the index of the last saved block
    pub fn get_block_height(&self) -> Result<u64, StorageError> {
        match self.metadata.get("block_height")? {
            Some(value) => {
                let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| {
                    StorageError::DeserializationError("Malformed block height".to_string())
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Whether any block has been stored
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Raw trees, for tests that damage the store directly
    #[cfg(test)]
    pub(crate) fn trees(&self) -> (&Tree, &Tree) {
        (&self.blocks, &self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mining::{mine, MiningBudget};
    use crate::ledger::record::FileRecord;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_blocks() {
        let dir = tempdir().unwrap();
        let storage = LedgerStorage::new(dir.path()).unwrap();
        assert!(storage.is_empty());

        let budget = MiningBudget::unbounded();
        let genesis = mine(Block::genesis(), 1, &budget).unwrap();
        let record = FileRecord::new("a.txt", "Qm123", Some("alice".to_string()));
        let block = mine(Block::new(1, record.into(), genesis.hash.clone()), 1, &budget).unwrap();

        storage.save_block(&genesis).unwrap();
        storage.save_block(&block).unwrap();
        storage.flush().unwrap();

        assert_eq!(storage.get_all_blocks().unwrap(), vec![genesis, block.clone()]);
        assert_eq!(storage.get_latest_block_hash().unwrap(), block.hash);
        assert_eq!(storage.get_block_height().unwrap(), 1);
    }

    #[test]
    fn test_unreadable_block_reports_its_index() {
        let dir = tempdir().unwrap();
        let storage = LedgerStorage::new(dir.path()).unwrap();

        let genesis = mine(Block::genesis(), 1, &MiningBudget::unbounded()).unwrap();
        storage.save_block(&genesis).unwrap();
        storage.blocks.insert(1u64.to_be_bytes(), &b"garbage"[..]).unwrap();

        match storage.get_all_blocks() {
            Err(StorageError::CorruptBlock { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected a corrupt block, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_metadata() {
        let dir = tempdir().unwrap();
        let storage = LedgerStorage::new(dir.path()).unwrap();

        assert!(matches!(
            storage.get_latest_block_hash(),
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(storage.get_block_height().unwrap(), 0);
    }
}
