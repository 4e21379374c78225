use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{error, info, warn};
use thiserror::Error;

use super::block::Block;
use super::mining::{mine, MiningBudget, MiningStopped, StopReason, MAX_DIFFICULTY};
use super::record::{FileRecord, RecordError};
use super::storage::{LedgerStorage, StorageError};
use super::validation::{validate_blocks, Invariant, ValidationReport, Violation};

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] RecordError),

    #[error("Mining cancelled after {attempts} attempts: {reason}")]
    MiningCancelled { attempts: u64, reason: StopReason },

    #[error("Chain corrupt at {0}")]
    ChainCorrupt(Violation),

    #[error("Invalid difficulty {0} (maximum {max})", max = MAX_DIFFICULTY)]
    InvalidDifficulty(u8),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<MiningStopped> for LedgerError {
    fn from(stopped: MiningStopped) -> Self {
        LedgerError::MiningCancelled {
            attempts: stopped.attempts,
            reason: stopped.reason,
        }
    }
}

/// An append-only chain of file records secured by proof of work
///
/// Cloning yields another handle to the same chain.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks; only sealed blocks are ever pushed
    blocks: Arc<RwLock<Vec<Block>>>,

    /// Held for the whole read-tail, mine, publish sequence
    append_lock: Arc<Mutex<()>>,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: u8,

    /// Storage for ledger data
    storage: Option<Arc<LedgerStorage>>,
}

impl Ledger {
    /// Creates an in-memory ledger with a freshly mined genesis block
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Number of leading zero hex characters each block hash needs
    /// * `budget` - Limits on mining the genesis block
    pub fn new(difficulty: u8, budget: &MiningBudget) -> Result<Self, LedgerError> {
        check_difficulty(difficulty)?;

        let genesis = mine(Block::genesis(), difficulty, budget)?;
        Ok(Self::from_blocks(vec![genesis], difficulty, None))
    }

    /// Opens a ledger backed by a sled database
    ///
    /// An existing chain is loaded and validated before use; a corrupt chain
    /// is refused with [`LedgerError::ChainCorrupt`]. An empty database gets a
    /// new genesis block.
    ///
    /// # Arguments
    ///
    /// * `storage_path` - The path to the storage directory
    /// * `difficulty` - Number of leading zero hex characters each block hash needs
    /// * `budget` - Limits on mining the genesis block
    pub fn with_storage<P: AsRef<Path>>(
        storage_path: P,
        difficulty: u8,
        budget: &MiningBudget,
    ) -> Result<Self, LedgerError> {
        check_difficulty(difficulty)?;
        let storage = LedgerStorage::new(storage_path)?;

        if storage.is_empty() {
            info!("No existing ledger found in storage, creating genesis block");
            let genesis = mine(Block::genesis(), difficulty, budget)?;
            storage.save_block(&genesis)?;
            storage.flush()?;

            return Ok(Self::from_blocks(vec![genesis], difficulty, Some(storage)));
        }

        let blocks = match storage.get_all_blocks() {
            Ok(blocks) => blocks,
            Err(StorageError::CorruptBlock { index, reason }) => {
                error!("Stored block {} cannot be decoded: {}", index, reason);
                return Err(LedgerError::ChainCorrupt(Violation {
                    index,
                    invariant: Invariant::Unreadable,
                }));
            }
            Err(err) => return Err(err.into()),
        };
        let report = validate_blocks(&blocks, difficulty);
        if let Some(violation) = report.first_violation {
            error!("Stored ledger failed validation: {}", violation);
            return Err(LedgerError::ChainCorrupt(violation));
        }

        // Tail metadata is advisory; the blocks themselves have been validated
        let tail = &blocks[blocks.len() - 1];
        let height = storage.get_block_height().ok();
        let latest_hash = storage.get_latest_block_hash().ok();
        if height != Some(tail.index) || latest_hash.as_deref() != Some(tail.hash.as_str()) {
            warn!("Stored tail metadata is stale or missing, block {} is the tail", tail.index);
        }

        info!("Loaded {} blocks from storage", blocks.len());
        Ok(Self::from_blocks(blocks, difficulty, Some(storage)))
    }

    fn from_blocks(blocks: Vec<Block>, difficulty: u8, storage: Option<LedgerStorage>) -> Self {
        Ledger {
            blocks: Arc::new(RwLock::new(blocks)),
            append_lock: Arc::new(Mutex::new(())),
            difficulty,
            storage: storage.map(Arc::new),
        }
    }

    fn read_blocks(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_blocks(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_append(&self) -> MutexGuard<'_, ()> {
        self.append_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    /// Whether an append currently holds the append lock
    #[cfg(test)]
    pub(crate) fn append_in_progress(&self) -> bool {
        self.append_lock.try_lock().is_err()
    }

    /// Replaces the difficulty used for future appends
    #[cfg(test)]
    pub(crate) fn set_difficulty(&mut self, difficulty: u8) {
        self.difficulty = difficulty;
    }

    /// Records a file upload as a new mined block
    ///
    /// Appends are serialized: the tail is read, the block is mined and then
    /// published while the append lock is held. Readers keep going while
    /// mining runs and never see the candidate block. If the budget runs out
    /// the candidate is dropped and the ledger is left untouched.
    ///
    /// # Arguments
    ///
    /// * `record` - Metadata of the uploaded file
    /// * `budget` - Limits on the proof-of-work search
    ///
    /// # Returns
    ///
    /// The newly mined block
    pub fn append_record(&self, record: FileRecord, budget: &MiningBudget) -> Result<Block, LedgerError> {
        let record = record.validated()?;
        let _append = self.lock_append();

        let tail = self.tail();
        let candidate = Block::new(tail.index + 1, record.into(), tail.hash);

        let block = match mine(candidate, self.difficulty, budget) {
            Ok(block) => block,
            Err(stopped) => {
                warn!(
                    "Abandoned append at index {}: {}",
                    tail.index + 1,
                    stopped.reason
                );
                return Err(stopped.into());
            }
        };

        // Persist before publishing so memory never runs ahead of disk
        if let Some(storage) = &self.storage {
            storage.save_block(&block)?;
            storage.flush()?;
        }

        self.write_blocks().push(block.clone());
        info!("Appended block {} with hash {}", block.index, block.hash);

        Ok(block)
    }

    /// Gets the block at `index`
    pub fn get_block(&self, index: u64) -> Result<Block, LedgerError> {
        let blocks = self.read_blocks();
        usize::try_from(index)
            .ok()
            .and_then(|i| blocks.get(i))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("Block {} not found", index)))
    }

    /// Gets the most recent block recording `storage_hash`
    ///
    /// The same content can be uploaded more than once; the highest index
    /// wins.
    pub fn find_by_storage_hash(&self, storage_hash: &str) -> Result<Block, LedgerError> {
        self.read_blocks()
            .iter()
            .rev()
            .find(|block| records_hash(block, storage_hash))
            .cloned()
            .ok_or_else(|| not_found_for_hash(storage_hash))
    }

    /// Gets every block recording `storage_hash`, oldest first
    pub fn find_all_by_storage_hash(&self, storage_hash: &str) -> Result<Vec<Block>, LedgerError> {
        let matches: Vec<Block> = self
            .read_blocks()
            .iter()
            .filter(|block| records_hash(block, storage_hash))
            .cloned()
            .collect();

        if matches.is_empty() {
            return Err(not_found_for_hash(storage_hash));
        }

        Ok(matches)
    }

    /// Gets every block that records a file, oldest first
    pub fn records(&self) -> Vec<Block> {
        self.read_blocks()
            .iter()
            .filter(|block| block.payload.file().is_some())
            .cloned()
            .collect()
    }

    /// Gets the last block in the chain
    pub fn tail(&self) -> Block {
        self.read_blocks()
            .last()
            .cloned()
            .expect("ledger always holds a genesis block")
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.read_blocks().len()
    }

    /// Gets a snapshot of the entire chain
    pub fn chain(&self) -> Vec<Block> {
        self.read_blocks().clone()
    }

    /// Checks every block against the chain rules
    pub fn validate(&self) -> ValidationReport {
        let report = validate_blocks(&self.read_blocks(), self.difficulty);
        if let Some(violation) = &report.first_violation {
            warn!(
                "Ledger validation failed: {} ({} of {} blocks invalid)",
                violation,
                report.invalid_blocks(),
                report.total_blocks()
            );
        }
        report
    }

    /// Validates the ledger
    ///
    /// # Returns
    ///
    /// true if the ledger is valid, false otherwise
    pub fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }
}

fn check_difficulty(difficulty: u8) -> Result<(), LedgerError> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::InvalidDifficulty(difficulty));
    }
    Ok(())
}

fn records_hash(block: &Block, storage_hash: &str) -> bool {
    block
        .payload
        .file()
        .is_some_and(|record| record.storage_hash == storage_hash)
}

fn not_found_for_hash(storage_hash: &str) -> LedgerError {
    LedgerError::NotFound(format!("No block records storage hash {}", storage_hash))
}
