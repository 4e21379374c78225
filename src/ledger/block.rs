use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::record::Payload;

/// Previous hash of the genesis block (the all-zero SHA-256 digest)
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Represents a block in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Metadata recorded by this block
    pub payload: Payload,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work (nonce)
    pub nonce: u64,

    /// Hash of the current block, empty until the block is mined
    pub hash: String,
}

/// Fields covered by the block hash, in hashing order
#[derive(Serialize)]
struct HashedFields<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    payload: &'a Payload,
    previous_hash: &'a str,
    nonce: u64,
}

impl Block {
    /// Creates a new unmined block
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `payload` - The metadata to record
    /// * `previous_hash` - The hash of the previous block
    ///
    /// # Returns
    ///
    /// A new Block with a zero nonce and no hash
    pub fn new(index: u64, payload: Payload, previous_hash: String) -> Self {
        Block {
            index,
            timestamp: Utc::now(),
            payload,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        }
    }

    /// Creates the unmined genesis block
    pub fn genesis() -> Self {
        Block::new(0, Payload::genesis(), GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let fields = HashedFields {
            index: self.index,
            timestamp: &self.timestamp,
            payload: &self.payload,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
        };

        // Struct fields serialize in declaration order, so the bytes are stable
        let block_bytes =
            serde_json::to_vec(&fields).expect("block fields always serialize to JSON");

        let mut hasher = Sha256::new();
        hasher.update(&block_bytes);
        hex::encode(hasher.finalize())
    }

    /// Whether the block has been mined
    pub fn is_sealed(&self) -> bool {
        !self.hash.is_empty()
    }

    /// Whether the stored hash matches a fresh calculation
    pub fn has_valid_hash(&self) -> bool {
        self.is_sealed() && self.hash == self.calculate_hash()
    }
}
