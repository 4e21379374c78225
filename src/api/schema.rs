use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ledger::{Block, FileRecord};

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// What went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl ToString) -> Self {
        ErrorResponse {
            error: error.to_string(),
        }
    }
}

/// A recorded file together with the block that holds it
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileEntry {
    /// Index of the block recording the file
    pub block_index: u64,

    /// Hash of the block recording the file
    pub block_hash: String,

    /// When the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub recorded_at: DateTime<Utc>,

    /// Lowercased extension of the original filename
    pub file_extension: String,

    /// The file metadata
    pub record: FileRecord,
}

impl FileEntry {
    /// Builds an entry from a block, if the block records a file
    pub fn from_block(block: &Block) -> Option<Self> {
        let record = block.payload.file()?;
        Some(FileEntry {
            block_index: block.index,
            block_hash: block.hash.clone(),
            recorded_at: block.timestamp,
            file_extension: record.file_extension(),
            record: record.clone(),
        })
    }
}
