use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Message carried by the genesis block
pub const GENESIS_MESSAGE: &str = "Genesis Block";

/// Errors raised when a file record is missing required metadata
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Missing original filename")]
    MissingFilename,

    #[error("Missing storage hash")]
    MissingStorageHash,
}

/// Metadata describing one uploaded file
///
/// The storage hash is the content address handed back by the external
/// storage backend. The ledger never resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FileRecord {
    /// Name of the file as uploaded
    pub original_filename: String,

    /// Content-addressed storage hash of the file
    pub storage_hash: String,

    /// Name of the uploader, if one was given
    pub uploader_name: Option<String>,

    /// Size of the file in bytes, if known
    pub file_size: Option<u64>,
}

impl FileRecord {
    /// Creates a new file record
    pub fn new(
        original_filename: impl Into<String>,
        storage_hash: impl Into<String>,
        uploader_name: Option<String>,
    ) -> Self {
        FileRecord {
            original_filename: original_filename.into(),
            storage_hash: storage_hash.into(),
            uploader_name,
            file_size: None,
        }
    }

    /// Sets the file size
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = Some(file_size);
        self
    }

    /// Checks that the required fields are present and normalizes the
    /// optional ones
    ///
    /// Surrounding whitespace is trimmed from every field and a blank
    /// uploader name is dropped.
    pub fn validated(self) -> Result<Self, RecordError> {
        let original_filename = self.original_filename.trim().to_string();
        if original_filename.is_empty() {
            return Err(RecordError::MissingFilename);
        }

        let storage_hash = self.storage_hash.trim().to_string();
        if storage_hash.is_empty() {
            return Err(RecordError::MissingStorageHash);
        }

        let uploader_name = self
            .uploader_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(FileRecord {
            original_filename,
            storage_hash,
            uploader_name,
            file_size: self.file_size,
        })
    }

    /// Lowercased extension of the original filename, empty if it has none
    pub fn file_extension(&self) -> String {
        match self.original_filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Payload carried by a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Payload {
    /// Fixed payload of the first block
    Genesis { message: String },

    /// An uploaded file
    File(FileRecord),
}

impl Payload {
    pub fn genesis() -> Self {
        Payload::Genesis {
            message: GENESIS_MESSAGE.to_string(),
        }
    }

    /// Returns the file record, if this payload carries one
    pub fn file(&self) -> Option<&FileRecord> {
        match self {
            Payload::File(record) => Some(record),
            Payload::Genesis { .. } => None,
        }
    }
}

impl From<FileRecord> for Payload {
    fn from(record: FileRecord) -> Self {
        Payload::File(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_trims_and_drops_blank_uploader() {
        let record = FileRecord::new("  a.txt ", " Qm123", Some("   ".to_string()))
            .validated()
            .unwrap();

        assert_eq!(record.original_filename, "a.txt");
        assert_eq!(record.storage_hash, "Qm123");
        assert_eq!(record.uploader_name, None);
    }

    #[test]
    fn test_validated_rejects_missing_fields() {
        let missing_name = FileRecord::new("", "Qm123", None).validated();
        assert_eq!(missing_name, Err(RecordError::MissingFilename));

        let missing_hash = FileRecord::new("a.txt", "  ", None).validated();
        assert_eq!(missing_hash, Err(RecordError::MissingStorageHash));
    }

    #[test]
    fn test_validated_keeps_file_size() {
        let record = FileRecord::new("a.txt", "Qm123", None)
            .with_file_size(42)
            .validated()
            .unwrap();

        assert_eq!(record.file_size, Some(42));
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(FileRecord::new("Report.PDF", "h", None).file_extension(), "pdf");
        assert_eq!(FileRecord::new("archive.tar.gz", "h", None).file_extension(), "gz");
        assert_eq!(FileRecord::new("README", "h", None).file_extension(), "");
        assert_eq!(FileRecord::new(".bashrc", "h", None).file_extension(), "");
    }

    #[test]
    fn test_payload_file_accessor() {
        assert!(Payload::genesis().file().is_none());

        let payload = Payload::from(FileRecord::new("a.txt", "Qm123", None));
        assert_eq!(payload.file().unwrap().storage_hash, "Qm123");
    }
}
