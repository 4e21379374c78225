// Ledger module
//
// This module contains the file-upload ledger including:
// - File record payloads
// - Block structure
// - Proof of work search
// - Chain validation
// - The ledger itself and its sled storage

pub mod block;
pub mod chain;
pub mod mining;
pub mod record;
pub mod storage;
pub mod validation;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Ledger, LedgerError};
pub use mining::{CancelFlag, MiningBudget};
pub use record::{FileRecord, Payload};
pub use validation::{Invariant, ValidationReport, Violation};
