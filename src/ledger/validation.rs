use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::{Block, GENESIS_PREVIOUS_HASH};
use super::mining::meets_difficulty;

/// A chain rule a block can break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Invariant {
    /// The genesis block has index 0 and the sentinel previous hash
    Genesis,

    /// The previous hash equals the hash of the block before
    Linkage,

    /// The stored hash equals a fresh calculation
    HashIntegrity,

    /// The hash carries the required leading zeros
    ProofOfWork,

    /// The block index equals its position
    IndexSequence,

    /// The stored bytes decode into a block
    Unreadable,
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invariant::Genesis => write!(f, "genesis block is malformed"),
            Invariant::Linkage => write!(f, "previous hash does not match the previous block"),
            Invariant::HashIntegrity => write!(f, "stored hash does not match the calculated hash"),
            Invariant::ProofOfWork => write!(f, "hash does not meet the difficulty"),
            Invariant::IndexSequence => write!(f, "index does not match the chain position"),
            Invariant::Unreadable => write!(f, "stored block cannot be decoded"),
        }
    }
}

/// The position and rule of a broken invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Violation {
    pub index: u64,
    pub invariant: Invariant,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}: {}", self.index, self.invariant)
    }
}

/// Outcome of checking one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BlockReport {
    pub index: u64,
    pub issues: Vec<Invariant>,
}

impl BlockReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Outcome of checking a whole chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationReport {
    /// Difficulty the chain was checked against
    pub difficulty: u8,

    /// First broken invariant, scanning from genesis to tail
    pub first_violation: Option<Violation>,

    /// Per-block results, in chain order
    pub blocks: Vec<BlockReport>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.first_violation.is_none()
    }

    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn invalid_blocks(&self) -> usize {
        self.blocks.iter().filter(|report| !report.is_valid()).count()
    }
}

/// Lists the invariants a block breaks, in checking order
///
/// The position check comes first, then the link to the predecessor, then
/// the hash, then the proof of work.
fn check_block(position: usize, block: &Block, previous: Option<&Block>, difficulty: u8) -> Vec<Invariant> {
    let mut issues = Vec::new();

    if block.index != position as u64 {
        issues.push(Invariant::IndexSequence);
    }

    match previous {
        None => {
            if block.index != 0 || block.previous_hash != GENESIS_PREVIOUS_HASH {
                issues.push(Invariant::Genesis);
            }
        }
        Some(previous) => {
            if block.previous_hash != previous.hash {
                issues.push(Invariant::Linkage);
            }
        }
    }

    if !block.has_valid_hash() {
        issues.push(Invariant::HashIntegrity);
    }

    if !meets_difficulty(&block.hash, difficulty) {
        issues.push(Invariant::ProofOfWork);
    }

    issues
}

/// Checks every block of a chain once, from genesis to tail
///
/// An empty chain is reported as a missing genesis block.
pub fn validate_blocks(blocks: &[Block], difficulty: u8) -> ValidationReport {
    let mut reports = Vec::with_capacity(blocks.len());
    let mut first_violation = None;

    if blocks.is_empty() {
        first_violation = Some(Violation {
            index: 0,
            invariant: Invariant::Genesis,
        });
    }

    for (position, block) in blocks.iter().enumerate() {
        let previous = position.checked_sub(1).map(|p| &blocks[p]);
        let issues = check_block(position, block, previous, difficulty);

        if first_violation.is_none() {
            if let Some(invariant) = issues.first() {
                first_violation = Some(Violation {
                    index: position as u64,
                    invariant: *invariant,
                });
            }
        }

        reports.push(BlockReport {
            index: position as u64,
            issues,
        });
    }

    ValidationReport {
        difficulty,
        first_violation,
        blocks: reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mining::{mine, MiningBudget};
    use crate::ledger::record::FileRecord;

    const DIFFICULTY: u8 = 1;

    fn build_chain(len: usize) -> Vec<Block> {
        let budget = MiningBudget::unbounded();
        let mut blocks = vec![mine(Block::genesis(), DIFFICULTY, &budget).unwrap()];

        for i in 1..len {
            let tail = blocks.last().unwrap();
            let record = FileRecord::new(format!("file{}.txt", i), format!("Qm{}", i), None);
            let block = Block::new(tail.index + 1, record.into(), tail.hash.clone());
            blocks.push(mine(block, DIFFICULTY, &budget).unwrap());
        }

        blocks
    }

    #[test]
    fn test_valid_chain() {
        let report = validate_blocks(&build_chain(4), DIFFICULTY);

        assert!(report.is_valid());
        assert_eq!(report.total_blocks(), 4);
        assert_eq!(report.invalid_blocks(), 0);
    }

    #[test]
    fn test_empty_chain_is_invalid() {
        let report = validate_blocks(&[], DIFFICULTY);

        assert_eq!(
            report.first_violation,
            Some(Violation { index: 0, invariant: Invariant::Genesis })
        );
    }

    #[test]
    fn test_broken_link_reported_at_its_index() {
        let mut blocks = build_chain(4);
        blocks[2].previous_hash = "f".repeat(64);

        let report = validate_blocks(&blocks, DIFFICULTY);
        assert_eq!(
            report.first_violation,
            Some(Violation { index: 2, invariant: Invariant::Linkage })
        );
        assert!(report.blocks[2].issues.contains(&Invariant::HashIntegrity));
        assert!(report.blocks[3].is_valid());
    }

    #[test]
    fn test_reordered_blocks() {
        let mut blocks = build_chain(4);
        blocks.swap(2, 3);

        let report = validate_blocks(&blocks, DIFFICULTY);
        assert_eq!(
            report.first_violation,
            Some(Violation { index: 2, invariant: Invariant::IndexSequence })
        );
    }

    #[test]
    fn test_bad_genesis() {
        let mut blocks = build_chain(1);
        blocks[0].previous_hash = "1".repeat(64);

        let report = validate_blocks(&blocks, DIFFICULTY);
        assert_eq!(
            report.first_violation,
            Some(Violation { index: 0, invariant: Invariant::Genesis })
        );
    }

    #[test]
    fn test_insufficient_work_detected() {
        let blocks = build_chain(2);

        // Mined at difficulty 1, these blocks are unlikely to carry 8 zeros
        let report = validate_blocks(&blocks, 8);
        assert_eq!(
            report.first_violation,
            Some(Violation { index: 0, invariant: Invariant::ProofOfWork })
        );
    }
}
