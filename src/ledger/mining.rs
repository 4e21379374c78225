use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::block::Block;

/// Largest difficulty a SHA-256 hex digest can satisfy
pub const MAX_DIFFICULTY: u8 = 64;

/// How many attempts pass between deadline and cancel checks
const CHECK_INTERVAL: u64 = 1024;

/// Whether a hex hash starts with `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: u8) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Why a mining run stopped without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The attempt limit was reached
    AttemptsExhausted,

    /// The deadline passed
    DeadlineExceeded,

    /// The cancel flag was raised
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::AttemptsExhausted => write!(f, "attempt limit reached"),
            StopReason::DeadlineExceeded => write!(f, "deadline exceeded"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A mining run that stopped before finding a valid hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningStopped {
    pub attempts: u64,
    pub reason: StopReason,
}

/// Shared flag used to stop a mining run from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits on a single mining run
///
/// An empty budget never stops the search. The HTTP layer always sets a
/// deadline.
#[derive(Debug, Clone, Default)]
pub struct MiningBudget {
    max_attempts: Option<u64>,
    deadline: Option<Instant>,
    cancel: Option<CancelFlag>,
}

impl MiningBudget {
    /// A budget with no limits
    pub fn unbounded() -> Self {
        MiningBudget::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Checks the budget after `attempts` hashes have been tried
    fn check(&self, attempts: u64) -> Result<(), StopReason> {
        if let Some(max_attempts) = self.max_attempts {
            if attempts >= max_attempts {
                return Err(StopReason::AttemptsExhausted);
            }
        }

        if attempts % CHECK_INTERVAL != 0 {
            return Ok(());
        }

        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                return Err(StopReason::Cancelled);
            }
        }

        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StopReason::DeadlineExceeded);
            }
        }

        Ok(())
    }
}

/// Performs proof of work on a block
///
/// Counts the nonce up from zero until the block hash starts with
/// `difficulty` zero characters.
///
/// # Arguments
///
/// * `block` - The unmined block
/// * `difficulty` - Number of leading zero hex characters required
/// * `budget` - Limits on the search
///
/// # Returns
///
/// The sealed block, or how far the search got before the budget ran out
pub fn mine(mut block: Block, difficulty: u8, budget: &MiningBudget) -> Result<Block, MiningStopped> {
    let started = Instant::now();
    let mut attempts: u64 = 0;
    block.nonce = 0;

    debug!("Mining block {} at difficulty {}", block.index, difficulty);

    loop {
        if let Err(reason) = budget.check(attempts) {
            info!(
                "Mining of block {} stopped after {} attempts: {}",
                block.index, attempts, reason
            );
            return Err(MiningStopped { attempts, reason });
        }

        let hash = block.calculate_hash();
        attempts += 1;

        if meets_difficulty(&hash, difficulty) {
            block.hash = hash;
            info!(
                "Mined block {} with nonce {} after {} attempts in {:?}",
                block.index,
                block.nonce,
                attempts,
                started.elapsed()
            );
            return Ok(block);
        }

        match block.nonce.checked_add(1) {
            Some(nonce) => block.nonce = nonce,
            None => {
                return Err(MiningStopped {
                    attempts,
                    reason: StopReason::AttemptsExhausted,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::record::FileRecord;

    fn candidate() -> Block {
        let record = FileRecord::new("a.txt", "Qm123", None);
        Block::new(1, record.into(), "previous_hash".to_string())
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(meets_difficulty("00ab", 0));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(!meets_difficulty("00", 3));
    }

    #[test]
    fn test_mine_finds_valid_hash() {
        let block = mine(candidate(), 2, &MiningBudget::unbounded()).unwrap();

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_mine_at_zero_difficulty_keeps_first_nonce() {
        let block = mine(candidate(), 0, &MiningBudget::unbounded()).unwrap();

        assert_eq!(block.nonce, 0);
        assert!(block.has_valid_hash());
    }

    #[test]
    fn test_mine_stops_at_attempt_limit() {
        let budget = MiningBudget::unbounded().with_max_attempts(10);
        let stopped = mine(candidate(), MAX_DIFFICULTY, &budget).unwrap_err();

        assert_eq!(stopped.attempts, 10);
        assert_eq!(stopped.reason, StopReason::AttemptsExhausted);
    }

    #[test]
    fn test_mine_stops_when_cancelled() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let budget = MiningBudget::unbounded().with_cancel_flag(cancel);

        let stopped = mine(candidate(), MAX_DIFFICULTY, &budget).unwrap_err();
        assert_eq!(stopped.attempts, 0);
        assert_eq!(stopped.reason, StopReason::Cancelled);
    }

    #[test]
    fn test_mine_stops_at_deadline() {
        let budget = MiningBudget::unbounded().with_deadline(Instant::now());
        let stopped = mine(candidate(), MAX_DIFFICULTY, &budget).unwrap_err();

        assert_eq!(stopped.reason, StopReason::DeadlineExceeded);
    }
}
