// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted.
// While active it accumulates the undo log of its writes.
//
// ============================================================================

use super::Change;
use crate::core::{NestError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state following the State Pattern
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    /// Undo log, in write order
    changes: Vec<Change>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            changes: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Record a change in this transaction
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        if !self.state.is_active() {
            return Err(NestError::ExecutionError(format!(
                "Cannot record change: transaction {} is {}",
                self.id, self.state
            )));
        }

        self.changes.push(change);
        Ok(())
    }

    /// Mark transaction as committed and forget its undo log
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn commit(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(NestError::ExecutionError(format!(
                "Cannot commit: transaction {} is already {}",
                self.id, self.state
            )));
        }

        self.changes.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted and hand back the undo log, newest first
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn rollback(&mut self) -> Result<Vec<Change>> {
        if !self.state.is_active() {
            return Err(NestError::ExecutionError(format!(
                "Cannot rollback: transaction {} is already {}",
                self.id, self.state
            )));
        }

        let mut undo = std::mem::take(&mut self.changes);
        undo.reverse();
        self.state = TransactionState::Aborted;
        Ok(undo)
    }
}
