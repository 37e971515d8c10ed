// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transactions over the in-memory store are undo logs: writes go straight to
// the tables, and every write records a Change that can reverse it.
//
// Design Patterns Used:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: Reversible operations for rollback
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};
