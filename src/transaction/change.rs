// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change is the undo record of one write made inside a transaction.
// Rolling back replays the recorded changes in reverse, restoring the images
// captured before each write.
//
// ============================================================================

use crate::core::{EntityId, Record};

/// A single reversible write.
#[derive(Debug, Clone)]
pub enum Change {
    /// A record was inserted; undo removes it.
    Insert { table: String, id: EntityId },

    /// A record was overwritten; undo restores `before`.
    Update { table: String, before: Record },

    /// A record was removed; undo reinstates `before`.
    Delete { table: String, before: Record },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::Insert { table, .. } => table,
            Change::Update { table, .. } => table,
            Change::Delete { table, .. } => table,
        }
    }

    pub fn record_id(&self) -> EntityId {
        match self {
            Change::Insert { id, .. } => *id,
            Change::Update { before, .. } | Change::Delete { before, .. } => before.id,
        }
    }
}
