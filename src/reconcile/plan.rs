use crate::core::{EntityId, FieldMap, Record};
use serde::Serialize;

/// A child to insert, in batch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedCreate {
    /// Position of the originating entry in the submitted batch
    pub index: usize,
    pub fields: FieldMap,
}

/// An existing child and the fields that actually change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedUpdate {
    pub index: usize,
    pub current: Record,
    /// Only values that differ from `current`
    pub changes: FieldMap,
}

impl PlannedUpdate {
    /// Matched, but nothing to write.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedDelete {
    pub index: usize,
    pub current: Record,
}

/// The diff between a current collection and a batch, before anything is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationPlan {
    pub creates: Vec<PlannedCreate>,
    pub updates: Vec<PlannedUpdate>,
    pub deletes: Vec<PlannedDelete>,
    /// Current children no batch entry mentions, in collection order
    pub untouched: Vec<EntityId>,
    /// Batch positions dropped before planning (blank rows, discarded toggles)
    pub skipped: Vec<usize>,
}

impl ReconciliationPlan {
    /// True when applying the plan would not write any child.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.deletes.is_empty()
            && self.updates.iter().all(PlannedUpdate::is_noop)
    }

    /// Storage writes the plan needs; no-op updates are not counted.
    pub fn write_count(&self) -> usize {
        self.creates.len()
            + self.deletes.len()
            + self.updates.iter().filter(|update| !update.is_noop()).count()
    }

    /// Size of the collection once the plan is applied.
    pub fn resulting_len(&self) -> usize {
        self.updates.len() + self.untouched.len() + self.creates.len()
    }

    pub fn is_deleted(&self, id: EntityId) -> bool {
        self.deletes.iter().any(|delete| delete.current.id == id)
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            creates: self.creates.len(),
            updates: self.updates.iter().filter(|update| !update.is_noop()).count(),
            unchanged: self.updates.iter().filter(|update| update.is_noop()).count(),
            deletes: self.deletes.len(),
            untouched: self.untouched.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub creates: usize,
    pub updates: usize,
    pub unchanged: usize,
    pub deletes: usize,
    pub untouched: usize,
}
