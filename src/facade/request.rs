use crate::batch::Batch;
use crate::core::{EntityId, FieldMap, Record, Value};
use crate::join::MembershipToggle;
use serde::Serialize;

/// What the submission says about the associated collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested {
    /// Identity + removal-flag entries, for any association
    Batch(Batch),
    /// One keep/remove answer per candidate, for join associations
    Toggles(Vec<MembershipToggle>),
}

impl Default for Nested {
    fn default() -> Self {
        Nested::Batch(Batch::new())
    }
}

impl Nested {
    pub fn len(&self) -> usize {
        match self {
            Nested::Batch(batch) => batch.len(),
            Nested::Toggles(toggles) => toggles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One nested save: parent field changes plus the nested submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub parent_table: String,
    pub parent_id: EntityId,
    pub association: String,
    pub parent_changes: FieldMap,
    pub nested: Nested,
    /// Reject the save when the parent's version moved on
    pub expected_version: Option<i64>,
}

impl SaveRequest {
    pub fn new(parent_table: &str, parent_id: impl Into<EntityId>, association: &str) -> Self {
        Self {
            parent_table: parent_table.to_string(),
            parent_id: parent_id.into(),
            association: association.to_string(),
            parent_changes: FieldMap::new(),
            nested: Nested::default(),
            expected_version: None,
        }
    }

    pub fn parent_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parent_changes.insert(name.into(), value.into());
        self
    }

    pub fn batch(mut self, batch: Batch) -> Self {
        self.nested = Nested::Batch(batch);
        self
    }

    pub fn toggles(mut self, toggles: Vec<MembershipToggle>) -> Self {
        self.nested = Nested::Toggles(toggles);
        self
    }

    pub fn expected_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// A parent with its current associated collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentGraph {
    pub parent: Record,
    pub children: Vec<Record>,
}
