use super::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar fields of a record or attribute set, keyed by field name.
pub type FieldMap = BTreeMap<String, Value>;

/// Stable identity of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Reads an identity out of a field value (`7`, `"7"`, `7.0`).
    pub fn from_value(value: &Value) -> Option<Self> {
        value
            .as_i64()
            .and_then(|raw| u64::try_from(raw).ok())
            .map(EntityId)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        EntityId(raw)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Integer(id.0 as i64)
    }
}

/// A stored row: identity, scalar fields and bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    pub fields: FieldMap,
    /// Bumped on every write; used for optimistic checks on parents.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: EntityId, fields: FieldMap, now: DateTime<Utc>) -> Self {
        Self {
            id,
            fields,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field lookup that treats a missing field as `NULL`.
    pub fn value(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&Value::Null)
    }

    /// Reads a reference column (foreign key) as an identity.
    pub fn reference(&self, field: &str) -> Option<EntityId> {
        self.fields.get(field).and_then(EntityId::from_value)
    }

    /// Returns the subset of `changes` that differs from the stored fields.
    pub fn diff(&self, changes: &FieldMap) -> FieldMap {
        changes
            .iter()
            .filter(|(name, value)| self.value(name) != *value)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Stored fields with `changes` laid over them.
    pub fn merged(&self, changes: &FieldMap) -> FieldMap {
        let mut fields = self.fields.clone();
        for (name, value) in changes {
            fields.insert(name.clone(), value.clone());
        }
        fields
    }
}
