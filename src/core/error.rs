use super::EntityId;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NestError {
    #[error("Batch entry {index} references {id}, which is not in the current collection")]
    UnknownChildReference { id: EntityId, index: usize },

    #[error("Batch entry {index} references {id} a second time")]
    DuplicateChildReference { id: EntityId, index: usize },

    #[error("Related entity {related_id} already has a live membership (batch entry {index})")]
    DuplicateMembership { related_id: EntityId, index: usize },

    #[error("Related entity {0} appears more than once in the candidate list")]
    DuplicateCandidate(EntityId),

    #[error("Validation failed: {0}")]
    Validation(FailureSet),

    #[error("Batch has {got} entries, limit is {limit}")]
    TooManyRecords { limit: usize, got: usize },

    #[error("Parent is stale: expected version {expected}, found {actual}")]
    StaleParent { expected: i64, actual: i64 },

    #[error("Parent {id} not found in table '{table}'")]
    ParentNotFound { table: String, id: EntityId },

    #[error("Association '{0}' is not registered")]
    UnknownAssociation(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Record {id} not found in table '{table}'")]
    RecordNotFound { table: String, id: EntityId },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

pub type Result<T> = std::result::Result<T, NestError>;

impl From<serde_json::Error> for NestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Which entity of a nested save produced a failure.
///
/// Serializes as its display form so it can key a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    Parent,
    /// Position of the offending entry in the submitted batch.
    Child(usize),
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Parent => write!(f, "parent"),
            EntityKey::Child(index) => write!(f, "children[{}]", index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// `None` for errors that concern the entity as a whole.
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn on(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn base(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} {}", field, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Validation failures of one save, grouped by the entity that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FailureSet {
    entries: BTreeMap<EntityKey, Vec<FieldError>>,
}

impl FailureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: EntityKey, error: FieldError) {
        self.entries.entry(key).or_default().push(error);
    }

    pub fn extend(&mut self, key: EntityKey, errors: impl IntoIterator<Item = FieldError>) {
        for error in errors {
            self.add(key, error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entities with at least one failure.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: EntityKey) -> Option<&[FieldError]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &Vec<FieldError>)> {
        self.entries.iter()
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(NestError::Validation(self))
        }
    }
}

impl fmt::Display for FailureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, errors) in &self.entries {
            for error in errors {
                if !first {
                    write!(f, "; ")?;
                }
                first = false;
                write!(f, "{}: {}", key, error)?;
            }
        }
        Ok(())
    }
}
