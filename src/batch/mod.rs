// ============================================================================
// Batches of Nested Attributes
// ============================================================================
//
// A Batch is the typed form of a nested-attributes submission: an ordered list
// of AttributeSets, each carrying an optional identity, scalar fields and a
// removal flag. Raw field maps only become AttributeSets by passing through a
// FieldAllowList, so nothing downstream ever sees an unpermitted field.
//
// ============================================================================

pub mod decode;

use crate::config::ReconcileConfig;
use crate::core::{EntityId, FieldMap, NestError, Result, Value};
use log::debug;
use std::collections::BTreeSet;

pub use decode::{decode_form_pairs, decode_json};

/// One incoming instruction for one child.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    pub id: Option<EntityId>,
    pub fields: FieldMap,
    pub remove: bool,
}

impl AttributeSet {
    /// An entry without identity: creates a child.
    pub fn new() -> Self {
        Self::default()
    }

    /// An entry targeting an existing child.
    pub fn for_id(id: impl Into<EntityId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn marked_for_removal(mut self) -> Self {
        self.remove = true;
        self
    }

    /// No identity, no removal and nothing but blank values.
    pub fn is_all_blank(&self) -> bool {
        self.id.is_none() && !self.remove && self.fields.values().all(Value::is_blank)
    }
}

/// Ordered attribute sets of one nested submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    entries: Vec<AttributeSet>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: AttributeSet) {
        self.entries.push(entry);
    }

    pub fn with(mut self, entry: AttributeSet) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AttributeSet] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeSet> {
        self.entries.iter()
    }
}

impl FromIterator<AttributeSet> for Batch {
    fn from_iter<I: IntoIterator<Item = AttributeSet>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Batch {
    type Item = AttributeSet;
    type IntoIter = std::vec::IntoIter<AttributeSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// The explicit permit step between raw request data and a Batch.
///
/// Identity and removal flag are read from their configured field names;
/// every other field must be listed as permitted or it is dropped.
#[derive(Debug, Clone)]
pub struct FieldAllowList {
    permitted: BTreeSet<String>,
    id_field: String,
    destroy_field: String,
}

impl FieldAllowList {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permitted: fields.into_iter().map(Into::into).collect(),
            id_field: "id".to_string(),
            destroy_field: "_destroy".to_string(),
        }
    }

    /// Takes the identity and removal field names from the config.
    pub fn with_config(mut self, config: &ReconcileConfig) -> Self {
        self.id_field = config.id_field.clone();
        self.destroy_field = config.destroy_field.clone();
        self
    }

    pub fn is_permitted(&self, field: &str) -> bool {
        self.permitted.contains(field)
    }

    pub fn permit(&self, raw: &FieldMap) -> Result<AttributeSet> {
        let mut entry = AttributeSet::new();

        for (name, value) in raw {
            if *name == self.id_field {
                if value.is_blank() {
                    continue;
                }
                let id = EntityId::from_value(value).ok_or_else(|| {
                    NestError::Decode(format!(
                        "'{}' is not a valid identity: {}",
                        self.id_field, value
                    ))
                })?;
                entry.id = Some(id);
            } else if *name == self.destroy_field {
                entry.remove = value.is_truthy();
            } else if self.is_permitted(name) {
                entry.fields.insert(name.clone(), value.clone());
            } else {
                debug!("unpermitted nested attribute '{}' dropped", name);
            }
        }

        Ok(entry)
    }

    pub fn permit_all<'a, I>(&self, raws: I) -> Result<Batch>
    where
        I: IntoIterator<Item = &'a FieldMap>,
    {
        raws.into_iter().map(|raw| self.permit(raw)).collect()
    }
}
