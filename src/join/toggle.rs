use super::{JoinKeys, live_by_related};
use crate::association::Association;
use crate::batch::{AttributeSet, Batch, FieldAllowList};
use crate::core::{EntityId, EntityKey, FailureSet, FieldMap, NestError, Record, Result, Value};

/// The form's answer for one candidate: keep a membership with it, or not.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipToggle {
    pub related_id: EntityId,
    pub keep: bool,
    /// Extra join-row fields, e.g. a role
    pub fields: FieldMap,
}

impl MembershipToggle {
    pub fn keep(related_id: impl Into<EntityId>) -> Self {
        Self {
            related_id: related_id.into(),
            keep: true,
            fields: FieldMap::new(),
        }
    }

    pub fn remove(related_id: impl Into<EntityId>) -> Self {
        Self {
            related_id: related_id.into(),
            keep: false,
            fields: FieldMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Reads a toggle from one raw form row.
    ///
    /// `related_key` must hold the related identity; a missing or unchecked
    /// `keep_field` means "remove". Other fields go through `allow`.
    pub fn from_fields(
        raw: &FieldMap,
        related_key: &str,
        keep_field: &str,
        allow: &FieldAllowList,
    ) -> Result<Self> {
        let related_id = raw
            .get(related_key)
            .and_then(EntityId::from_value)
            .ok_or_else(|| NestError::Decode(format!("membership row needs a valid '{}'", related_key)))?;
        let keep = raw.get(keep_field).is_some_and(Value::is_truthy);
        let fields = raw
            .iter()
            .filter(|(name, _)| name.as_str() != related_key && allow.is_permitted(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(Self {
            related_id,
            keep,
            fields,
        })
    }
}

/// A membership batch plus the toggle each batch entry came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleBatch {
    pub batch: Batch,
    /// `origin[i]` is the toggle position of batch entry `i`
    pub origin: Vec<usize>,
}

impl ToggleBatch {
    /// Re-keys child failures from batch positions to toggle positions.
    pub fn remap_failures(&self, failures: FailureSet) -> FailureSet {
        let mut remapped = FailureSet::new();
        for (key, errors) in failures.iter() {
            let key = match *key {
                EntityKey::Child(index) => {
                    EntityKey::Child(self.origin.get(index).copied().unwrap_or(index))
                }
                EntityKey::Parent => EntityKey::Parent,
            };
            remapped.extend(key, errors.iter().cloned());
        }
        remapped
    }

    /// Same remapping for errors that carry a batch position.
    pub fn remap_error(&self, err: NestError) -> NestError {
        let origin = |index: usize| self.origin.get(index).copied().unwrap_or(index);
        match err {
            NestError::Validation(failures) => NestError::Validation(self.remap_failures(failures)),
            NestError::DuplicateMembership { related_id, index } => NestError::DuplicateMembership {
                related_id,
                index: origin(index),
            },
            NestError::UnknownChildReference { id, index } => NestError::UnknownChildReference {
                id,
                index: origin(index),
            },
            NestError::DuplicateChildReference { id, index } => NestError::DuplicateChildReference {
                id,
                index: origin(index),
            },
            other => other,
        }
    }
}

/// Turns checkbox toggles into an identity + removal-flag batch.
///
/// | membership | toggle | batch entry              |
/// |------------|--------|--------------------------|
/// | persisted  | keep   | update (no-op unless extra fields changed) |
/// | persisted  | remove | delete                   |
/// | transient  | keep   | create                   |
/// | transient  | remove | none, discarded          |
pub fn build_batch(
    association: &Association,
    toggles: &[MembershipToggle],
    current: &[Record],
) -> Result<ToggleBatch> {
    let keys = JoinKeys::of(association)?;
    let live = live_by_related(keys, current);

    let mut batch = Batch::new();
    let mut origin = Vec::new();
    for (position, toggle) in toggles.iter().enumerate() {
        let entry = match (live.get(&toggle.related_id), toggle.keep) {
            (Some(row), true) => {
                let mut entry = AttributeSet::for_id(row.id);
                entry.fields = toggle.fields.clone();
                entry
            }
            (Some(row), false) => AttributeSet::for_id(row.id).marked_for_removal(),
            (None, true) => {
                let mut entry = AttributeSet::new();
                entry.fields = toggle.fields.clone();
                entry
                    .fields
                    .insert(keys.related_key.to_string(), Value::from(toggle.related_id));
                entry
            }
            (None, false) => continue,
        };
        batch.push(entry);
        origin.push(position);
    }

    Ok(ToggleBatch { batch, origin })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldError;
    use chrono::Utc;

    fn association() -> Association {
        Association::through("members", "memberships", "team_id", "people", "person_id")
    }

    fn membership(id: u64, person_id: u64) -> Record {
        let mut fields = FieldMap::new();
        fields.insert("team_id".into(), Value::Integer(1));
        fields.insert("person_id".into(), Value::Integer(person_id as i64));
        Record::new(EntityId(id), fields, Utc::now())
    }

    #[test]
    fn test_keep_inversion() {
        let current = vec![membership(20, 2), membership(30, 4)];
        let toggles = vec![
            MembershipToggle::keep(1u64),
            MembershipToggle::remove(2u64),
            MembershipToggle::remove(3u64),
            MembershipToggle::keep(4u64),
        ];

        let built = build_batch(&association(), &toggles, &current).unwrap();
        let entries = built.batch.entries();

        assert_eq!(entries.len(), 3);
        assert_eq!(built.origin, vec![0, 1, 3]);

        assert_eq!(entries[0].id, None);
        assert_eq!(entries[0].fields.get("person_id"), Some(&Value::Integer(1)));
        assert!(!entries[0].remove);

        assert_eq!(entries[1].id, Some(EntityId(20)));
        assert!(entries[1].remove);

        assert_eq!(entries[2].id, Some(EntityId(30)));
        assert!(!entries[2].remove);
        assert!(entries[2].fields.is_empty());
    }

    #[test]
    fn test_from_fields() {
        let allow = FieldAllowList::new(["role"]);
        let mut raw = FieldMap::new();
        raw.insert("person_id".into(), Value::from("5"));
        raw.insert("keep".into(), Value::from("1"));
        raw.insert("role".into(), Value::from("lead"));
        raw.insert("admin".into(), Value::from(true));

        let toggle = MembershipToggle::from_fields(&raw, "person_id", "keep", &allow).unwrap();
        assert_eq!(toggle.related_id, EntityId(5));
        assert!(toggle.keep);
        assert_eq!(toggle.fields.len(), 1);

        raw.remove("keep");
        let toggle = MembershipToggle::from_fields(&raw, "person_id", "keep", &allow).unwrap();
        assert!(!toggle.keep);

        raw.remove("person_id");
        assert!(MembershipToggle::from_fields(&raw, "person_id", "keep", &allow).is_err());
    }

    #[test]
    fn test_remap_failures_to_toggle_positions() {
        let built = ToggleBatch {
            batch: Batch::new(),
            origin: vec![0, 2, 5],
        };
        let mut failures = FailureSet::new();
        failures.add(EntityKey::Child(2), FieldError::on("role", "is invalid"));
        failures.add(EntityKey::Parent, FieldError::on("name", "can't be blank"));

        let remapped = built.remap_failures(failures);
        assert!(remapped.get(EntityKey::Child(5)).is_some());
        assert!(remapped.get(EntityKey::Child(2)).is_none());
        assert!(remapped.get(EntityKey::Parent).is_some());
    }
}
