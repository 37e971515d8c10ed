// ============================================================================
// Reconciliation Core
// ============================================================================
//
// Pure diff of a batch against the current collection. Every entry is
// classified by identity and removal flag only:
//
//   no identity, not removed      -> create
//   known identity, not removed   -> update (changed fields only)
//   known identity, removed       -> delete
//   unknown identity              -> UnknownChildReference, whole batch rejected
//
// Children the batch does not mention stay untouched; deletion is explicit.
//
// ============================================================================

use super::plan::{PlannedCreate, PlannedDelete, PlannedUpdate, ReconciliationPlan};
use crate::batch::Batch;
use crate::config::ReconcileConfig;
use crate::core::{EntityId, NestError, Record, Result};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Diffs `batch` against `current` with default options.
pub fn reconcile(current: &[Record], batch: &Batch) -> Result<ReconciliationPlan> {
    reconcile_with(current, batch, &ReconcileConfig::new())
}

/// Diffs `batch` against `current`.
///
/// Honours `limit`, `allow_destroy` and `reject_if_all_blank` from the config.
/// Entry positions in the returned plan always refer to the batch as given.
pub fn reconcile_with(
    current: &[Record],
    batch: &Batch,
    config: &ReconcileConfig,
) -> Result<ReconciliationPlan> {
    if let Some(limit) = config.limit {
        if batch.len() > limit {
            return Err(NestError::TooManyRecords {
                limit,
                got: batch.len(),
            });
        }
    }

    let by_id: HashMap<EntityId, &Record> = current.iter().map(|record| (record.id, record)).collect();
    let mut seen: HashSet<EntityId> = HashSet::new();
    let mut plan = ReconciliationPlan::default();

    for (index, entry) in batch.iter().enumerate() {
        let Some(id) = entry.id else {
            if config.reject_if_all_blank && entry.is_all_blank() {
                plan.skipped.push(index);
                continue;
            }
            if entry.remove && config.allow_destroy {
                // Removing something that was never saved: nothing to do.
                plan.skipped.push(index);
                continue;
            }
            plan.creates.push(PlannedCreate {
                index,
                fields: entry.fields.clone(),
            });
            continue;
        };

        let Some(record) = by_id.get(&id) else {
            return Err(NestError::UnknownChildReference { id, index });
        };
        if !seen.insert(id) {
            return Err(NestError::DuplicateChildReference { id, index });
        }

        if entry.remove && config.allow_destroy {
            plan.deletes.push(PlannedDelete {
                index,
                current: (*record).clone(),
            });
        } else {
            plan.updates.push(PlannedUpdate {
                index,
                current: (*record).clone(),
                changes: record.diff(&entry.fields),
            });
        }
    }

    plan.untouched = current
        .iter()
        .map(|record| record.id)
        .filter(|id| !seen.contains(id))
        .collect();

    if !plan.skipped.is_empty() {
        debug!("skipped nested entries at {:?}", plan.skipped);
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::AttributeSet;
    use crate::core::{FieldMap, Value};
    use chrono::Utc;

    fn child(id: u64, name: &str) -> Record {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), Value::from(name));
        Record::new(EntityId(id), fields, Utc::now())
    }

    #[test]
    fn test_update_and_create() {
        let current = vec![child(1, "A")];
        let batch = Batch::new()
            .with(AttributeSet::for_id(1u64).field("name", "A2"))
            .with(AttributeSet::new().field("name", "B"));

        let plan = reconcile(&current, &batch).unwrap();

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].current.id, EntityId(1));
        assert_eq!(plan.updates[0].changes.get("name"), Some(&Value::from("A2")));
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].index, 1);
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.resulting_len(), 2);
    }

    #[test]
    fn test_delete_leaves_others_untouched() {
        let current = vec![child(1, "A"), child(2, "B")];
        let batch = Batch::new().with(AttributeSet::for_id(1u64).marked_for_removal());

        let plan = reconcile(&current, &batch).unwrap();

        assert_eq!(plan.deletes.len(), 1);
        assert_eq!(plan.deletes[0].current.id, EntityId(1));
        assert_eq!(plan.untouched, vec![EntityId(2)]);
        assert_eq!(plan.resulting_len(), 1);
    }

    #[test]
    fn test_unknown_reference_rejects_batch() {
        let current = vec![child(1, "A")];
        let batch = Batch::new()
            .with(AttributeSet::new().field("name", "ok"))
            .with(AttributeSet::for_id(999u64).field("name", "X"));

        let err = reconcile(&current, &batch).unwrap_err();
        assert!(matches!(
            err,
            NestError::UnknownChildReference { id: EntityId(999), index: 1 }
        ));
    }

    #[test]
    fn test_duplicate_reference_rejects_batch() {
        let current = vec![child(1, "A")];
        let batch = Batch::new()
            .with(AttributeSet::for_id(1u64).field("name", "x"))
            .with(AttributeSet::for_id(1u64).marked_for_removal());

        let err = reconcile(&current, &batch).unwrap_err();
        assert!(matches!(err, NestError::DuplicateChildReference { index: 1, .. }));
    }

    #[test]
    fn test_identical_values_are_noop_updates() {
        let current = vec![child(1, "A"), child(2, "B")];
        let batch = Batch::new()
            .with(AttributeSet::for_id(1u64).field("name", "A"))
            .with(AttributeSet::for_id(2u64).field("name", "B"));

        let plan = reconcile(&current, &batch).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.write_count(), 0);
        assert_eq!(plan.summary().unchanged, 2);
    }

    #[test]
    fn test_count_identity_holds() {
        let current: Vec<_> = (1..=5).map(|id| child(id, "c")).collect();
        let batch = Batch::new()
            .with(AttributeSet::for_id(2u64).marked_for_removal())
            .with(AttributeSet::for_id(3u64).field("name", "changed"))
            .with(AttributeSet::new().field("name", "n1"))
            .with(AttributeSet::for_id(5u64).marked_for_removal())
            .with(AttributeSet::new().field("name", "n2"));

        let plan = reconcile(&current, &batch).unwrap();
        assert_eq!(plan.updates.len() + plan.untouched.len(), current.len() - plan.deletes.len());
        assert_eq!(
            plan.resulting_len(),
            current.len() - plan.deletes.len() + plan.creates.len()
        );
    }

    #[test]
    fn test_creates_keep_batch_order() {
        let batch = Batch::new()
            .with(AttributeSet::new().field("name", "z"))
            .with(AttributeSet::new().field("name", "a"))
            .with(AttributeSet::new().field("name", "m"));

        let plan = reconcile(&[], &batch).unwrap();
        let names: Vec<_> = plan.creates.iter().map(|c| c.fields["name"].to_string()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_destroy_disabled_turns_removal_into_update() {
        let current = vec![child(1, "A")];
        let batch = Batch::new().with(AttributeSet::for_id(1u64).field("name", "B").marked_for_removal());
        let config = ReconcileConfig::new().allow_destroy(false);

        let plan = reconcile_with(&current, &batch, &config).unwrap();
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.updates.len(), 1);
    }

    #[test]
    fn test_blank_rows() {
        let batch = Batch::new()
            .with(AttributeSet::new().field("name", ""))
            .with(AttributeSet::new().field("name", "real"));

        // Without the option a blank row is still a create attempt
        let plan = reconcile(&[], &batch).unwrap();
        assert_eq!(plan.creates.len(), 2);

        let config = ReconcileConfig::new().reject_if_all_blank(true);
        let plan = reconcile_with(&[], &batch, &config).unwrap();
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].index, 1);
        assert_eq!(plan.skipped, vec![0]);
    }

    #[test]
    fn test_removed_new_entry_is_skipped() {
        let batch = Batch::new().with(AttributeSet::new().field("name", "x").marked_for_removal());
        let plan = reconcile(&[], &batch).unwrap();
        assert!(plan.creates.is_empty());
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.skipped, vec![0]);
    }

    #[test]
    fn test_limit() {
        let batch: Batch = (0..3).map(|_| AttributeSet::new().field("name", "x")).collect();
        let config = ReconcileConfig::new().limit(2);
        assert!(matches!(
            reconcile_with(&[], &batch, &config),
            Err(NestError::TooManyRecords { limit: 2, got: 3 })
        ));
    }
}
