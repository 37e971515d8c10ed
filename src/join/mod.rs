// ============================================================================
// Join Reconciler
// ============================================================================
//
// Many-to-many memberships reconciled through the same core as plain
// children. What the core does not know about lives here:
//
// - prepopulate: pair every candidate related record with its live join row,
//   or with a transient one, for building an edit form
// - toggles: the form's "keep" checkbox per candidate, turned into a regular
//   identity + removal-flag batch
// - plan checks: related reference present, existing and immutable, and at
//   most one live membership per related record
//
// ============================================================================

pub mod toggle;

use crate::association::Association;
use crate::core::{EntityId, EntityKey, FailureSet, FieldError, NestError, Record, Result};
use crate::reconcile::ReconciliationPlan;
use crate::storage::Store;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub use toggle::{MembershipToggle, ToggleBatch, build_batch};

/// Column names of a `Through` association.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JoinKeys<'a> {
    pub related_table: &'a str,
    pub related_key: &'a str,
}

impl<'a> JoinKeys<'a> {
    pub(crate) fn of(association: &'a Association) -> Result<Self> {
        match association {
            Association::Through {
                related_table,
                related_key,
                ..
            } => Ok(Self {
                related_table: related_table.as_str(),
                related_key: related_key.as_str(),
            }),
            Association::HasMany { name, .. } => Err(NestError::ExecutionError(format!(
                "Association '{}' is not a join association",
                name
            ))),
        }
    }
}

/// A join row, saved or not yet saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Membership {
    pub related_id: EntityId,
    /// The stored join row; `None` while the membership is transient.
    pub record: Option<Record>,
}

impl Membership {
    pub fn id(&self) -> Option<EntityId> {
        self.record.as_ref().map(|record| record.id)
    }

    pub fn is_persisted(&self) -> bool {
        self.record.is_some()
    }
}

/// One candidate related record and its membership, as an edit form shows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pairing {
    pub related: Record,
    pub membership: Membership,
}

/// Pairs every candidate with its live join row, or with a transient one.
///
/// The result has exactly one pairing per candidate, in candidate order.
/// A candidate listed twice is a caller error.
pub fn prepopulate(
    association: &Association,
    candidates: &[Record],
    current: &[Record],
) -> Result<Vec<Pairing>> {
    let keys = JoinKeys::of(association)?;
    let live = live_by_related(keys, current);

    let mut seen = HashSet::new();
    let mut pairings = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !seen.insert(candidate.id) {
            return Err(NestError::DuplicateCandidate(candidate.id));
        }
        pairings.push(Pairing {
            related: candidate.clone(),
            membership: Membership {
                related_id: candidate.id,
                record: live.get(&candidate.id).map(|record| (*record).clone()),
            },
        });
    }
    Ok(pairings)
}

/// Live join rows keyed by the related record they point at.
pub(crate) fn live_by_related<'r>(keys: JoinKeys<'_>, current: &'r [Record]) -> HashMap<EntityId, &'r Record> {
    current
        .iter()
        .filter_map(|record| record.reference(keys.related_key).map(|related| (related, record)))
        .collect()
}

/// Membership-specific checks of a plan against the current join rows.
///
/// Field problems are added to `failures`; a second live membership for the
/// same related record aborts with `DuplicateMembership`.
pub async fn check_plan(
    store: &dyn Store,
    association: &Association,
    current: &[Record],
    plan: &ReconciliationPlan,
    failures: &mut FailureSet,
) -> Result<()> {
    let keys = JoinKeys::of(association)?;

    let mut live: HashSet<EntityId> = live_by_related(keys, current)
        .into_iter()
        .filter(|(_, record)| !plan.is_deleted(record.id))
        .map(|(related, _)| related)
        .collect();

    for update in &plan.updates {
        if update.changes.contains_key(keys.related_key) {
            failures.add(
                EntityKey::Child(update.index),
                FieldError::on(keys.related_key, "can't be changed"),
            );
        }
    }

    for create in &plan.creates {
        let key = EntityKey::Child(create.index);
        let Some(related_id) = create.fields.get(keys.related_key).and_then(EntityId::from_value) else {
            failures.add(key, FieldError::on(keys.related_key, "must be given"));
            continue;
        };

        if !live.insert(related_id) {
            return Err(NestError::DuplicateMembership {
                related_id,
                index: create.index,
            });
        }

        if store.get(keys.related_table, related_id).await?.is_none() {
            failures.add(key, FieldError::on(keys.related_key, "must exist"));
        }
    }

    Ok(())
}
