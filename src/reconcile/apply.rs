// ============================================================================
// Atomic Plan Application
// ============================================================================
//
// Applies a ReconciliationPlan together with the parent's own field changes in
// a single store transaction:
//
//   1. validate the parent and every created/updated child, collecting all
//      failures keyed by entity
//   2. write parent, deletes, updates, creates (creates in batch order)
//   3. commit, or roll back everything on the first failure
//
// The open transaction lives in an AtomicScope. If the save future is dropped
// before the scope finishes, the scope rolls the transaction back on a spawned
// task that keeps the parent lease until the rollback is done.
//
// Constraint violations raised by the store while writing a child are reported
// as validation failures of that child.
//
// ============================================================================

use super::plan::{PlanSummary, ReconciliationPlan};
use crate::association::Association;
use crate::core::{EntityId, EntityKey, FailureSet, FieldError, FieldMap, NestError, Record, Result, Value};
use crate::join;
use crate::locks::ParentLease;
use crate::schema::SchemaRegistry;
use crate::storage::Store;
use crate::transaction::TransactionId;
use log::warn;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{Level, event};

/// Everything `apply` needs besides the plan.
pub struct ApplyContext<'a> {
    pub store: Arc<dyn Store>,
    /// Released once the transaction is committed or rolled back
    pub lease: Option<ParentLease>,
    pub schemas: &'a SchemaRegistry,
    pub parent_table: &'a str,
    pub parent: &'a Record,
    /// Scalar changes to the parent saved in the same transaction
    pub parent_changes: &'a FieldMap,
    pub association: &'a Association,
    /// The collection the plan was computed against
    pub current: &'a [Record],
}

/// The refreshed parent and collection after a successful apply.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ApplyOutcome {
    pub parent: Record,
    pub children: Vec<Record>,
    pub summary: PlanSummary,
}

/// Applies `plan` atomically. On any failure the store is left as it was.
pub async fn apply(mut ctx: ApplyContext<'_>, plan: &ReconciliationPlan) -> Result<ApplyOutcome> {
    let parent_diff = ctx.parent.diff(ctx.parent_changes);
    let summary = plan.summary();

    event!(
        Level::DEBUG,
        creates = summary.creates,
        updates = summary.updates,
        deletes = summary.deletes,
        parent_fields = parent_diff.len(),
        "applying reconciliation plan"
    );

    let scope = AtomicScope::begin(Arc::clone(&ctx.store), ctx.lease.take()).await?;
    let operation_result = write_all(&ctx, plan, &parent_diff, scope.txn).await;
    scope.finish(operation_result).await?;

    let parent = ctx
        .store
        .get(ctx.parent_table, ctx.parent.id)
        .await?
        .ok_or_else(|| NestError::ParentNotFound {
            table: ctx.parent_table.to_string(),
            id: ctx.parent.id,
        })?;
    let children = load_collection(&*ctx.store, ctx.association, ctx.parent.id).await?;

    Ok(ApplyOutcome {
        parent,
        children,
        summary,
    })
}

/// Current collection of `parent_id` for `association`, in insertion order.
pub async fn load_collection(
    store: &dyn Store,
    association: &Association,
    parent_id: EntityId,
) -> Result<Vec<Record>> {
    store
        .find_by(
            association.target_table(),
            association.owner_key(),
            &Value::from(parent_id),
        )
        .await
}

async fn write_all(
    ctx: &ApplyContext<'_>,
    plan: &ReconciliationPlan,
    parent_diff: &FieldMap,
    txn: TransactionId,
) -> Result<()> {
    let target = ctx.association.target_table();
    let owner_key = ctx.association.owner_key();
    let owner = Value::from(ctx.parent.id);

    let failures = validate(ctx, plan).await?;
    failures.into_result()?;

    if !parent_diff.is_empty() || !plan.is_empty() {
        // Always touched so concurrent savers see a new parent version.
        ctx.store
            .update(txn, ctx.parent_table, ctx.parent.id, parent_diff.clone())
            .await
            .map_err(|err| as_failure(EntityKey::Parent, err))?;
    }

    for delete in &plan.deletes {
        ctx.store
            .delete(txn, target, delete.current.id)
            .await
            .map_err(|err| as_failure(EntityKey::Child(delete.index), err))?;
    }

    for update in plan.updates.iter().filter(|update| !update.is_noop()) {
        ctx.store
            .update(txn, target, update.current.id, update.changes.clone())
            .await
            .map_err(|err| as_failure(EntityKey::Child(update.index), err))?;
    }

    for create in &plan.creates {
        let mut fields = create.fields.clone();
        fields.insert(owner_key.to_string(), owner.clone());
        ctx.store
            .insert(txn, target, fields)
            .await
            .map_err(|err| as_failure(EntityKey::Child(create.index), err))?;
    }

    Ok(())
}

async fn validate(ctx: &ApplyContext<'_>, plan: &ReconciliationPlan) -> Result<FailureSet> {
    let target = ctx.association.target_table();
    let owner_key = ctx.association.owner_key();
    let mut failures = FailureSet::new();

    let parent_fields = ctx.parent.merged(ctx.parent_changes);
    failures.extend(
        EntityKey::Parent,
        ctx.schemas.validate(ctx.parent_table, &parent_fields),
    );

    for create in &plan.creates {
        let mut fields = create.fields.clone();
        fields.insert(owner_key.to_string(), Value::from(ctx.parent.id));
        failures.extend(
            EntityKey::Child(create.index),
            ctx.schemas.validate(target, &fields),
        );
    }

    for update in &plan.updates {
        if update.changes.contains_key(owner_key) {
            failures.add(
                EntityKey::Child(update.index),
                FieldError::on(owner_key, "can't be reassigned to another parent"),
            );
        }
        let fields = update.current.merged(&update.changes);
        failures.extend(
            EntityKey::Child(update.index),
            ctx.schemas.validate(target, &fields),
        );
    }

    if ctx.association.is_through() {
        join::check_plan(&*ctx.store, ctx.association, ctx.current, plan, &mut failures).await?;
    }

    Ok(failures)
}

fn as_failure(key: EntityKey, err: NestError) -> NestError {
    match err {
        NestError::ConstraintViolation(message) => {
            let mut failures = FailureSet::new();
            failures.add(key, FieldError::base(message));
            NestError::Validation(failures)
        }
        other => other,
    }
}

/// An open store transaction that rolls itself back when dropped unfinished.
struct AtomicScope {
    store: Arc<dyn Store>,
    txn: TransactionId,
    lease: Option<ParentLease>,
    finished: bool,
}

impl AtomicScope {
    async fn begin(store: Arc<dyn Store>, lease: Option<ParentLease>) -> Result<Self> {
        let txn = store.begin().await?;
        Ok(Self {
            store,
            txn,
            lease,
            finished: false,
        })
    }

    async fn finish(mut self, operation_result: Result<()>) -> Result<()> {
        let result = finalize_atomic_scope(&*self.store, self.txn, operation_result).await;
        self.finished = true;
        result
    }
}

impl Drop for AtomicScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let store = Arc::clone(&self.store);
        let txn = self.txn;
        let lease = self.lease.take();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match store.rollback(txn).await {
                        Ok(()) => event!(
                            Level::WARN,
                            txn = %txn,
                            "nested save cancelled, transaction rolled back"
                        ),
                        Err(err) => warn!("rollback of cancelled {} failed: {}", txn, err),
                    }
                    drop(lease);
                });
            }
            Err(_) => warn!("{} dropped outside a tokio runtime and left open", txn),
        }
    }
}

async fn finalize_atomic_scope(
    store: &dyn Store,
    txn: TransactionId,
    operation_result: Result<()>,
) -> Result<()> {
    match operation_result {
        Ok(()) => {
            if let Err(commit_err) = store.commit(txn).await {
                if let Err(rollback_err) = store.rollback(txn).await {
                    warn!("rollback after failed commit of {} failed: {}", txn, rollback_err);
                }
                return Err(commit_err);
            }
            Ok(())
        }
        Err(operation_err) => {
            event!(Level::DEBUG, error = %operation_err, "nested save rejected, rolling back");
            if let Err(rollback_err) = store.rollback(txn).await {
                warn!("rollback of {} failed: {}", txn, rollback_err);
                return Err(NestError::ExecutionError(format!(
                    "Nested save failed and transaction rollback failed: operation_error='{}'; rollback_error='{}'",
                    operation_err, rollback_err
                )));
            }
            Err(operation_err)
        }
    }
}
