use super::request::{Nested, ParentGraph, SaveRequest};
use crate::association::Association;
use crate::batch::Batch;
use crate::config::ReconcileConfig;
use crate::core::{DataType, EntityId, NestError, Record, Result};
use crate::join::{self, Pairing, ToggleBatch};
use crate::locks::ParentLocks;
use crate::reconcile::{self, ApplyContext, ApplyOutcome, ReconciliationPlan};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::storage::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Entry point for saving a parent together with a nested collection.
///
/// Holds the registered associations and schemas, and serializes saves that
/// target the same parent.
///
/// ```no_run
/// use nestsync::{Association, AttributeSet, Batch, InMemoryStore, NestedWriter, SaveRequest};
/// use std::sync::Arc;
///
/// # async fn demo() -> nestsync::Result<()> {
/// let store = Arc::new(InMemoryStore::new());
/// let writer = NestedWriter::new(store)
///     .association("projects", Association::has_many("tasks", "tasks", "project_id"));
///
/// let request = SaveRequest::new("projects", 1u64, "tasks")
///     .parent_field("name", "Apollo")
///     .batch(Batch::new().with(AttributeSet::new().field("name", "Launch")));
/// let saved = writer.save(request).await?;
/// println!("{} tasks", saved.children.len());
/// # Ok(())
/// # }
/// ```
pub struct NestedWriter<S: Store> {
    store: Arc<S>,
    config: ReconcileConfig,
    schemas: SchemaRegistry,
    associations: HashMap<(String, String), Association>,
    locks: ParentLocks,
}

impl<S: Store + 'static> NestedWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: ReconcileConfig::new(),
            schemas: SchemaRegistry::new(),
            associations: HashMap::new(),
            locks: ParentLocks::new(),
        }
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(mut self, schema: EntitySchema) -> Self {
        self.schemas.register(schema);
        self
    }

    /// Registers a nested association of `parent_table`.
    pub fn association(mut self, parent_table: &str, association: Association) -> Self {
        self.associations.insert(
            (parent_table.to_string(), association.name().to_string()),
            association,
        );
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn association_for(&self, parent_table: &str, name: &str) -> Result<&Association> {
        self.associations
            .get(&(parent_table.to_string(), name.to_string()))
            .ok_or_else(|| NestError::UnknownAssociation(format!("{}.{}", parent_table, name)))
    }

    /// Loads a parent and its current collection for `association`.
    pub async fn load(&self, parent_table: &str, parent_id: EntityId, association: &str) -> Result<ParentGraph> {
        let association = self.association_for(parent_table, association)?;
        let parent = self.load_parent(parent_table, parent_id).await?;
        let children = reconcile::load_collection(&*self.store, association, parent_id).await?;
        Ok(ParentGraph { parent, children })
    }

    /// Pairs each candidate with the parent's membership for it.
    ///
    /// With `candidates == None` every record of the related table is a candidate.
    pub async fn prepopulate(
        &self,
        parent_table: &str,
        parent_id: EntityId,
        association: &str,
        candidates: Option<&[Record]>,
    ) -> Result<Vec<Pairing>> {
        let association = self.association_for(parent_table, association)?;
        let Association::Through { related_table, .. } = association else {
            return Err(NestError::ExecutionError(format!(
                "Association '{}' is not a join association",
                association.name()
            )));
        };

        self.load_parent(parent_table, parent_id).await?;
        let current = reconcile::load_collection(&*self.store, association, parent_id).await?;
        match candidates {
            Some(candidates) => join::prepopulate(association, candidates, &current),
            None => {
                let all = self.store.scan(related_table).await?;
                join::prepopulate(association, &all, &current)
            }
        }
    }

    /// Computes the plan a save would apply, without writing anything.
    pub async fn plan(&self, request: &SaveRequest) -> Result<ReconciliationPlan> {
        let association = self.association_for(&request.parent_table, &request.association)?;
        self.load_parent(&request.parent_table, request.parent_id).await?;
        let current = reconcile::load_collection(&*self.store, association, request.parent_id).await?;
        let (batch, toggles) = self.resolve_batch(association, &request.nested, &current)?;

        reconcile::reconcile_with(&current, &batch, &self.config)
            .map_err(|err| remap(toggles.as_ref(), err))
    }

    /// Saves parent changes and the nested submission atomically.
    ///
    /// Returns the refreshed parent and collection, or the first fatal
    /// error. Validation problems come back as `NestError::Validation` with
    /// failures keyed by parent or by entry position in the submission.
    pub async fn save(&self, request: SaveRequest) -> Result<ApplyOutcome> {
        let span = info_span!(
            "nestsync.save",
            parent_table = %request.parent_table,
            parent_id = %request.parent_id,
            association = %request.association,
            entries = request.nested.len()
        );

        let result = self.save_locked(&request).instrument(span.clone()).await;
        let _enter = span.enter();
        match &result {
            Ok(outcome) => event!(
                Level::INFO,
                creates = outcome.summary.creates,
                updates = outcome.summary.updates,
                deletes = outcome.summary.deletes,
                "nested save committed"
            ),
            Err(NestError::Validation(failures)) => {
                event!(Level::INFO, entities = failures.len(), "nested save rejected by validation")
            }
            Err(err) => event!(Level::ERROR, error = %err, "nested save failed"),
        }
        result
    }

    async fn save_locked(&self, request: &SaveRequest) -> Result<ApplyOutcome> {
        let association = self.association_for(&request.parent_table, &request.association)?;
        let lease = self
            .locks
            .acquire(&request.parent_table, request.parent_id, self.config.lock_timeout)
            .await?;

        let parent = self.load_parent(&request.parent_table, request.parent_id).await?;
        if let Some(expected) = request.expected_version {
            if parent.version != expected {
                return Err(NestError::StaleParent {
                    expected,
                    actual: parent.version,
                });
            }
        }

        let current = reconcile::load_collection(&*self.store, association, request.parent_id).await?;
        let (batch, toggles) = self.resolve_batch(association, &request.nested, &current)?;
        let plan = reconcile::reconcile_with(&current, &batch, &self.config)
            .map_err(|err| remap(toggles.as_ref(), err))?;
        event!(Level::DEBUG, summary = ?plan.summary(), "reconciliation planned");

        let mut parent_changes = request.parent_changes.clone();
        self.schemas.cast(&request.parent_table, &mut parent_changes);

        let ctx = ApplyContext {
            store: Arc::clone(&self.store) as Arc<dyn Store>,
            lease: Some(lease),
            schemas: &self.schemas,
            parent_table: &request.parent_table,
            parent: &parent,
            parent_changes: &parent_changes,
            association,
            current: &current,
        };
        reconcile::apply(ctx, &plan)
            .await
            .map_err(|err| remap(toggles.as_ref(), err))
    }

    fn resolve_batch(
        &self,
        association: &Association,
        nested: &Nested,
        current: &[Record],
    ) -> Result<(Batch, Option<ToggleBatch>)> {
        let (batch, toggles) = match nested {
            Nested::Batch(batch) => (batch.clone(), None),
            Nested::Toggles(toggles) => {
                let built = join::build_batch(association, toggles, current)?;
                (built.batch.clone(), Some(built))
            }
        };
        Ok((self.typed_batch(association, batch), toggles))
    }

    /// Casts submitted text to the target table's column types.
    ///
    /// Key columns without a declared type are read as integer identities, so
    /// an echoed `"1"` matches a stored `1`.
    fn typed_batch(&self, association: &Association, batch: Batch) -> Batch {
        let table = association.target_table();
        let schema = self.schemas.get(table);
        let mut keys = vec![association.owner_key()];
        if let Association::Through { related_key, .. } = association {
            keys.push(related_key.as_str());
        }

        batch
            .into_iter()
            .map(|mut entry| {
                self.schemas.cast(table, &mut entry.fields);
                for key in &keys {
                    if schema.is_some_and(|schema| schema.get_column(key).is_some()) {
                        continue;
                    }
                    if let Some(value) = entry.fields.get_mut(*key) {
                        *value = DataType::Integer.cast(value);
                    }
                }
                entry
            })
            .collect()
    }

    async fn load_parent(&self, table: &str, id: EntityId) -> Result<Record> {
        self.store
            .get(table, id)
            .await?
            .ok_or_else(|| NestError::ParentNotFound {
                table: table.to_string(),
                id,
            })
    }
}

fn remap(toggles: Option<&ToggleBatch>, err: NestError) -> NestError {
    match toggles {
        Some(toggles) => toggles.remap_error(err),
        None => err,
    }
}
