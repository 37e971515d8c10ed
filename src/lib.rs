// ============================================================================
// nestsync
// ============================================================================
//
// Saves a parent record together with a submitted batch of nested child
// entries in one atomic step. The batch is reconciled against the stored
// collection (create / update / delete / untouched), validated as a whole,
// and applied inside a single transaction that rolls back on any failure.
//
// Layers, bottom-up:
// - core:        values, records, errors and the FailureSet
// - storage:     the Store trait and the transactional InMemoryStore
// - batch:       attribute sets and the permit step from raw request data
// - reconcile:   the pure diff, the plan, and the atomic apply
// - join:        many-to-many memberships on top of the same core
// - facade:      NestedWriter, the entry point applications use
//
// ============================================================================

pub mod association;
pub mod batch;
pub mod config;
pub mod core;
pub mod facade;
pub mod fixture;
pub mod join;
pub mod locks;
pub mod reconcile;
pub mod schema;
pub mod storage;
pub mod transaction;

pub use crate::association::Association;
pub use crate::batch::{AttributeSet, Batch, FieldAllowList, decode_form_pairs, decode_json};
pub use crate::config::ReconcileConfig;
pub use crate::core::{
    DataType, EntityId, EntityKey, FailureSet, FieldError, FieldMap, NestError, Record, Result, Value,
};
pub use crate::facade::{Nested, NestedWriter, ParentGraph, SaveRequest};
pub use crate::fixture::Fixture;
pub use crate::join::{Membership, MembershipToggle, Pairing, prepopulate};
pub use crate::reconcile::{
    ApplyOutcome, PlanSummary, ReconciliationPlan, reconcile, reconcile_with,
};
pub use crate::schema::{Column, EntitySchema, Rule, SchemaRegistry};
pub use crate::storage::{InMemoryStore, Store, StoreStats, TableDef, WriteOp};
