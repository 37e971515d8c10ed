pub mod apply;
pub mod diff;
pub mod plan;

pub use apply::{ApplyContext, ApplyOutcome, apply, load_collection};
pub use diff::{reconcile, reconcile_with};
pub use plan::{PlanSummary, PlannedCreate, PlannedDelete, PlannedUpdate, ReconciliationPlan};
