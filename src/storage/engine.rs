use crate::core::{EntityId, FieldMap, Record, Result, Value};
use crate::transaction::TransactionId;
use async_trait::async_trait;

/// Persistence boundary of the reconciliation engine.
///
/// Writes always happen inside a transaction obtained from `begin`; a
/// rollback must leave every table exactly as it was before the transaction.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<TransactionId>;

    async fn commit(&self, txn: TransactionId) -> Result<()>;

    async fn rollback(&self, txn: TransactionId) -> Result<()>;

    async fn get(&self, table: &str, id: EntityId) -> Result<Option<Record>>;

    /// All records of a table in identity (insertion) order.
    async fn scan(&self, table: &str) -> Result<Vec<Record>>;

    /// Records whose `field` equals `value`, in identity (insertion) order.
    async fn find_by(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>>;

    /// Inserts a record and returns its new identity.
    async fn insert(&self, txn: TransactionId, table: &str, fields: FieldMap) -> Result<EntityId>;

    /// Lays `changes` over the stored fields and bumps the record version.
    async fn update(
        &self,
        txn: TransactionId,
        table: &str,
        id: EntityId,
        changes: FieldMap,
    ) -> Result<Record>;

    async fn delete(&self, txn: TransactionId, table: &str, id: EntityId) -> Result<()>;
}
