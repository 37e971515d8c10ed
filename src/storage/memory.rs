use super::{Store, Table, TableDef};
use crate::core::{EntityId, FieldMap, NestError, Record, Result, Value};
use crate::transaction::{Change, Transaction, TransactionId};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

/// Counters of effective writes and transaction outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

impl StoreStats {
    pub fn writes(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<String, Table>,
    transactions: HashMap<TransactionId, Transaction>,
    stats: StoreStats,
}

impl StoreState {
    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| NestError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| NestError::TableNotFound(name.to_string()))
    }

    fn active(&mut self, txn: TransactionId) -> Result<&mut Transaction> {
        let transaction = self
            .transactions
            .get_mut(&txn)
            .ok_or_else(|| NestError::ExecutionError(format!("Transaction {} not found", txn)))?;
        if !transaction.state().is_active() {
            return Err(NestError::ExecutionError(format!(
                "Transaction {} is {}",
                txn,
                transaction.state()
            )));
        }
        Ok(transaction)
    }
}

/// Transactional in-memory store.
///
/// Writes land in the tables immediately and are undone on rollback by
/// replaying the transaction's change log backwards.
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    fail_points: Mutex<Vec<(String, WriteOp)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            fail_points: Mutex::new(Vec::new()),
        }
    }

    pub async fn create_table(&self, def: TableDef) -> Result<()> {
        let mut state = self.state.write().await;
        let name = def.name().to_string();
        if state.tables.contains_key(&name) {
            return Err(NestError::TableExists(name));
        }
        state.tables.insert(name, Table::new(def));
        Ok(())
    }

    /// Inserts a record outside of any caller transaction.
    pub async fn seed(&self, table: &str, fields: FieldMap) -> Result<Record> {
        let txn = self.begin().await?;
        let id = match self.insert(txn, table, fields).await {
            Ok(id) => id,
            Err(err) => {
                self.rollback(txn).await?;
                return Err(err);
            }
        };
        self.commit(txn).await?;
        self.get(table, id)
            .await?
            .ok_or_else(|| NestError::RecordNotFound {
                table: table.to_string(),
                id,
            })
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.table(table)?.row_count())
    }

    pub async fn stats(&self) -> StoreStats {
        self.state.read().await.stats
    }

    pub async fn active_transactions(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    /// Makes the next matching write fail with an execution error.
    pub fn inject_failure(&self, table: &str, op: WriteOp) {
        if let Ok(mut points) = self.fail_points.lock() {
            points.push((table.to_string(), op));
        }
    }

    fn take_failure(&self, table: &str, op: WriteOp) -> Result<()> {
        let mut points = self
            .fail_points
            .lock()
            .map_err(|err| NestError::ExecutionError(err.to_string()))?;
        if let Some(pos) = points.iter().position(|(t, o)| t == table && *o == op) {
            points.remove(pos);
            return Err(NestError::ExecutionError(format!(
                "injected {:?} failure on '{}'",
                op, table
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<TransactionId> {
        let id = TransactionId::new();
        let mut state = self.state.write().await;
        state.transactions.insert(id, Transaction::new(id));
        Ok(id)
    }

    async fn commit(&self, txn: TransactionId) -> Result<()> {
        let mut state = self.state.write().await;
        let transaction = state.active(txn)?;
        debug!(
            "{} committed {} write(s) after {:?}",
            txn,
            transaction.change_count(),
            transaction.duration()
        );
        transaction.commit()?;
        state.transactions.remove(&txn);
        state.stats.commits += 1;
        Ok(())
    }

    async fn rollback(&self, txn: TransactionId) -> Result<()> {
        let mut state = self.state.write().await;
        let transaction = state.active(txn)?;
        let elapsed = transaction.duration();
        let undo = transaction.rollback()?;
        state.transactions.remove(&txn);
        debug!("{} rolled back {} write(s) after {:?}", txn, undo.len(), elapsed);

        for change in undo {
            let Some(table) = state.tables.get_mut(change.table_name()) else {
                warn!(
                    "rollback of {} skipped change on dropped table '{}'",
                    txn,
                    change.table_name()
                );
                continue;
            };
            match change {
                Change::Insert { id, .. } => table.remove(id),
                Change::Update { before, .. } | Change::Delete { before, .. } => {
                    table.restore(before)
                }
            }
        }
        state.stats.rollbacks += 1;
        Ok(())
    }

    async fn get(&self, table: &str, id: EntityId) -> Result<Option<Record>> {
        let state = self.state.read().await;
        Ok(state.table(table)?.get(id).cloned())
    }

    async fn scan(&self, table: &str) -> Result<Vec<Record>> {
        let state = self.state.read().await;
        Ok(state.table(table)?.scan().cloned().collect())
    }

    async fn find_by(&self, table: &str, field: &str, value: &Value) -> Result<Vec<Record>> {
        let state = self.state.read().await;
        Ok(state
            .table(table)?
            .scan()
            .filter(|record| record.value(field) == value)
            .cloned()
            .collect())
    }

    async fn insert(&self, txn: TransactionId, table: &str, fields: FieldMap) -> Result<EntityId> {
        self.take_failure(table, WriteOp::Insert)?;
        let mut state = self.state.write().await;
        state.active(txn)?;
        let id = state.table_mut(table)?.insert(fields)?;
        state.active(txn)?.record_change(Change::Insert {
            table: table.to_string(),
            id,
        })?;
        state.stats.inserts += 1;
        Ok(id)
    }

    async fn update(
        &self,
        txn: TransactionId,
        table: &str,
        id: EntityId,
        changes: FieldMap,
    ) -> Result<Record> {
        self.take_failure(table, WriteOp::Update)?;
        let mut state = self.state.write().await;
        state.active(txn)?;
        let storage = state.table_mut(table)?;
        let before = storage.update(id, &changes)?;
        let after = storage.get(id).cloned().ok_or_else(|| NestError::RecordNotFound {
            table: table.to_string(),
            id,
        })?;
        state.active(txn)?.record_change(Change::Update {
            table: table.to_string(),
            before,
        })?;
        state.stats.updates += 1;
        Ok(after)
    }

    async fn delete(&self, txn: TransactionId, table: &str, id: EntityId) -> Result<()> {
        self.take_failure(table, WriteOp::Delete)?;
        let mut state = self.state.write().await;
        state.active(txn)?;
        let before = state.table_mut(table)?.delete(id)?;
        state.active(txn)?.record_change(Change::Delete {
            table: table.to_string(),
            before,
        })?;
        state.stats.deletes += 1;
        Ok(())
    }
}
