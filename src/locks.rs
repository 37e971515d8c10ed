use crate::core::{EntityId, NestError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockKey = (String, EntityId);

/// Serializes nested saves per parent record.
///
/// Saves on different parents never wait for each other.
#[derive(Default)]
pub struct ParentLocks {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one save; releases the parent on drop.
pub struct ParentLease {
    _guard: OwnedMutexGuard<()>,
}

impl ParentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, table: &str, id: EntityId, timeout: Duration) -> Result<ParentLease> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|err| NestError::ExecutionError(err.to_string()))?;
            // Entries nobody holds or waits on can go.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((table.to_string(), id))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(ParentLease { _guard: guard }),
            Err(_) => Err(NestError::LockTimeout(format!("{} {}", table, id))),
        }
    }

    /// Number of parents currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_parent_waits() {
        let locks = ParentLocks::new();
        let lease = locks
            .acquire("projects", EntityId(1), Duration::from_millis(50))
            .await
            .unwrap();

        let second = locks
            .acquire("projects", EntityId(1), Duration::from_millis(20))
            .await;
        assert!(matches!(second, Err(NestError::LockTimeout(_))));

        drop(lease);
        assert!(locks
            .acquire("projects", EntityId(1), Duration::from_millis(20))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_different_parents_are_independent() {
        let locks = ParentLocks::new();
        let _first = locks
            .acquire("projects", EntityId(1), Duration::from_millis(20))
            .await
            .unwrap();
        let _second = locks
            .acquire("projects", EntityId(2), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(locks.tracked(), 2);
    }
}
