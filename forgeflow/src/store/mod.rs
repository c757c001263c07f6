//! Durable result storage boundary.
//!
//! The pipeline persists each task's last result payload through the
//! [`ResultStore`] trait and treats the backing store as opaque key-value
//! storage. The in-memory implementation backs tests and single-process
//! runs.

use crate::errors::StoreError;
use crate::task::TaskId;
use async_trait::async_trait;
use dashmap::DashMap;

/// External durable key-value store for task result payloads.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persists a task's result payload, replacing any previous one.
    async fn save_result(
        &self,
        task_id: &TaskId,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Retrieves a task's last persisted payload, if any.
    async fn load_result(&self, task_id: &TaskId) -> Result<Option<serde_json::Value>, StoreError>;
}

/// Concurrent in-memory result store.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: DashMap<TaskId, serde_json::Value>,
}

impl InMemoryResultStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(
        &self,
        task_id: &TaskId,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.results.insert(task_id.clone(), payload.clone());
        Ok(())
    }

    async fn load_result(&self, task_id: &TaskId) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.results.get(task_id).map(|entry| entry.value().clone()))
    }
}
