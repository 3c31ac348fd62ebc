//! Task store contract.
//!
//! `commit` is the only write path after creation: a compare-and-swap on
//! the task version that lands the new projection and its audit entries
//! together, or nothing.

use std::sync::Arc;

use crate::audit::TriageTaskLog;
use crate::task::{TaskFilter, TriageTask};

/// Error type for task store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "rocksdb-store")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Version conflict on task {task_id}: expected {expected}, found {found}")]
    Conflict {
        task_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Corrupt record for task {task_id}: {detail}")]
    Corrupt { task_id: String, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for task store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a task store
pub type SharedTaskStore = Arc<dyn TaskStore>;

#[cfg_attr(test, mockall::automock)]
pub trait TaskStore: Send + Sync {
    /// Persist a new task with its CREATED entry.
    fn insert(&self, task: &TriageTask, created: &TriageTaskLog) -> StoreResult<()>;

    fn get(&self, task_id: &str) -> StoreResult<Option<TriageTask>>;

    /// Tasks matching `filter`, ordered by deadline ascending.
    fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<TriageTask>>;

    /// Full audit trail ordered by sequence.
    fn logs(&self, task_id: &str) -> StoreResult<Vec<TriageTaskLog>>;

    /// Replace the projection and append `logs` if the stored version is
    /// still `expected_version`.
    fn commit(
        &self,
        task: &TriageTask,
        expected_version: u64,
        logs: &[TriageTaskLog],
    ) -> StoreResult<()>;
}

pub(crate) fn sort_by_deadline(tasks: &mut [TriageTask]) {
    tasks.sort_by(|a, b| {
        a.deadline_at
            .cmp(&b.deadline_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
