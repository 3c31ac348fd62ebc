//! In-process task store.
//!
//! Projection and log live under one `RwLock`, so a commit is atomic with
//! respect to every reader. The availability switch lets callers exercise
//! the store-unavailable paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::store::{sort_by_deadline, StoreError, StoreResult, TaskStore};
use crate::audit::TriageTaskLog;
use crate::task::{TaskFilter, TriageTask};

#[derive(Default)]
struct Tables {
    tasks: HashMap<String, TriageTask>,
    logs: HashMap<String, Vec<TriageTaskLog>>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    /// Number of stored tasks.
    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for MemoryStore {
    fn insert(&self, task: &TriageTask, created: &TriageTaskLog) -> StoreResult<()> {
        self.ensure_available()?;
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        if tables.tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id.clone()));
        }
        tables.tasks.insert(task.id.clone(), task.clone());
        tables.logs.insert(task.id.clone(), vec![created.clone()]);
        Ok(())
    }

    fn get(&self, task_id: &str) -> StoreResult<Option<TriageTask>> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.tasks.get(task_id).cloned())
    }

    fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<TriageTask>> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut tasks: Vec<TriageTask> = tables
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        sort_by_deadline(&mut tasks);
        Ok(tasks)
    }

    fn logs(&self, task_id: &str) -> StoreResult<Vec<TriageTaskLog>> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.logs.get(task_id).cloned().unwrap_or_default())
    }

    fn commit(
        &self,
        task: &TriageTask,
        expected_version: u64,
        logs: &[TriageTaskLog],
    ) -> StoreResult<()> {
        self.ensure_available()?;
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        let found = tables
            .tasks
            .get(&task.id)
            .map(|t| t.version)
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;
        if found != expected_version {
            return Err(StoreError::Conflict {
                task_id: task.id.clone(),
                expected: expected_version,
                found,
            });
        }
        tables.tasks.insert(task.id.clone(), task.clone());
        tables
            .logs
            .entry(task.id.clone())
            .or_default()
            .extend_from_slice(logs);
        Ok(())
    }
}
