//! Per-task mutual exclusion.
//!
//! Each task id maps to its own async mutex, so mutations on one task
//! serialize while different tasks proceed in parallel. Entries are
//! removed from the registry as soon as nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{TriageError, TriageResult};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Clone, Default)]
pub struct TaskLocks {
    registry: Registry,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `wait` for exclusive access to `task_id`.
    pub async fn acquire(&self, task_id: &str, wait: Duration) -> TriageResult<TaskLockGuard> {
        let lock = {
            let mut registry = self.registry.lock().unwrap_or_else(|p| p.into_inner());
            registry
                .entry(task_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        match tokio::time::timeout(wait, lock.clone().lock_owned()).await {
            Ok(guard) => Ok(TaskLockGuard {
                guard: Some(guard),
                lock: Some(lock),
                task_id: task_id.to_string(),
                registry: self.registry.clone(),
            }),
            Err(_) => {
                release(&self.registry, task_id, lock);
                Err(TriageError::ConcurrencyConflict(task_id.to_string()))
            }
        }
    }

    /// Number of task ids currently held or awaited.
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop the registry entry if `lock` is its last outside reference.
fn release(registry: &Registry, task_id: &str, lock: Arc<AsyncMutex<()>>) {
    let mut registry = registry.lock().unwrap_or_else(|p| p.into_inner());
    let idle = registry
        .get(task_id)
        .is_some_and(|current| Arc::ptr_eq(current, &lock) && Arc::strong_count(&lock) == 2);
    if idle {
        registry.remove(task_id);
    }
}

/// Exclusive access to one task until dropped.
pub struct TaskLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Option<Arc<AsyncMutex<()>>>,
    task_id: String,
    registry: Registry,
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        // Unlock before the idle check; the guard holds its own reference.
        drop(self.guard.take());
        if let Some(lock) = self.lock.take() {
            release(&self.registry, &self.task_id, lock);
        }
    }
}
