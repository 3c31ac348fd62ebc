//! RocksDB-backed task store
//!
//! Projections and audit entries live in separate column families and are
//! written through one `WriteBatch` per commit. Values are JSON because
//! audit details carry arbitrary JSON payloads.

use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, keys, ALL_CFS};
use super::store::{sort_by_deadline, StoreError, StoreResult, TaskStore};
use crate::audit::TriageTaskLog;
use crate::task::{TaskFilter, TriageTask};

/// Commit stripes; tasks hashing to different stripes never contend.
const COMMIT_STRIPES: usize = 64;

pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
    stripes: Vec<Mutex<()>>,
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
            stripes: (0..COMMIT_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn stripe(&self, task_id: &str) -> &Mutex<()> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        task_id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % COMMIT_STRIPES]
    }

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    fn read_task(db: &DB, task_id: &str) -> StoreResult<Option<TriageTask>> {
        let cf = db
            .cf_handle(schema::CF_TASKS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_TASKS.to_string()))?;
        match db.get_cf(cf, keys::task(task_id).as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_batch(db: &DB, task: &TriageTask, logs: &[TriageTaskLog]) -> StoreResult<()> {
        let tasks_cf = db
            .cf_handle(schema::CF_TASKS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_TASKS.to_string()))?;
        let logs_cf = db
            .cf_handle(schema::CF_TASK_LOGS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_TASK_LOGS.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.put_cf(tasks_cf, keys::task(&task.id).as_bytes(), Self::encode(task)?);
        for log in logs {
            batch.put_cf(
                logs_cf,
                keys::log(&log.task_id, log.sequence).as_bytes(),
                Self::encode(log)?,
            );
        }
        db.write(batch)?;
        Ok(())
    }
}

impl TaskStore for RocksStore {
    fn insert(&self, task: &TriageTask, created: &TriageTaskLog) -> StoreResult<()> {
        let _stripe = self.stripe(&task.id).lock().map_err(|_| StoreError::LockPoisoned)?;
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        if Self::read_task(&db, &task.id)?.is_some() {
            return Err(StoreError::AlreadyExists(task.id.clone()));
        }
        Self::write_batch(&db, task, std::slice::from_ref(created))
    }

    fn get(&self, task_id: &str) -> StoreResult<Option<TriageTask>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        Self::read_task(&db, task_id)
    }

    fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<TriageTask>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_TASKS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_TASKS.to_string()))?;

        let mut tasks = Vec::new();
        for item in db.prefix_iterator_cf(cf, keys::TASK_PREFIX.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(keys::TASK_PREFIX.as_bytes()) {
                break;
            }
            let task: TriageTask = Self::decode(&value)?;
            if filter.matches(&task) {
                tasks.push(task);
            }
        }
        sort_by_deadline(&mut tasks);
        Ok(tasks)
    }

    fn logs(&self, task_id: &str) -> StoreResult<Vec<TriageTaskLog>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_TASK_LOGS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_TASK_LOGS.to_string()))?;

        let prefix = keys::log_prefix(task_id);
        let mut logs = Vec::new();
        for item in db.prefix_iterator_cf(cf, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            let log = Self::decode::<TriageTaskLog>(&value)?;
            let key_sequence = std::str::from_utf8(&key)
                .ok()
                .and_then(keys::parse_log_sequence);
            if key_sequence != Some(log.sequence) || log.task_id != task_id {
                return Err(StoreError::Corrupt {
                    task_id: task_id.to_string(),
                    detail: format!(
                        "log key {} holds entry {} of task {}",
                        String::from_utf8_lossy(&key),
                        log.sequence,
                        log.task_id
                    ),
                });
            }
            logs.push(log);
        }
        Ok(logs)
    }

    fn commit(
        &self,
        task: &TriageTask,
        expected_version: u64,
        logs: &[TriageTaskLog],
    ) -> StoreResult<()> {
        let _stripe = self.stripe(&task.id).lock().map_err(|_| StoreError::LockPoisoned)?;
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let found = Self::read_task(&db, &task.id)?
            .map(|t| t.version)
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;
        if found != expected_version {
            return Err(StoreError::Conflict {
                task_id: task.id.clone(),
                expected: expected_version,
                found,
            });
        }
        Self::write_batch(&db, task, logs)
    }
}
