//! Persistence for triage tasks and their audit log
//!
//! Two column families (or two maps, in memory): task projections keyed by
//! id and audit entries keyed by `(task_id, sequence)`. Every write after
//! creation goes through [`TaskStore::commit`].

#[cfg(feature = "rocksdb-store")]
pub mod rocks;
pub mod memory;
pub mod schema;
pub mod store;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksStore;
#[cfg(test)]
pub use store::MockTaskStore;
pub use store::{SharedTaskStore, StoreError, StoreResult, TaskStore};
