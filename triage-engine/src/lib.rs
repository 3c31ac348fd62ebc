//! Triage Engine
//!
//! Turns classified patient signals into auditable, severity-ranked work
//! items with a response deadline, and flags the ones that miss it.
//!
//! # Components
//!
//! - [`policy`]: severity → response window and default assignee role
//! - [`task`]: the `TriageTask` model and validated operation inputs
//! - [`audit`]: append-only `TriageTaskLog` entries and the projection fold
//! - [`state`]: `TaskStore` trait with in-memory and RocksDB backends
//! - [`service`]: the state machine (create, update, close, mark overdue)
//! - [`sweep`]: the singleton escalation sweep
//! - [`events`]: broadcast of committed audit entries
//!
//! # Lifecycle
//!
//! ```text
//!            update (severity / assignee / notes)
//!              ┌────┐
//!              ▼    │
//! create ──▶ OPEN ──┴──▶ IN_PROGRESS ──┬──▶ COMPLETED
//!              │                       └──▶ CANCELLED
//!              └─────── close ─────────────▶ (either)
//!
//! sweep: deadline_at < now ──▶ is_overdue = true (flag, not a state)
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod policy;
pub mod service;
pub mod state;
pub mod sweep;
pub mod task;

pub use audit::{LogAction, LogDetails, TriageTaskLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PolicyConfig, TriageConfig};
pub use error::{ErrorKind, TriageError, TriageResult};
pub use events::{EventBus, EventFilter, SharedEventBus};
pub use policy::{AssigneeRole, PolicyEntry, Severity, SeverityPolicy};
pub use service::{
    MarkOverdueOutcome, ServiceSettings, SharedTriageService, TriageService, VerifyReport,
};
#[cfg(feature = "rocksdb-store")]
pub use state::RocksStore;
pub use state::{MemoryStore, SharedTaskStore, StoreError, TaskStore};
pub use sweep::{EscalationSweep, SweepOutcome, SweepSummary};
pub use task::{
    Actor, ActorRole, CloseRequest, CreateTaskRequest, IntentType, ManualEntryKind,
    ManualLogEntry, SourceReference, SourceType, TaskChanges, TaskFilter, TaskStatus, TriageTask,
};
