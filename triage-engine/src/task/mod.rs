//! Triage task model and operation inputs.

pub mod requests;
pub mod types;

pub use requests::{
    CloseRequest, Closure, CreateTaskRequest, ManualEntryKind, ManualLogEntry, ManualNote,
    NewTask, TaskChanges, MIN_ACTION_NOTE_LEN,
};
pub use types::{
    Actor, ActorRole, IntentType, SourceReference, SourceType, TaskFilter, TaskId, TaskStatus,
    TriageTask,
};
