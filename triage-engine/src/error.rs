//! Error taxonomy for the triage engine.
//!
//! Validation and state errors go straight back to the caller with enough
//! detail to correct the request. Conflicts and store failures are
//! retryable; the service retries conflicts itself before surfacing them.

use serde::{Deserialize, Serialize};

use crate::state::StoreError;

/// High-level error kind, copyable for logging and transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed input.
    Validation,
    /// Unknown task id.
    NotFound,
    /// Transition attempted from a terminal state.
    InvalidState,
    /// Lost a race on per-task mutation.
    ConcurrencyConflict,
    /// Infrastructure failure or timeout.
    StoreUnavailable,
    /// Audit log cannot be folded into the stored projection.
    AuditInconsistency,
}

impl ErrorKind {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ConcurrencyConflict | Self::StoreUnavailable)
    }

    /// Suggested action for this error kind.
    pub fn suggested_action(self) -> &'static str {
        match self {
            Self::Validation => "correct the request and resubmit",
            Self::NotFound => "check the task id",
            Self::InvalidState => "task is closed; open a new task instead",
            Self::ConcurrencyConflict => "re-read the task and retry",
            Self::StoreUnavailable => "retry with backoff",
            Self::AuditInconsistency => "page the on-call engineer; do not retry",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidState => write!(f, "invalid_state"),
            Self::ConcurrencyConflict => write!(f, "concurrency_conflict"),
            Self::StoreUnavailable => write!(f, "store_unavailable"),
            Self::AuditInconsistency => write!(f, "audit_inconsistency"),
        }
    }
}

/// Errors surfaced by [`crate::service::TriageService`].
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Triage task not found: {0}")]
    NotFound(String),

    #[error("Task {task_id} cannot {operation}: status is {status}")]
    InvalidState {
        task_id: String,
        operation: &'static str,
        status: String,
    },

    #[error("Concurrent modification of task {0}, retry")]
    ConcurrencyConflict(String),

    #[error("Task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Audit log inconsistent for task {task_id}: {detail}")]
    AuditInconsistency { task_id: String, detail: String },
}

impl TriageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::AuditInconsistency { .. } => ErrorKind::AuditInconsistency,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<StoreError> for TriageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { task_id, .. } => Self::ConcurrencyConflict(task_id),
            StoreError::AlreadyExists(id) => {
                Self::Validation(format!("task {} already exists", id))
            }
            StoreError::Corrupt { task_id, detail } => {
                Self::AuditInconsistency { task_id, detail }
            }
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

/// Result type for triage operations.
pub type TriageResult<T> = Result<T, TriageError>;
