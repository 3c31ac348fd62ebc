//! Audit log entry types
//!
//! One `TriageTaskLog` row per state-affecting event. Rows are never
//! mutated or deleted. `details` carries everything needed to reapply the
//! change, so the log alone reproduces the task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{AssigneeRole, Severity};
use crate::task::{Actor, ActorRole, IntentType, ManualEntryKind, TaskId, TaskStatus, TriageTask};

/// Kind of audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogAction {
    Created,
    UpdatedPriority,
    SeverityChanged,
    Reassigned,
    FirstAction,
    AppointmentBooked,
    NoteAdded,
    CommentAdded,
    MarkedOverdue,
    Closed,
}

impl std::fmt::Display for LogAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::UpdatedPriority => "UPDATED_PRIORITY",
            Self::SeverityChanged => "SEVERITY_CHANGED",
            Self::Reassigned => "REASSIGNED",
            Self::FirstAction => "FIRST_ACTION",
            Self::AppointmentBooked => "APPOINTMENT_BOOKED",
            Self::NoteAdded => "NOTE_ADDED",
            Self::CommentAdded => "COMMENT_ADDED",
            Self::MarkedOverdue => "MARKED_OVERDUE",
            Self::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

/// Structured payload of an audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogDetails {
    /// Initial projection (version 1).
    Created {
        task: Box<TriageTask>,
        needs_retriage: bool,
    },
    SeverityChanged {
        from: Severity,
        to: Severity,
        deadline_at: DateTime<Utc>,
        /// Role after re-derivation from the new policy.
        assignee_role: Option<AssigneeRole>,
        overdue_cleared: bool,
        needs_retriage: bool,
    },
    Reassigned {
        assignee_role: Option<AssigneeRole>,
        assigned_user_id: Option<String>,
        /// Staff chose this assignment; later severity changes keep it.
        #[serde(default)]
        explicit: bool,
    },
    /// Workflow fields: status moved to IN_PROGRESS and/or intent corrected.
    WorkflowUpdated {
        status: Option<TaskStatus>,
        intent_type: Option<IntentType>,
    },
    /// Staff acknowledged the task without changing anything.
    FirstAction,
    NotesUpdated {
        notes: String,
    },
    AppointmentBooked {
        appointment_id: String,
    },
    /// Manual comment or note. Does not touch the projection.
    Manual {
        entry: ManualEntryKind,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    MarkedOverdue {
        deadline_at: DateTime<Utc>,
    },
    Closed {
        status: TaskStatus,
        action_note: String,
        handled_by_user_id: String,
        handled_by_role: ActorRole,
    },
}

impl LogDetails {
    pub fn action(&self) -> LogAction {
        match self {
            Self::Created { .. } => LogAction::Created,
            Self::SeverityChanged { .. } => LogAction::SeverityChanged,
            Self::Reassigned { .. } => LogAction::Reassigned,
            Self::WorkflowUpdated { .. } => LogAction::UpdatedPriority,
            Self::FirstAction => LogAction::FirstAction,
            Self::NotesUpdated { .. } => LogAction::NoteAdded,
            Self::AppointmentBooked { .. } => LogAction::AppointmentBooked,
            Self::Manual { entry, .. } => match entry {
                ManualEntryKind::CommentAdded => LogAction::CommentAdded,
                ManualEntryKind::NoteAdded => LogAction::NoteAdded,
            },
            Self::MarkedOverdue { .. } => LogAction::MarkedOverdue,
            Self::Closed { .. } => LogAction::Closed,
        }
    }

    /// Whether this entry advances `last_action_at`. Overdue flags and
    /// manual entries do not.
    pub fn is_state_action(&self) -> bool {
        !matches!(self, Self::MarkedOverdue { .. } | Self::Manual { .. })
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageTaskLog {
    pub id: String,
    pub task_id: TaskId,
    /// 1-based position in the task's log; equals the task version after
    /// this entry is applied.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub action_type: LogAction,
    pub details: LogDetails,
}

impl TriageTaskLog {
    pub fn new(
        task_id: impl Into<TaskId>,
        sequence: u64,
        timestamp: DateTime<Utc>,
        actor: &Actor,
        details: LogDetails,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            sequence,
            timestamp,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            action_type: details.action(),
            details,
        }
    }
}
