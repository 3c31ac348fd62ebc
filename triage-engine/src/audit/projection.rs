//! Folding audit entries into the task projection.
//!
//! The service and replay share [`apply`]: a mutation builds entries,
//! folds them into the current projection, and commits both together.
//! Replaying the stored log must therefore reproduce the stored row.

use serde::Serialize;

use super::types::{LogDetails, TriageTaskLog};
use crate::task::{TaskStatus, TriageTask};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("Log is empty")]
    Empty,

    #[error("First entry must be CREATED, found {0}")]
    MissingCreated(String),

    #[error("Entry {sequence} belongs to task {found}, expected {expected}")]
    WrongTask {
        sequence: u64,
        expected: String,
        found: String,
    },

    #[error("Sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("Entry {sequence} action_type {action_type} does not match details")]
    ActionMismatch { sequence: u64, action_type: String },

    #[error("Entry {sequence} ({action}) applied to terminal task")]
    AfterTerminal { sequence: u64, action: String },

    #[error("Duplicate CREATED entry at sequence {0}")]
    DuplicateCreated(u64),
}

/// Fold one non-CREATED entry into `task`.
pub fn apply(task: &mut TriageTask, log: &TriageTaskLog) -> Result<(), ReplayError> {
    let expected = task.version + 1;
    if log.sequence != expected {
        return Err(ReplayError::SequenceGap {
            expected,
            found: log.sequence,
        });
    }
    if log.task_id != task.id {
        return Err(ReplayError::WrongTask {
            sequence: log.sequence,
            expected: task.id.clone(),
            found: log.task_id.clone(),
        });
    }
    if log.action_type != log.details.action() {
        return Err(ReplayError::ActionMismatch {
            sequence: log.sequence,
            action_type: log.action_type.to_string(),
        });
    }
    let touches_state = !matches!(log.details, LogDetails::Manual { .. });
    if task.is_terminal() && touches_state {
        return Err(ReplayError::AfterTerminal {
            sequence: log.sequence,
            action: log.action_type.to_string(),
        });
    }

    match &log.details {
        LogDetails::Created { .. } => return Err(ReplayError::DuplicateCreated(log.sequence)),
        LogDetails::SeverityChanged {
            to,
            deadline_at,
            assignee_role,
            overdue_cleared,
            ..
        } => {
            task.severity = *to;
            task.deadline_at = *deadline_at;
            task.assignee_role = *assignee_role;
            if *overdue_cleared {
                task.is_overdue = false;
            }
        }
        LogDetails::Reassigned {
            assignee_role,
            assigned_user_id,
            explicit,
        } => {
            task.assignee_role = *assignee_role;
            task.assigned_user_id = assigned_user_id.clone();
            task.assignment_explicit = *explicit;
        }
        LogDetails::WorkflowUpdated {
            status,
            intent_type,
        } => {
            if let Some(status) = status {
                task.status = *status;
            }
            if let Some(intent_type) = intent_type {
                task.intent_type = *intent_type;
            }
        }
        LogDetails::FirstAction | LogDetails::AppointmentBooked { .. } => {}
        LogDetails::NotesUpdated { notes } => task.notes = Some(notes.clone()),
        LogDetails::Manual { .. } => {}
        LogDetails::MarkedOverdue { .. } => task.is_overdue = true,
        LogDetails::Closed {
            status,
            action_note,
            handled_by_user_id,
            handled_by_role,
        } => {
            task.status = *status;
            task.closed_at = Some(log.timestamp);
            task.is_overdue = false;
            task.action_note = Some(action_note.clone());
            task.handled_by_user_id = Some(handled_by_user_id.clone());
            task.handled_by_role = Some(*handled_by_role);
        }
    }

    if log.details.is_state_action() {
        task.last_action_at = log.timestamp;
        if task.first_action_at.is_none() && log.actor_role.is_staff() {
            task.first_action_at = Some(log.timestamp);
        }
    }
    task.version = log.sequence;
    Ok(())
}

/// Rebuild a task from its complete log.
pub fn rebuild(logs: &[TriageTaskLog]) -> Result<TriageTask, ReplayError> {
    let (first, rest) = logs.split_first().ok_or(ReplayError::Empty)?;
    let mut task = match &first.details {
        LogDetails::Created { task, .. } if first.sequence == 1 => {
            let mut task = (**task).clone();
            task.version = 1;
            task
        }
        _ => return Err(ReplayError::MissingCreated(first.action_type.to_string())),
    };
    for log in rest {
        apply(&mut task, log)?;
    }
    Ok(task)
}

/// A field where the stored projection and the replayed log disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub field: &'static str,
    pub stored: String,
    pub replayed: String,
}

/// Compare a stored projection against its replay.
pub fn diff(stored: &TriageTask, replayed: &TriageTask) -> Vec<Divergence> {
    let mut out = Vec::new();
    macro_rules! check {
        ($field:ident) => {
            if stored.$field != replayed.$field {
                out.push(Divergence {
                    field: stringify!($field),
                    stored: format!("{:?}", stored.$field),
                    replayed: format!("{:?}", replayed.$field),
                });
            }
        };
    }
    check!(status);
    check!(severity);
    check!(assignee_role);
    check!(assigned_user_id);
    check!(assignment_explicit);
    check!(intent_type);
    check!(notes);
    check!(deadline_at);
    check!(is_overdue);
    check!(first_action_at);
    check!(last_action_at);
    check!(closed_at);
    check!(action_note);
    check!(handled_by_user_id);
    check!(handled_by_role);
    check!(version);
    out
}

/// Invariant 1: `closed_at` is set exactly when the status is terminal.
pub fn closure_consistent(task: &TriageTask) -> bool {
    let terminal = matches!(task.status, TaskStatus::Completed | TaskStatus::Cancelled);
    terminal == task.closed_at.is_some() && !(terminal && task.is_overdue)
}
