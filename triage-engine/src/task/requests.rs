//! Inputs to the task store operations, with their validation rules.
//!
//! Required fields are `Option`s on the wire so that a missing value is
//! reported as a validation error instead of being defaulted.

use serde::{Deserialize, Serialize};

use super::types::{Actor, ActorRole, IntentType, SourceReference, SourceType, TaskStatus};
use crate::error::{TriageError, TriageResult};
use crate::policy::{AssigneeRole, Severity};

/// Minimum trimmed length of a closure note.
pub const MIN_ACTION_NOTE_LEN: usize = 3;

fn required(value: Option<String>, field: &str) -> TriageResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(TriageError::validation(format!("{} is required", field))),
    }
}

/// Classified signal handed over by the intake adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub patient_id: Option<String>,
    pub intent_type: Option<IntentType>,
    /// Left unset when the classifier could not decide; becomes ROUTINE.
    pub severity: Option<Severity>,
    pub source_message: Option<String>,
    pub source_type: Option<SourceType>,
    pub supervising_clinician_id: Option<String>,
    pub symptom_id: Option<String>,
    pub refill_id: Option<String>,
    pub appointment_id: Option<String>,
    pub admin_task_id: Option<String>,
}

/// Validated creation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub patient_id: String,
    pub intent_type: IntentType,
    pub severity: Severity,
    pub source_message: String,
    pub source_type: SourceType,
    pub supervising_clinician_id: String,
    pub source_reference: Option<SourceReference>,
}

impl CreateTaskRequest {
    pub fn validate(self) -> TriageResult<NewTask> {
        let supervising_clinician_id =
            required(self.supervising_clinician_id, "supervisingClinicianId")?;
        let patient_id = required(self.patient_id, "patientId")?;
        let intent_type = self
            .intent_type
            .ok_or_else(|| TriageError::validation("intentType is required"))?;
        let source_type = self
            .source_type
            .ok_or_else(|| TriageError::validation("sourceType is required"))?;
        let source_message = self
            .source_message
            .ok_or_else(|| TriageError::validation("sourceMessage is required"))?;

        let mut references: Vec<SourceReference> = [
            self.symptom_id.map(SourceReference::Symptom),
            self.refill_id.map(SourceReference::Refill),
            self.appointment_id.map(SourceReference::Appointment),
            self.admin_task_id.map(SourceReference::AdminTask),
        ]
        .into_iter()
        .flatten()
        .collect();
        if references.len() > 1 {
            return Err(TriageError::validation(
                "at most one of symptomId, refillId, appointmentId, adminTaskId may be set",
            ));
        }

        Ok(NewTask {
            patient_id,
            intent_type,
            severity: self.severity.unwrap_or_default(),
            source_message,
            source_type,
            supervising_clinician_id,
            source_reference: references.pop(),
        })
    }
}

/// Partial update applied by MA/clinician staff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChanges {
    pub severity: Option<Severity>,
    pub assignee_role: Option<AssigneeRole>,
    pub assigned_user_id: Option<String>,
    pub intent_type: Option<IntentType>,
    /// Only `IN_PROGRESS` is accepted here; closing goes through `close`.
    pub status: Option<TaskStatus>,
    pub notes: Option<String>,
    /// Drop the assigned user and return the role to the severity default.
    #[serde(default)]
    pub clear_assignment: bool,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.severity.is_none()
            && self.assignee_role.is_none()
            && self.assigned_user_id.is_none()
            && self.intent_type.is_none()
            && self.status.is_none()
            && self.notes.is_none()
            && !self.clear_assignment
    }

    pub fn validate(&self) -> TriageResult<()> {
        if self.is_empty() {
            return Err(TriageError::validation("no changes supplied"));
        }
        match self.status {
            Some(TaskStatus::Completed) | Some(TaskStatus::Cancelled) => {
                return Err(TriageError::validation(
                    "terminal status cannot be set by update; use close",
                ))
            }
            Some(TaskStatus::Open) => {
                return Err(TriageError::validation(
                    "status can only be moved forward to IN_PROGRESS",
                ))
            }
            _ => {}
        }
        if matches!(&self.assigned_user_id, Some(id) if id.trim().is_empty()) {
            return Err(TriageError::validation("assignedUserId must not be blank"));
        }
        if self.clear_assignment
            && (self.assignee_role.is_some() || self.assigned_user_id.is_some())
        {
            return Err(TriageError::validation(
                "clearAssignment cannot be combined with assigneeRole or assignedUserId",
            ));
        }
        Ok(())
    }
}

/// Closure request. Every field is mandatory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    pub action_note: Option<String>,
    pub handled_by_user_id: Option<String>,
    pub handled_by_role: Option<ActorRole>,
    /// Close as CANCELLED instead of COMPLETED.
    #[serde(default)]
    pub cancel: bool,
}

/// Validated closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    pub action_note: String,
    pub handled_by: Actor,
    pub status: TaskStatus,
}

impl CloseRequest {
    pub fn new(note: impl Into<String>, user_id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            action_note: Some(note.into()),
            handled_by_user_id: Some(user_id.into()),
            handled_by_role: Some(role),
            cancel: false,
        }
    }

    pub fn cancelled(mut self) -> Self {
        self.cancel = true;
        self
    }

    pub fn validate(self) -> TriageResult<Closure> {
        let action_note = self
            .action_note
            .map(|n| n.trim().to_string())
            .unwrap_or_default();
        if action_note.chars().count() < MIN_ACTION_NOTE_LEN {
            return Err(TriageError::validation(format!(
                "actionNote must be at least {} characters",
                MIN_ACTION_NOTE_LEN
            )));
        }
        let user_id = required(self.handled_by_user_id, "handledByUserId")?;
        let role = self
            .handled_by_role
            .ok_or_else(|| TriageError::validation("handledByRole is required"))?;
        if !role.is_staff() {
            return Err(TriageError::validation(
                "handledByRole must be MA or CLINICIAN",
            ));
        }

        Ok(Closure {
            action_note,
            handled_by: Actor::new(user_id, role),
            status: if self.cancel {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Completed
            },
        })
    }
}

/// Kind of a manual audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManualEntryKind {
    CommentAdded,
    NoteAdded,
}

/// Manual audit entry that leaves the task untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualLogEntry {
    pub action_type: Option<ManualEntryKind>,
    pub text: Option<String>,
    pub actor_id: Option<String>,
    pub actor_role: Option<ActorRole>,
    /// Free-form structured payload kept alongside the text.
    pub payload: Option<serde_json::Value>,
}

/// Validated manual entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualNote {
    pub kind: ManualEntryKind,
    pub text: String,
    pub actor: Actor,
    pub payload: Option<serde_json::Value>,
}

impl ManualLogEntry {
    pub fn validate(self) -> TriageResult<ManualNote> {
        let kind = self.action_type.unwrap_or(ManualEntryKind::CommentAdded);
        let text = required(self.text, "text")?;
        let actor_id = required(self.actor_id, "actorId")?;
        let role = self
            .actor_role
            .ok_or_else(|| TriageError::validation("actorRole is required"))?;
        Ok(ManualNote {
            kind,
            text,
            actor: Actor::new(actor_id, role),
            payload: self.payload,
        })
    }
}
