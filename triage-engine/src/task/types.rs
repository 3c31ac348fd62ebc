//! Core task types.
//!
//! `TriageTask` is a projection of its audit log: every field here is
//! reproducible by folding the task's `TriageTaskLog` entries in sequence
//! order (see [`crate::audit::rebuild`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{AssigneeRole, Severity};

/// Opaque task identifier, safe as a primary key.
pub type TaskId = String;

/// Task status. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// What the patient is asking for, as guessed by the intake classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    SymptomReport,
    SameDayAppointment,
    FutureAppointment,
    RefillRequest,
    AdminTask,
    GeneralQuestion,
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SymptomReport => write!(f, "SYMPTOM_REPORT"),
            Self::SameDayAppointment => write!(f, "SAME_DAY_APPOINTMENT"),
            Self::FutureAppointment => write!(f, "FUTURE_APPOINTMENT"),
            Self::RefillRequest => write!(f, "REFILL_REQUEST"),
            Self::AdminTask => write!(f, "ADMIN_TASK"),
            Self::GeneralQuestion => write!(f, "GENERAL_QUESTION"),
        }
    }
}

/// Channel the triggering signal arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Voice,
    Text,
    CheckIn,
}

/// Pointer to the record that originated the task. At most one per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum SourceReference {
    Symptom(String),
    Refill(String),
    Appointment(String),
    AdminTask(String),
}

/// Who authored an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Patient,
    Ma,
    Clinician,
    System,
}

impl ActorRole {
    /// MA and clinician actions count toward `first_action_at`.
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Ma | Self::Clinician)
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patient => write!(f, "PATIENT"),
            Self::Ma => write!(f, "MA"),
            Self::Clinician => write!(f, "CLINICIAN"),
            Self::System => write!(f, "SYSTEM"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// The escalation sweep.
    pub fn system() -> Self {
        Self::new("escalation-sweep", ActorRole::System)
    }
}

/// A unit of work created from a patient signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageTask {
    pub id: TaskId,
    pub patient_id: String,
    pub intent_type: IntentType,
    pub severity: Severity,
    pub status: TaskStatus,
    pub assignee_role: Option<AssigneeRole>,
    pub assigned_user_id: Option<String>,
    /// Assignment was set by staff rather than derived from severity.
    #[serde(default)]
    pub assignment_explicit: bool,
    /// Clinician of record, regardless of day-to-day assignee.
    pub supervising_clinician_id: String,
    pub source_type: SourceType,
    pub source_message: String,
    pub source_reference: Option<SourceReference>,
    /// Latest working notes from staff.
    pub notes: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub first_action_at: Option<DateTime<Utc>>,
    pub last_action_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    pub deadline_at: DateTime<Utc>,
    pub handled_by_user_id: Option<String>,
    pub handled_by_role: Option<ActorRole>,
    pub action_note: Option<String>,
    /// Number of audit entries folded into this projection.
    pub version: u64,
}

impl TriageTask {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// UNKNOWN severity waits on a human to re-classify it.
    pub fn needs_retriage(&self) -> bool {
        self.severity == Severity::Unknown && !self.is_terminal()
    }

    /// Open, not yet flagged, and past its deadline at `now`.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && !self.is_overdue && self.deadline_at < now
    }
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub severity: Option<Severity>,
    pub intent_type: Option<IntentType>,
    pub patient_id: Option<String>,
    pub overdue: Option<bool>,
    /// Only OPEN and IN_PROGRESS tasks.
    #[serde(default)]
    pub active_only: bool,
}

impl TaskFilter {
    /// Tasks the escalation sweep has to look at.
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &TriageTask) -> bool {
        if self.active_only && task.is_terminal() {
            return false;
        }
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if self.severity.is_some_and(|s| s != task.severity) {
            return false;
        }
        if self.intent_type.is_some_and(|i| i != task.intent_type) {
            return false;
        }
        if self.overdue.is_some_and(|o| o != task.is_overdue) {
            return false;
        }
        match &self.patient_id {
            Some(patient_id) => patient_id == &task.patient_id,
            None => true,
        }
    }
}
