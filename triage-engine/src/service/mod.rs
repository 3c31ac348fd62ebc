//! Triage Service — the task state machine
//!
//! All mutation flows through one private `mutate` path:
//!
//! ```text
//! acquire per-task lock (bounded wait)
//!   └─ loop (bounded conflict retries)
//!        read projection ─▶ build entries ─▶ apply() to a copy ─▶ commit(copy, entries, expected_version)
//! ```
//!
//! The whole sequence runs under the operation timeout. The commit is one
//! synchronous store call, so an abandoned request either landed in full
//! or left nothing behind.

pub mod locks;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{self, Divergence, LogDetails, TriageTaskLog};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, TriageConfig};
use crate::error::{TriageError, TriageResult};
use crate::events::SharedEventBus;
use crate::policy::{PolicyEntry, Severity, SeverityPolicy};
use crate::state::{SharedTaskStore, StoreError};
use crate::task::{
    Actor, ActorRole, CloseRequest, CreateTaskRequest, ManualLogEntry, TaskChanges, TaskFilter,
    TaskStatus, TriageTask,
};

pub use locks::{TaskLockGuard, TaskLocks};

/// Shared reference to a TriageService
pub type SharedTriageService = Arc<TriageService>;

/// Timing and retry limits for mutating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub lock_timeout: StdDuration,
    pub operation_timeout: StdDuration,
    pub max_conflict_retries: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            lock_timeout: StdDuration::from_millis(2_000),
            operation_timeout: StdDuration::from_millis(5_000),
            max_conflict_retries: 3,
        }
    }
}

impl From<&TriageConfig> for ServiceSettings {
    fn from(config: &TriageConfig) -> Self {
        Self {
            lock_timeout: config.lock_timeout(),
            operation_timeout: config.operation_timeout(),
            max_conflict_retries: config.max_conflict_retries,
        }
    }
}

/// Result of [`TriageService::mark_overdue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOverdueOutcome {
    /// Flag set and MARKED_OVERDUE logged.
    Marked(TriageTask),
    AlreadyOverdue,
    /// Deadline has not passed (it may have moved since selection).
    NotDue,
    Terminal,
}

/// Replay check for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub task_id: String,
    pub stored_version: u64,
    pub log_entries: usize,
    pub consistent: bool,
    pub closure_consistent: bool,
    pub divergences: Vec<Divergence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_error: Option<String>,
}

/// A committed mutation: the new projection and the entries that produced it.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub task: TriageTask,
    pub logs: Vec<TriageTaskLog>,
}

pub struct TriageService {
    store: SharedTaskStore,
    policy: SeverityPolicy,
    clock: Arc<dyn Clock>,
    locks: TaskLocks,
    settings: ServiceSettings,
    events: Option<SharedEventBus>,
}

impl TriageService {
    /// Service with the built-in policy and the wall clock.
    pub fn new(store: SharedTaskStore) -> Self {
        Self {
            store,
            policy: SeverityPolicy::default(),
            clock: Arc::new(SystemClock),
            locks: TaskLocks::new(),
            settings: ServiceSettings::default(),
            events: None,
        }
    }

    /// Validate `config` and build a service from it.
    pub fn from_config(store: SharedTaskStore, config: &TriageConfig) -> Result<Self, ConfigError> {
        let policy = config.validate()?;
        Ok(Self {
            policy,
            settings: ServiceSettings::from(config),
            ..Self::new(store)
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: SeverityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn shared(self) -> SharedTriageService {
        Arc::new(self)
    }

    pub fn policy(&self) -> &SeverityPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Open a task from a classified intake signal.
    pub async fn create(&self, request: CreateTaskRequest) -> TriageResult<TriageTask> {
        let new = request.validate()?;
        let now = self.clock.now();
        let entry = self.policy.resolve(new.severity);
        let deadline_at = deadline(&entry, now, new.severity)?;

        let task = TriageTask {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id: new.patient_id.clone(),
            intent_type: new.intent_type,
            severity: new.severity,
            status: TaskStatus::Open,
            assignee_role: Some(entry.default_role),
            assigned_user_id: None,
            assignment_explicit: false,
            supervising_clinician_id: new.supervising_clinician_id,
            source_type: new.source_type,
            source_message: new.source_message,
            source_reference: new.source_reference,
            notes: None,
            opened_at: now,
            first_action_at: None,
            last_action_at: now,
            closed_at: None,
            is_overdue: false,
            deadline_at,
            handled_by_user_id: None,
            handled_by_role: None,
            action_note: None,
            version: 1,
        };
        let created = TriageTaskLog::new(
            task.id.clone(),
            1,
            now,
            &Actor::new(new.patient_id, ActorRole::Patient),
            LogDetails::Created {
                task: Box::new(task.clone()),
                needs_retriage: entry.requires_retriage,
            },
        );

        self.bounded(async { self.store.insert(&task, &created).map_err(TriageError::from) })
            .await?;

        if entry.requires_retriage {
            warn!(
                task_id = %task.id,
                severity = %task.severity,
                needs_retriage = true,
                "Task created with unknown severity; routine deadline applied until re-triaged"
            );
        }
        info!(
            task_id = %task.id,
            intent = %task.intent_type,
            severity = %task.severity,
            deadline_at = %task.deadline_at,
            "Triage task created"
        );
        self.publish(std::slice::from_ref(&created));
        Ok(task)
    }

    /// Apply staff changes: severity, assignment, workflow status, intent, notes.
    ///
    /// One entry per distinct change kind. An update that changes nothing
    /// is logged as FIRST_ACTION on an untouched task and is a no-op
    /// otherwise.
    pub async fn update(
        &self,
        task_id: &str,
        changes: TaskChanges,
        actor: Actor,
    ) -> TriageResult<TriageTask> {
        changes.validate()?;
        require_staff(&actor, "update a task")?;
        let policy = self.policy;
        let mutation = self
            .mutate(task_id, |task, now| {
                if task.is_terminal() {
                    return Err(invalid_state(task, "be updated"));
                }
                let mut entries = Vec::new();

                let pinned = !changes.clear_assignment
                    && (changes.assignee_role.is_some()
                        || changes.assigned_user_id.is_some()
                        || task.assigned_user_id.is_some()
                        || task.assignment_explicit);
                let severity = changes.severity.unwrap_or(task.severity);

                let mut role = task.assignee_role;
                if severity != task.severity {
                    let entry = policy.resolve(severity);
                    let deadline_at = deadline(&entry, task.opened_at, severity)?;
                    if !pinned {
                        role = Some(entry.default_role);
                    }
                    entries.push(LogDetails::SeverityChanged {
                        from: task.severity,
                        to: severity,
                        deadline_at,
                        assignee_role: role,
                        overdue_cleared: task.is_overdue && deadline_at > now,
                        needs_retriage: entry.requires_retriage,
                    });
                }

                let (new_role, new_user, explicit) = if changes.clear_assignment {
                    (Some(policy.resolve(severity).default_role), None, false)
                } else {
                    let user = changes
                        .assigned_user_id
                        .clone()
                        .or_else(|| task.assigned_user_id.clone());
                    let explicit = task.assignment_explicit
                        || changes.assignee_role.is_some()
                        || user.is_some();
                    (changes.assignee_role.or(role), user, explicit)
                };
                if new_role != role
                    || new_user != task.assigned_user_id
                    || explicit != task.assignment_explicit
                {
                    entries.push(LogDetails::Reassigned {
                        assignee_role: new_role,
                        assigned_user_id: new_user,
                        explicit,
                    });
                }

                let status = changes.status.filter(|s| *s != task.status);
                let intent_type = changes.intent_type.filter(|i| *i != task.intent_type);
                if status.is_some() || intent_type.is_some() {
                    entries.push(LogDetails::WorkflowUpdated {
                        status,
                        intent_type,
                    });
                }

                if let Some(notes) = changes
                    .notes
                    .as_ref()
                    .filter(|n| task.notes.as_ref() != Some(*n))
                {
                    entries.push(LogDetails::NotesUpdated {
                        notes: notes.clone(),
                    });
                }

                if entries.is_empty() && task.first_action_at.is_none() {
                    entries.push(LogDetails::FirstAction);
                }
                Ok(entries
                    .into_iter()
                    .map(|details| (actor.clone(), details))
                    .collect())
            })
            .await?;

        if mutation.task.needs_retriage()
            && mutation
                .logs
                .iter()
                .any(|l| matches!(l.details, LogDetails::SeverityChanged { .. }))
        {
            warn!(
                task_id = %task_id,
                needs_retriage = true,
                "Severity set to unknown; routine deadline applied until re-triaged"
            );
        }
        Ok(mutation.task)
    }

    /// Close with a mandatory action note.
    pub async fn close(&self, task_id: &str, request: CloseRequest) -> TriageResult<TriageTask> {
        let closure = request.validate()?;
        let mutation = self
            .mutate(task_id, |task, _now| {
                if task.is_terminal() {
                    return Err(invalid_state(task, "be closed"));
                }
                Ok(vec![(
                    closure.handled_by.clone(),
                    LogDetails::Closed {
                        status: closure.status,
                        action_note: closure.action_note.clone(),
                        handled_by_user_id: closure.handled_by.id.clone(),
                        handled_by_role: closure.handled_by.role,
                    },
                )])
            })
            .await?;

        info!(
            task_id = %task_id,
            status = %mutation.task.status,
            handled_by = %closure.handled_by.id,
            "Triage task closed"
        );
        Ok(mutation.task)
    }

    /// Flag a task past its deadline. System-only; idempotent.
    ///
    /// The deadline is re-checked under the task lock, so a severity change
    /// that landed after the sweep selected the task is respected.
    pub async fn mark_overdue(&self, task_id: &str) -> TriageResult<MarkOverdueOutcome> {
        let mutation = self
            .mutate(task_id, |task, now| {
                if !task.is_overdue_at(now) {
                    return Ok(Vec::new());
                }
                Ok(vec![(
                    Actor::system(),
                    LogDetails::MarkedOverdue {
                        deadline_at: task.deadline_at,
                    },
                )])
            })
            .await?;

        let task = mutation.task;
        if !mutation.logs.is_empty() {
            warn!(
                task_id = %task.id,
                severity = %task.severity,
                deadline_at = %task.deadline_at,
                "Triage task overdue"
            );
            return Ok(MarkOverdueOutcome::Marked(task));
        }
        Ok(if task.is_terminal() {
            MarkOverdueOutcome::Terminal
        } else if task.is_overdue {
            MarkOverdueOutcome::AlreadyOverdue
        } else {
            MarkOverdueOutcome::NotDue
        })
    }

    /// Record that an appointment was booked for this task.
    pub async fn record_appointment_booked(
        &self,
        task_id: &str,
        appointment_id: &str,
        actor: Actor,
    ) -> TriageResult<TriageTask> {
        let appointment_id = appointment_id.trim();
        if appointment_id.is_empty() {
            return Err(TriageError::validation("appointmentId is required"));
        }
        require_staff(&actor, "record an appointment")?;
        let mutation = self
            .mutate(task_id, |task, _now| {
                if task.is_terminal() {
                    return Err(invalid_state(task, "book an appointment"));
                }
                Ok(vec![(
                    actor.clone(),
                    LogDetails::AppointmentBooked {
                        appointment_id: appointment_id.to_string(),
                    },
                )])
            })
            .await?;
        Ok(mutation.task)
    }

    /// Append a manual comment or note. Allowed on closed tasks; never
    /// changes task fields.
    pub async fn append_log(
        &self,
        task_id: &str,
        entry: ManualLogEntry,
    ) -> TriageResult<TriageTaskLog> {
        let note = entry.validate()?;
        let mutation = self
            .mutate(task_id, |_task, _now| {
                Ok(vec![(
                    note.actor.clone(),
                    LogDetails::Manual {
                        entry: note.kind,
                        text: note.text.clone(),
                        payload: note.payload.clone(),
                    },
                )])
            })
            .await?;
        mutation.logs.into_iter().next().ok_or_else(|| {
            TriageError::AuditInconsistency {
                task_id: task_id.to_string(),
                detail: "manual entry was not committed".to_string(),
            }
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, task_id: &str) -> TriageResult<TriageTask> {
        self.store
            .get(task_id)?
            .ok_or_else(|| TriageError::NotFound(task_id.to_string()))
    }

    pub fn list(&self, filter: &TaskFilter) -> TriageResult<Vec<TriageTask>> {
        Ok(self.store.list(filter)?)
    }

    /// Audit trail in sequence order.
    pub fn logs(&self, task_id: &str) -> TriageResult<Vec<TriageTaskLog>> {
        self.get(task_id)?;
        let mut logs = self.store.logs(task_id)?;
        logs.sort_by_key(|l| l.sequence);
        Ok(logs)
    }

    /// Active tasks whose deadline has passed and are not yet flagged.
    pub fn overdue_candidates(&self) -> TriageResult<Vec<TriageTask>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list(&TaskFilter::active())?
            .into_iter()
            .filter(|t| t.is_overdue_at(now))
            .collect())
    }

    /// Rebuild the task from its log and compare against the stored row.
    pub fn verify(&self, task_id: &str) -> TriageResult<VerifyReport> {
        let stored = self.get(task_id)?;
        let logs = self.logs(task_id)?;
        let closure_consistent = audit::closure_consistent(&stored);

        let report = match audit::rebuild(&logs) {
            Ok(replayed) => {
                let divergences = audit::diff(&stored, &replayed);
                VerifyReport {
                    task_id: task_id.to_string(),
                    stored_version: stored.version,
                    log_entries: logs.len(),
                    consistent: divergences.is_empty() && closure_consistent,
                    closure_consistent,
                    divergences,
                    replay_error: None,
                }
            }
            Err(e) => VerifyReport {
                task_id: task_id.to_string(),
                stored_version: stored.version,
                log_entries: logs.len(),
                consistent: false,
                closure_consistent,
                divergences: Vec::new(),
                replay_error: Some(e.to_string()),
            },
        };
        if !report.consistent {
            warn!(task_id = %task_id, divergences = report.divergences.len(), "Projection diverges from audit log");
        }
        Ok(report)
    }

    // =========================================================================
    // Mutation plumbing
    // =========================================================================

    /// Lock, read, build entries, fold, commit, all under the operation
    /// timeout. `build` returning no entries is a no-op.
    async fn mutate<F>(&self, task_id: &str, build: F) -> TriageResult<Mutation>
    where
        F: Fn(&TriageTask, DateTime<Utc>) -> TriageResult<Vec<(Actor, LogDetails)>>,
    {
        let mutation = self.bounded(self.mutate_locked(task_id, &build)).await?;
        self.publish(&mutation.logs);
        Ok(mutation)
    }

    async fn mutate_locked<F>(&self, task_id: &str, build: &F) -> TriageResult<Mutation>
    where
        F: Fn(&TriageTask, DateTime<Utc>) -> TriageResult<Vec<(Actor, LogDetails)>>,
    {
        let _guard = self
            .locks
            .acquire(task_id, self.settings.lock_timeout)
            .await?;

        let mut attempt = 0;
        loop {
            let current = self.get(task_id)?;
            let now = self.clock.now();
            let changes = build(&current, now)?;
            if changes.is_empty() {
                return Ok(Mutation {
                    task: current,
                    logs: Vec::new(),
                });
            }

            let mut next = current.clone();
            let mut logs = Vec::with_capacity(changes.len());
            for (actor, details) in changes {
                let log =
                    TriageTaskLog::new(current.id.clone(), next.version + 1, now, &actor, details);
                audit::apply(&mut next, &log).map_err(|e| TriageError::AuditInconsistency {
                    task_id: task_id.to_string(),
                    detail: e.to_string(),
                })?;
                logs.push(log);
            }

            match self.store.commit(&next, current.version, &logs) {
                Ok(()) => return Ok(Mutation { task: next, logs }),
                Err(StoreError::Conflict { found, .. })
                    if attempt < self.settings.max_conflict_retries =>
                {
                    attempt += 1;
                    debug!(task_id = %task_id, attempt, found, "Version conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run `fut` under the operation timeout.
    async fn bounded<T, Fut>(&self, fut: Fut) -> TriageResult<T>
    where
        Fut: std::future::Future<Output = TriageResult<T>>,
    {
        match tokio::time::timeout(self.settings.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TriageError::StoreUnavailable(format!(
                "operation timed out after {}ms",
                self.settings.operation_timeout.as_millis()
            ))),
        }
    }

    fn publish(&self, logs: &[TriageTaskLog]) {
        for log in logs {
            debug!(
                task_id = %log.task_id,
                sequence = log.sequence,
                action = %log.action_type,
                actor = %log.actor_id,
                "Audit entry committed"
            );
            if let Some(events) = &self.events {
                events.publish(log.clone());
            }
        }
    }
}

fn deadline(
    entry: &PolicyEntry,
    opened_at: DateTime<Utc>,
    severity: Severity,
) -> TriageResult<DateTime<Utc>> {
    entry.deadline_from(opened_at).ok_or_else(|| {
        TriageError::validation(format!(
            "{} response window puts the deadline out of range",
            severity
        ))
    })
}

fn require_staff(actor: &Actor, operation: &str) -> TriageResult<()> {
    if actor.role.is_staff() {
        return Ok(());
    }
    Err(TriageError::validation(format!(
        "only MA or CLINICIAN staff may {}, not {}",
        operation, actor.role
    )))
}

fn invalid_state(task: &TriageTask, operation: &'static str) -> TriageError {
    TriageError::InvalidState {
        task_id: task.id.clone(),
        operation,
        status: task.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogAction;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::events::EventBus;
    use crate::policy::{AssigneeRole, Severity};
    use crate::state::{MemoryStore, MockTaskStore};
    use crate::task::{IntentType, SourceType};
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(severity: Option<Severity>) -> CreateTaskRequest {
        CreateTaskRequest {
            patient_id: Some("p-1".to_string()),
            intent_type: Some(IntentType::RefillRequest),
            severity,
            source_message: Some("out of lisinopril".to_string()),
            source_type: Some(SourceType::Text),
            supervising_clinician_id: Some("dr-1".to_string()),
            refill_id: Some("rx-1".to_string()),
            ..Default::default()
        }
    }

    fn service() -> (TriageService, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::new());
        let svc = TriageService::new(store.clone()).with_clock(clock.clone());
        (svc, clock, store)
    }

    fn ma() -> Actor {
        Actor::new("ma-1", ActorRole::Ma)
    }

    fn actions(logs: &[TriageTaskLog]) -> Vec<LogAction> {
        logs.iter().map(|l| l.action_type).collect()
    }

    #[tokio::test]
    async fn test_create_routes_by_severity() {
        let (svc, clock, _) = service();
        let task = svc.create(request(Some(Severity::Emergent))).await.unwrap();
        assert_eq!(task.assignee_role, Some(AssigneeRole::Clinician));
        assert_eq!(task.deadline_at, clock.now() + Duration::minutes(60));
        assert_eq!(task.version, 1);

        let logs = svc.logs(&task.id).unwrap();
        assert_eq!(actions(&logs), vec![LogAction::Created]);
        assert_eq!(logs[0].actor_role, ActorRole::Patient);
    }

    #[tokio::test]
    async fn test_unknown_severity_flags_retriage() {
        let (svc, _, _) = service();
        let task = svc.create(request(Some(Severity::Unknown))).await.unwrap();
        assert!(task.needs_retriage());
        assert_eq!(task.assignee_role, Some(AssigneeRole::Ma));
        assert_eq!(task.deadline_at - task.opened_at, Duration::minutes(2880));

        let logs = svc.logs(&task.id).unwrap();
        assert!(matches!(
            logs[0].details,
            LogDetails::Created {
                needs_retriage: true,
                ..
            }
        ));

        let task = svc
            .update(
                &task.id,
                TaskChanges {
                    severity: Some(Severity::Urgent),
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();
        assert!(!task.needs_retriage());
    }

    #[tokio::test]
    async fn test_severity_and_assignment_in_one_update() {
        let (svc, clock, _) = service();
        let task = svc.create(request(None)).await.unwrap();
        clock.advance(Duration::minutes(10));

        let updated = svc
            .update(
                &task.id,
                TaskChanges {
                    severity: Some(Severity::Urgent),
                    assigned_user_id: Some("ma-7".to_string()),
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();

        assert_eq!(updated.deadline_at, task.opened_at + Duration::minutes(240));
        assert_eq!(updated.assigned_user_id.as_deref(), Some("ma-7"));
        assert_eq!(updated.first_action_at, Some(clock.now()));
        assert_eq!(
            actions(&svc.logs(&task.id).unwrap()),
            vec![
                LogAction::Created,
                LogAction::SeverityChanged,
                LogAction::Reassigned
            ]
        );
    }

    #[tokio::test]
    async fn test_severity_change_rederives_role() {
        let (svc, _, _) = service();
        let task = svc.create(request(None)).await.unwrap();
        let updated = svc
            .update(
                &task.id,
                TaskChanges {
                    severity: Some(Severity::Emergent),
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();
        assert_eq!(updated.assignee_role, Some(AssigneeRole::Clinician));

        // An explicitly assigned user keeps the role
        let task = svc.create(request(None)).await.unwrap();
        svc.update(
            &task.id,
            TaskChanges {
                assigned_user_id: Some("ma-2".to_string()),
                ..Default::default()
            },
            ma(),
        )
        .await
        .unwrap();
        let updated = svc
            .update(
                &task.id,
                TaskChanges {
                    severity: Some(Severity::Emergent),
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();
        assert_eq!(updated.assignee_role, Some(AssigneeRole::Ma));
    }

    #[tokio::test]
    async fn test_explicit_role_survives_severity_change_in_either_order() {
        let (svc, _, _) = service();
        let reassign = TaskChanges {
            assignee_role: Some(AssigneeRole::Clinician),
            ..Default::default()
        };
        let escalate = TaskChanges {
            severity: Some(Severity::Urgent),
            ..Default::default()
        };

        for order in [[&reassign, &escalate], [&escalate, &reassign]] {
            let task = svc.create(request(None)).await.unwrap();
            for changes in order {
                svc.update(&task.id, changes.clone(), ma()).await.unwrap();
            }

            let stored = svc.get(&task.id).unwrap();
            assert_eq!(stored.severity, Severity::Urgent);
            assert_eq!(stored.assignee_role, Some(AssigneeRole::Clinician));
            assert!(stored.assignment_explicit);
            assert_eq!(svc.logs(&task.id).unwrap().len(), 3);
            assert!(svc.verify(&task.id).unwrap().consistent);
        }
    }

    #[tokio::test]
    async fn test_clear_assignment_returns_to_policy_default() {
        let (svc, _, _) = service();
        let task = svc.create(request(Some(Severity::Emergent))).await.unwrap();
        svc.update(
            &task.id,
            TaskChanges {
                assignee_role: Some(AssigneeRole::Ma),
                assigned_user_id: Some("ma-2".to_string()),
                ..Default::default()
            },
            ma(),
        )
        .await
        .unwrap();

        let cleared = svc
            .update(
                &task.id,
                TaskChanges {
                    clear_assignment: true,
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();
        assert_eq!(cleared.assigned_user_id, None);
        assert_eq!(cleared.assignee_role, Some(AssigneeRole::Clinician));
        assert!(!cleared.assignment_explicit);

        // Unpinned again, so the next severity change re-derives the role
        let routine = svc
            .update(
                &task.id,
                TaskChanges {
                    severity: Some(Severity::Routine),
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();
        assert_eq!(routine.assignee_role, Some(AssigneeRole::Ma));

        let logs = svc.logs(&task.id).unwrap();
        assert!(matches!(
            logs[2].details,
            LogDetails::Reassigned {
                assigned_user_id: None,
                explicit: false,
                ..
            }
        ));
        assert!(svc.verify(&task.id).unwrap().consistent);

        // Nothing left to clear: a touched task records nothing
        let version = routine.version;
        let again = svc
            .update(
                &task.id,
                TaskChanges {
                    clear_assignment: true,
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();
        assert_eq!(again.version, version);
    }

    #[tokio::test]
    async fn test_acknowledgement_then_noop() {
        let (svc, _, _) = service();
        let task = svc.create(request(None)).await.unwrap();
        let same = TaskChanges {
            severity: Some(Severity::Routine),
            ..Default::default()
        };

        let touched = svc.update(&task.id, same.clone(), ma()).await.unwrap();
        assert!(touched.first_action_at.is_some());
        let again = svc.update(&task.id, same, ma()).await.unwrap();
        assert_eq!(again.version, touched.version);
        assert_eq!(
            actions(&svc.logs(&task.id).unwrap()),
            vec![LogAction::Created, LogAction::FirstAction]
        );
    }

    #[tokio::test]
    async fn test_severity_change_clears_overdue_when_deadline_moves_out() {
        let (svc, clock, _) = service();
        let task = svc.create(request(Some(Severity::Urgent))).await.unwrap();
        clock.advance(Duration::hours(5));
        assert!(matches!(
            svc.mark_overdue(&task.id).await.unwrap(),
            MarkOverdueOutcome::Marked(_)
        ));

        let updated = svc
            .update(
                &task.id,
                TaskChanges {
                    severity: Some(Severity::Routine),
                    ..Default::default()
                },
                ma(),
            )
            .await
            .unwrap();
        assert!(!updated.is_overdue);
        assert!(svc.verify(&task.id).unwrap().consistent);
    }

    #[tokio::test]
    async fn test_mark_overdue_outcomes() {
        let (svc, clock, _) = service();
        let task = svc.create(request(None)).await.unwrap();
        assert_eq!(
            svc.mark_overdue(&task.id).await.unwrap(),
            MarkOverdueOutcome::NotDue
        );

        clock.advance(Duration::hours(49));
        assert!(matches!(
            svc.mark_overdue(&task.id).await.unwrap(),
            MarkOverdueOutcome::Marked(_)
        ));
        assert_eq!(
            svc.mark_overdue(&task.id).await.unwrap(),
            MarkOverdueOutcome::AlreadyOverdue
        );

        svc.close(&task.id, CloseRequest::new("refill sent", "ma-1", ActorRole::Ma))
            .await
            .unwrap();
        assert_eq!(
            svc.mark_overdue(&task.id).await.unwrap(),
            MarkOverdueOutcome::Terminal
        );
    }

    #[tokio::test]
    async fn test_appointment_and_manual_entries() {
        let (svc, _, _) = service();
        let task = svc.create(request(None)).await.unwrap();

        let booked = svc
            .record_appointment_booked(&task.id, "appt-9", ma())
            .await
            .unwrap();
        assert!(booked.first_action_at.is_some());

        let closed = svc
            .close(&task.id, CloseRequest::new("booked for friday", "ma-1", ActorRole::Ma))
            .await
            .unwrap();

        let entry = svc
            .append_log(
                &task.id,
                ManualLogEntry {
                    action_type: None,
                    text: Some("patient confirmed by sms".to_string()),
                    actor_id: Some("ma-1".to_string()),
                    actor_role: Some(ActorRole::Ma),
                    payload: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(entry.action_type, LogAction::CommentAdded);

        let after = svc.get(&task.id).unwrap();
        assert_eq!(after.last_action_at, closed.last_action_at);
        assert_eq!(after.status, TaskStatus::Completed);
        assert!(svc.verify(&task.id).unwrap().consistent);

        let err = svc
            .record_appointment_booked(&task.id, "appt-10", ma())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_staff_only_changes_reject_patient_and_system() {
        let (svc, _, _) = service();
        let task = svc.create(request(None)).await.unwrap();
        let escalate = TaskChanges {
            severity: Some(Severity::Emergent),
            ..Default::default()
        };

        for actor in [Actor::new("p-1", ActorRole::Patient), Actor::system()] {
            let err = svc
                .update(&task.id, escalate.clone(), actor.clone())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);

            let err = svc
                .record_appointment_booked(&task.id, "appt-2", actor)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        let stored = svc.get(&task.id).unwrap();
        assert_eq!(stored.severity, Severity::Routine);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_events_published_after_commit() {
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let svc = TriageService::new(Arc::new(MemoryStore::new())).with_events(bus);

        let task = svc.create(request(None)).await.unwrap();
        svc.close(&task.id, CloseRequest::new("handled", "ma-1", ActorRole::Ma))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().action_type, LogAction::Created);
        assert_eq!(rx.recv().await.unwrap().action_type, LogAction::Closed);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (svc, _, _) = service();
        let err = svc
            .close("missing", CloseRequest::new("handled", "ma-1", ActorRole::Ma))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(svc.logs("missing").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_store_unavailable_is_retryable() {
        let (svc, _, store) = service();
        let task = svc.create(request(None)).await.unwrap();
        store.set_available(false);

        let err = svc
            .close(&task.id, CloseRequest::new("handled", "ma-1", ActorRole::Ma))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(err.is_retryable());

        store.set_available(true);
        assert!(!svc.get(&task.id).unwrap().is_terminal());
    }

    fn stored_task() -> TriageTask {
        let now = Utc::now();
        TriageTask {
            id: "t-1".to_string(),
            patient_id: "p-1".to_string(),
            intent_type: IntentType::AdminTask,
            severity: Severity::Routine,
            status: TaskStatus::Open,
            assignee_role: Some(AssigneeRole::Ma),
            assigned_user_id: None,
            assignment_explicit: false,
            supervising_clinician_id: "dr-1".to_string(),
            source_type: SourceType::CheckIn,
            source_message: "insurance card update".to_string(),
            source_reference: None,
            notes: None,
            opened_at: now,
            first_action_at: None,
            last_action_at: now,
            closed_at: None,
            is_overdue: false,
            deadline_at: now + Duration::hours(48),
            handled_by_user_id: None,
            handled_by_role: None,
            action_note: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_conflict_retried_then_committed() {
        let task = stored_task();
        let mut store = MockTaskStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(Some(task.clone())));
        let commits = Arc::new(AtomicUsize::new(0));
        let counter = commits.clone();
        store.expect_commit().returning(move |t, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Conflict {
                    task_id: t.id.clone(),
                    expected: 1,
                    found: 2,
                })
            } else {
                Ok(())
            }
        });

        let svc = TriageService::new(Arc::new(store));
        let closed = svc
            .close("t-1", CloseRequest::new("updated card", "ma-1", ActorRole::Ma))
            .await
            .unwrap();
        assert_eq!(closed.status, TaskStatus::Completed);
        assert_eq!(commits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_retries() {
        let task = stored_task();
        let mut store = MockTaskStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(Some(task.clone())));
        store
            .expect_commit()
            .times(3)
            .returning(|t, expected, _| {
                Err(StoreError::Conflict {
                    task_id: t.id.clone(),
                    expected,
                    found: expected + 1,
                })
            });

        let svc = TriageService::new(Arc::new(store)).with_settings(ServiceSettings {
            max_conflict_retries: 2,
            ..ServiceSettings::default()
        });
        let err = svc
            .close("t-1", CloseRequest::new("updated card", "ma-1", ActorRole::Ma))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_validation_precedes_store_access() {
        // No expectations: any store call would panic the mock
        let svc = TriageService::new(Arc::new(MockTaskStore::new()));
        let err = svc
            .close("t-1", CloseRequest::new("ab", "ma-1", ActorRole::Ma))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = svc
            .update("t-1", TaskChanges::default(), ma())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
