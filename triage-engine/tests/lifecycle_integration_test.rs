//! Lifecycle integration tests — task state machine and audit log
//! properties exercised through the public service API.
//!
//! Tests verify:
//! - Replaying a task's log reproduces its projection
//! - Closure requires a note of at least three characters
//! - Closed tasks reject further updates and closes
//! - MarkOverdue is idempotent
//! - Severity changes recompute the deadline

use std::sync::Arc;

use chrono::{Duration, Utc};
use triage_engine::{
    audit, Actor, ActorRole, AssigneeRole, CloseRequest, CreateTaskRequest, ErrorKind, IntentType,
    LogAction, ManualClock, MarkOverdueOutcome, MemoryStore, Severity, SourceType, TaskChanges,
    TaskFilter, TaskStatus, TriageService,
};

fn service() -> (TriageService, Arc<ManualClock>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let svc = TriageService::new(Arc::new(MemoryStore::new())).with_clock(clock.clone());
    (svc, clock)
}

fn symptom_report(severity: Option<Severity>) -> CreateTaskRequest {
    CreateTaskRequest {
        patient_id: Some("patient-42".to_string()),
        intent_type: Some(IntentType::SymptomReport),
        severity,
        source_message: Some("headache for three days".to_string()),
        source_type: Some(SourceType::Voice),
        supervising_clinician_id: Some("dr-house".to_string()),
        symptom_id: Some("sym-1".to_string()),
        ..Default::default()
    }
}

fn ma() -> Actor {
    Actor::new("ma-1", ActorRole::Ma)
}

fn close_with(note: &str) -> CloseRequest {
    CloseRequest::new(note, "ma-1", ActorRole::Ma)
}

// ── Scenario: default severity ─────────────────────────────────────

#[tokio::test]
async fn test_symptom_report_without_severity() {
    let (svc, _) = service();
    let task = svc.create(symptom_report(None)).await.unwrap();

    assert_eq!(task.severity, Severity::Routine);
    assert_eq!(task.assignee_role, Some(AssigneeRole::Ma));
    assert_eq!(task.status, TaskStatus::Open);
    assert!(task.closed_at.is_none());

    let logs = svc.logs(&task.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action_type, LogAction::Created);
}

#[tokio::test]
async fn test_missing_clinician_rejected() {
    let (svc, _) = service();
    let request = CreateTaskRequest {
        supervising_clinician_id: None,
        ..symptom_report(None)
    };
    let err = svc.create(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(svc.list(&TaskFilter::default()).unwrap().is_empty());
}

// ── Invariant: closure requires note ───────────────────────────────

#[tokio::test]
async fn test_closure_requires_note() {
    let (svc, _) = service();
    let task = svc.create(symptom_report(None)).await.unwrap();

    for note in ["", "ab"] {
        let err = svc.close(&task.id, close_with(note)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert_eq!(svc.get(&task.id).unwrap().version, 1);

    let closed = svc.close(&task.id, close_with("abc")).await.unwrap();
    assert_eq!(closed.status, TaskStatus::Completed);
    assert_eq!(closed.action_note.as_deref(), Some("abc"));
    assert_eq!(closed.handled_by_user_id.as_deref(), Some("ma-1"));
    assert!(closed.closed_at.is_some());
}

// ── Invariant: terminal immutability ───────────────────────────────

#[tokio::test]
async fn test_terminal_immutability() {
    let (svc, _) = service();
    let task = svc.create(symptom_report(None)).await.unwrap();
    svc.close(&task.id, close_with("advised rest and fluids"))
        .await
        .unwrap();

    let err = svc
        .update(
            &task.id,
            TaskChanges {
                severity: Some(Severity::Urgent),
                ..Default::default()
            },
            ma(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = svc
        .close(&task.id, close_with("closing again"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let logs = svc.logs(&task.id).unwrap();
    assert_eq!(logs.last().unwrap().action_type, LogAction::Closed);
}

#[tokio::test]
async fn test_cancel_closure() {
    let (svc, _) = service();
    let task = svc.create(symptom_report(None)).await.unwrap();
    let cancelled = svc
        .close(&task.id, close_with("duplicate of earlier call").cancelled())
        .await
        .unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(audit::closure_consistent(&cancelled));
}

// ── Idempotence ────────────────────────────────────────────────────

#[tokio::test]
async fn test_mark_overdue_idempotent() {
    let (svc, clock) = service();
    let task = svc.create(symptom_report(Some(Severity::Urgent))).await.unwrap();
    clock.advance(Duration::hours(5));

    assert!(matches!(
        svc.mark_overdue(&task.id).await.unwrap(),
        MarkOverdueOutcome::Marked(_)
    ));
    assert_eq!(
        svc.mark_overdue(&task.id).await.unwrap(),
        MarkOverdueOutcome::AlreadyOverdue
    );

    let task = svc.get(&task.id).unwrap();
    assert!(task.is_overdue);
    let marks = svc
        .logs(&task.id)
        .unwrap()
        .iter()
        .filter(|l| l.action_type == LogAction::MarkedOverdue)
        .count();
    assert_eq!(marks, 1);
}

#[tokio::test]
async fn test_closing_clears_overdue() {
    let (svc, clock) = service();
    let task = svc.create(symptom_report(Some(Severity::Emergent))).await.unwrap();
    clock.advance(Duration::hours(2));
    svc.mark_overdue(&task.id).await.unwrap();

    let closed = svc
        .close(&task.id, close_with("sent to urgent care"))
        .await
        .unwrap();
    assert!(!closed.is_overdue);
    assert!(audit::closure_consistent(&closed));
}

// ── Deadline recomputation ─────────────────────────────────────────

#[tokio::test]
async fn test_deadline_recomputed_on_severity_change() {
    let (svc, _) = service();
    let task = svc.create(symptom_report(Some(Severity::Routine))).await.unwrap();

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

    assert!(updated.deadline_at < task.deadline_at);
    let policy = svc.policy().resolve(Severity::Emergent);
    assert_eq!(updated.deadline_at, task.opened_at + policy.response_window);

    let logs = svc.logs(&task.id).unwrap();
    assert_eq!(logs.last().unwrap().action_type, LogAction::SeverityChanged);
}

#[tokio::test]
async fn test_in_progress_and_intent_correction() {
    let (svc, _) = service();
    let task = svc.create(symptom_report(None)).await.unwrap();

    let updated = svc
        .update(
            &task.id,
            TaskChanges {
                status: Some(TaskStatus::InProgress),
                intent_type: Some(IntentType::RefillRequest),
                ..Default::default()
            },
            ma(),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::InProgress);
    assert_eq!(updated.intent_type, IntentType::RefillRequest);

    let logs = svc.logs(&task.id).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].action_type, LogAction::UpdatedPriority);
}

// ── Invariant: log completeness ────────────────────────────────────

#[tokio::test]
async fn test_replay_reproduces_projection() {
    let (svc, clock) = service();
    let task = svc.create(symptom_report(None)).await.unwrap();

    clock.advance(Duration::minutes(15));
    svc.update(
        &task.id,
        TaskChanges {
            severity: Some(Severity::Urgent),
            notes: Some("called patient, no answer".to_string()),
            ..Default::default()
        },
        ma(),
    )
    .await
    .unwrap();

    clock.advance(Duration::hours(5));
    svc.mark_overdue(&task.id).await.unwrap();

    clock.advance(Duration::minutes(30));
    svc.update(
        &task.id,
        TaskChanges {
            assignee_role: Some(AssigneeRole::Clinician),
            assigned_user_id: Some("dr-house".to_string()),
            ..Default::default()
        },
        Actor::new("ma-1", ActorRole::Ma),
    )
    .await
    .unwrap();

    svc.record_appointment_booked(&task.id, "appt-3", Actor::new("dr-house", ActorRole::Clinician))
        .await
        .unwrap();
    svc.close(
        &task.id,
        CloseRequest::new("seen in clinic", "dr-house", ActorRole::Clinician),
    )
    .await
    .unwrap();

    let stored = svc.get(&task.id).unwrap();
    let logs = svc.logs(&task.id).unwrap();
    let replayed = audit::rebuild(&logs).unwrap();

    assert_eq!(replayed.status, stored.status);
    assert_eq!(replayed.severity, stored.severity);
    assert_eq!(replayed.assignee_role, stored.assignee_role);
    assert_eq!(replayed.closed_at, stored.closed_at);
    assert_eq!(replayed, stored);

    let sequences: Vec<u64> = logs.iter().map(|l| l.sequence).collect();
    assert_eq!(sequences, (1..=stored.version).collect::<Vec<u64>>());
    assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let report = svc.verify(&task.id).unwrap();
    assert!(report.consistent, "{:?}", report);
    assert_eq!(report.log_entries, logs.len());
}

#[tokio::test]
async fn test_first_action_set_once() {
    let (svc, clock) = service();
    let task = svc.create(symptom_report(None)).await.unwrap();

    clock.advance(Duration::minutes(5));
    let first = svc
        .update(
            &task.id,
            TaskChanges {
                notes: Some("reviewing".to_string()),
                ..Default::default()
            },
            ma(),
        )
        .await
        .unwrap();
    let first_at = first.first_action_at.unwrap();

    clock.advance(Duration::minutes(5));
    let second = svc
        .update(
            &task.id,
            TaskChanges {
                notes: Some("left voicemail".to_string()),
                ..Default::default()
            },
            ma(),
        )
        .await
        .unwrap();
    assert_eq!(second.first_action_at, Some(first_at));
    assert!(second.last_action_at > first_at);
}

#[tokio::test]
async fn test_listing_filters_and_order() {
    let (svc, _) = service();
    let routine = svc.create(symptom_report(None)).await.unwrap();
    let emergent = svc.create(symptom_report(Some(Severity::Emergent))).await.unwrap();
    let urgent = svc.create(symptom_report(Some(Severity::Urgent))).await.unwrap();

    let all: Vec<String> = svc
        .list(&TaskFilter::default())
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(all, vec![emergent.id.clone(), urgent.id, routine.id.clone()]);

    let only_emergent = svc
        .list(&TaskFilter {
            severity: Some(Severity::Emergent),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(only_emergent.len(), 1);

    svc.close(&routine.id, close_with("answered by phone"))
        .await
        .unwrap();
    let open = svc
        .list(&TaskFilter {
            status: Some(TaskStatus::Open),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(open.len(), 2);
    assert!(open.iter().all(|t| t.id != routine.id));
}
