//! Escalation Sweep — periodic overdue detection
//!
//! A pull sweep: every pass re-selects candidates against the current
//! `deadline_at`, so severity changes between passes are always honoured.
//! At most one pass runs at a time; an overlapping trigger is skipped.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, TriageResult};
use crate::service::{MarkOverdueOutcome, SharedTriageService};
use crate::task::TriageTask;

/// Tasks flagged by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub count: usize,
    pub task_ids: Vec<String>,
    pub tasks: Vec<TriageTask>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepSummary),
    /// Another pass was already in flight.
    Skipped,
}

pub struct EscalationSweep {
    service: SharedTriageService,
    running: Mutex<()>,
}

impl EscalationSweep {
    pub fn new(service: SharedTriageService) -> Self {
        Self {
            service,
            running: Mutex::new(()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Run one pass.
    ///
    /// A store outage aborts the pass and is returned; per-task conflicts
    /// are logged and left for the next pass.
    pub async fn run_once(&self) -> TriageResult<SweepOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            info!("Escalation sweep already running, skipping");
            return Ok(SweepOutcome::Skipped);
        };

        let candidates = self.service.overdue_candidates()?;
        let mut summary = SweepSummary::default();

        for candidate in candidates {
            match self.service.mark_overdue(&candidate.id).await {
                Ok(MarkOverdueOutcome::Marked(task)) => {
                    summary.task_ids.push(task.id.clone());
                    summary.tasks.push(task);
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::StoreUnavailable => return Err(e),
                Err(e) => {
                    warn!(task_id = %candidate.id, kind = %e.kind(), "Failed to mark task overdue: {}", e)
                }
            }
        }

        summary.count = summary.tasks.len();
        if summary.count > 0 {
            warn!(count = summary.count, task_ids = ?summary.task_ids, "Escalation sweep flagged overdue tasks");
        } else {
            info!("Escalation sweep found no new overdue tasks");
        }
        Ok(SweepOutcome::Completed(summary))
    }

    /// Run passes every `every` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = every.as_secs(), "Escalation sweep started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(
                                kind = %e.kind(),
                                suggested_action = e.kind().suggested_action(),
                                "Escalation sweep failed, retrying next tick: {}",
                                e
                            );
                        }
                    }
                }
            }
            info!("Escalation sweep stopped");
        })
    }
}
