//! Triage Server
//!
//! HTTP surface of the triage engine plus the supervised escalation sweep.
//!
//! # Routes
//!
//! - `POST  /triage/tasks`                  create from an intake signal
//! - `GET   /triage/tasks`                  filtered listing (`status`, `severity`, `intentType`, `patientId`, `overdue`)
//! - `GET   /triage/tasks/:id`              single task
//! - `PATCH /triage/tasks/:id`              severity / assignee / notes / workflow update
//! - `POST  /triage/tasks/:id/close`        close with action note
//! - `POST  /triage/tasks/:id/appointment`  record a booked appointment
//! - `GET   /triage/tasks/:id/logs`         audit trail
//! - `POST  /triage/tasks/:id/logs`         manual comment or note
//! - `GET   /triage/tasks/:id/verify`       replay consistency check
//! - `POST  /triage/tasks/mark-overdue`     run one sweep pass now
//! - `GET   /health`                        liveness

pub mod api;
pub mod config;
pub mod error;

use std::sync::Arc;

use triage_engine::{EscalationSweep, SharedTriageService};

pub use api::router;
pub use config::ServerConfig;
pub use error::ApiError;

/// Shared state for the Axum application
#[derive(Clone)]
pub struct AppState {
    pub service: SharedTriageService,
    pub sweep: Arc<EscalationSweep>,
}

impl AppState {
    pub fn new(service: SharedTriageService) -> Self {
        let sweep = EscalationSweep::new(service.clone()).shared();
        Self { service, sweep }
    }
}
