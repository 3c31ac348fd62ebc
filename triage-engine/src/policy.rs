//! Severity Policy — response window and default assignee per severity
//!
//! Pure mapping with no side effects. The table is a struct with one field
//! per severity and lookup is an exhaustive `match`, so adding a severity
//! without a policy fails to compile instead of falling back at runtime.
//!
//! ```text
//! EMERGENT → CLINICIAN, shortest window
//! URGENT   → MA,        short window
//! ROUTINE  → MA,        long window
//! UNKNOWN  → MA,        ROUTINE window + needs re-triage
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, PolicyConfig};

/// Urgency classification driving the SLA deadline and default assignee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Routine,
    Urgent,
    Emergent,
    Unknown,
}

impl Severity {
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Routine,
            Severity::Urgent,
            Severity::Emergent,
            Severity::Unknown,
        ]
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Routine => write!(f, "ROUTINE"),
            Self::Urgent => write!(f, "URGENT"),
            Self::Emergent => write!(f, "EMERGENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Role a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssigneeRole {
    /// Medical assistant
    Ma,
    Clinician,
}

impl std::fmt::Display for AssigneeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ma => write!(f, "MA"),
            Self::Clinician => write!(f, "CLINICIAN"),
        }
    }
}

/// Longest accepted response window: one leap year.
pub const MAX_WINDOW_MINUTES: i64 = 366 * 24 * 60;

/// Resolved policy for one severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEntry {
    pub response_window: Duration,
    pub default_role: AssigneeRole,
    /// Set for UNKNOWN: deadline behaves like ROUTINE but a human must
    /// re-classify the task.
    pub requires_retriage: bool,
}

impl PolicyEntry {
    /// `opened_at` plus the response window; `None` if that leaves chrono's range.
    pub fn deadline_from(&self, opened_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        opened_at.checked_add_signed(self.response_window)
    }
}

/// Validated severity → policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityPolicy {
    emergent: PolicyEntry,
    urgent: PolicyEntry,
    routine: PolicyEntry,
}

impl SeverityPolicy {
    /// Build the table from configured windows.
    ///
    /// Windows must be positive, at most [`MAX_WINDOW_MINUTES`], and ordered
    /// `EMERGENT < URGENT <= ROUTINE`.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        let windows = [
            ("emergent", config.emergent_window_minutes),
            ("urgent", config.urgent_window_minutes),
            ("routine", config.routine_window_minutes),
        ];
        for (name, minutes) in windows {
            if minutes <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} response window must be positive, got {} minutes",
                    name, minutes
                )));
            }
            if minutes > MAX_WINDOW_MINUTES {
                return Err(ConfigError::Invalid(format!(
                    "{} response window of {} minutes exceeds the {} minute maximum",
                    name, minutes, MAX_WINDOW_MINUTES
                )));
            }
        }
        if config.emergent_window_minutes >= config.urgent_window_minutes {
            return Err(ConfigError::Invalid(format!(
                "emergent window ({}m) must be shorter than urgent window ({}m)",
                config.emergent_window_minutes, config.urgent_window_minutes
            )));
        }
        if config.urgent_window_minutes > config.routine_window_minutes {
            return Err(ConfigError::Invalid(format!(
                "urgent window ({}m) must not exceed routine window ({}m)",
                config.urgent_window_minutes, config.routine_window_minutes
            )));
        }

        Ok(Self::build(config))
    }

    fn build(config: &PolicyConfig) -> Self {
        Self {
            emergent: PolicyEntry {
                response_window: Duration::minutes(config.emergent_window_minutes),
                default_role: AssigneeRole::Clinician,
                requires_retriage: false,
            },
            urgent: PolicyEntry {
                response_window: Duration::minutes(config.urgent_window_minutes),
                default_role: AssigneeRole::Ma,
                requires_retriage: false,
            },
            routine: PolicyEntry {
                response_window: Duration::minutes(config.routine_window_minutes),
                default_role: AssigneeRole::Ma,
                requires_retriage: false,
            },
        }
    }

    /// Total lookup.
    pub fn resolve(&self, severity: Severity) -> PolicyEntry {
        match severity {
            Severity::Emergent => self.emergent,
            Severity::Urgent => self.urgent,
            Severity::Routine => self.routine,
            Severity::Unknown => PolicyEntry {
                requires_retriage: true,
                ..self.routine
            },
        }
    }
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self::build(&PolicyConfig::builtin())
    }
}
