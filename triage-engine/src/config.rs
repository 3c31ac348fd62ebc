//! Engine configuration.
//!
//! Defaults come from `TRIAGE_*` environment variables with hard-coded
//! fallbacks. A TOML file may override any field. `validate()` must pass
//! before the config is used; a bad policy table is fatal at startup.

use std::path::Path;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};

use crate::policy::SeverityPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Response windows in minutes, one per known severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub emergent_window_minutes: i64,
    pub urgent_window_minutes: i64,
    pub routine_window_minutes: i64,
}

impl PolicyConfig {
    /// Compiled-in windows, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            emergent_window_minutes: 60,
            urgent_window_minutes: 4 * 60,
            routine_window_minutes: 48 * 60,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let builtin = Self::builtin();
        Self {
            emergent_window_minutes: env_or(
                "TRIAGE_EMERGENT_WINDOW_MINUTES",
                builtin.emergent_window_minutes,
            ),
            urgent_window_minutes: env_or(
                "TRIAGE_URGENT_WINDOW_MINUTES",
                builtin.urgent_window_minutes,
            ),
            routine_window_minutes: env_or(
                "TRIAGE_ROUTINE_WINDOW_MINUTES",
                builtin.routine_window_minutes,
            ),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub policy: PolicyConfig,
    /// Seconds between escalation sweeps.
    pub sweep_interval_secs: u64,
    /// Maximum wait for the per-task lock.
    pub lock_timeout_ms: u64,
    /// Upper bound for a whole mutating operation.
    pub operation_timeout_ms: u64,
    /// Store-level CAS conflicts retried before surfacing.
    pub max_conflict_retries: u32,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            sweep_interval_secs: env_or("TRIAGE_SWEEP_INTERVAL_SECS", 300),
            lock_timeout_ms: env_or("TRIAGE_LOCK_TIMEOUT_MS", 2_000),
            operation_timeout_ms: env_or("TRIAGE_OPERATION_TIMEOUT_MS", 5_000),
            max_conflict_retries: env_or("TRIAGE_MAX_CONFLICT_RETRIES", 3),
        }
    }
}

impl TriageConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check every field and build the severity table.
    pub fn validate(&self) -> Result<SeverityPolicy, ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock and operation timeouts must be positive".to_string(),
            ));
        }
        if self.lock_timeout_ms > self.operation_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "lock_timeout_ms ({}) must not exceed operation_timeout_ms ({})",
                self.lock_timeout_ms, self.operation_timeout_ms
            )));
        }
        SeverityPolicy::from_config(&self.policy)
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval_secs)
    }

    pub fn lock_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.lock_timeout_ms)
    }

    pub fn operation_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.operation_timeout_ms)
    }
}
