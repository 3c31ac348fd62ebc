//! Column family and key layout for the durable task store.

/// Column family for task projections
pub const CF_TASKS: &str = "tasks";

/// Column family for audit entries
pub const CF_TASK_LOGS: &str = "task_logs";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_TASKS, CF_TASK_LOGS];

/// Key prefixes for compound keys
pub mod keys {
    /// Prefix shared by every task key
    pub const TASK_PREFIX: &str = "task:";

    /// Create a task key
    pub fn task(task_id: &str) -> String {
        format!("{}{}", TASK_PREFIX, task_id)
    }

    /// Prefix of every log key for one task
    pub fn log_prefix(task_id: &str) -> String {
        format!("log:{}:", task_id)
    }

    /// Create a log key (zero-padded sequence so lexical order is replay order)
    pub fn log(task_id: &str, sequence: u64) -> String {
        format!("{}{:020}", log_prefix(task_id), sequence)
    }

    /// Parse the sequence back out of a log key
    pub fn parse_log_sequence(key: &str) -> Option<u64> {
        key.rsplit(':').next()?.parse().ok()
    }
}
