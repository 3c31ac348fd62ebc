//! Server configuration
//!
//! Process-level settings come from CLI flags with environment fallbacks.
//! Engine settings (policy windows, timeouts) come from [`TriageConfig`],
//! optionally overridden by a TOML file.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use triage_engine::TriageConfig;

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "TRIAGE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// TOML file overriding engine defaults
    #[arg(long, env = "TRIAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// RocksDB state directory (requires the rocksdb-store feature)
    #[arg(long, env = "TRIAGE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Seconds between sweeps (overrides the engine config)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Disable the background sweep; passes run only via POST /triage/tasks/mark-overdue
    #[arg(long, default_value_t = false)]
    pub no_sweep: bool,
}

impl ServerConfig {
    /// Load and validate engine configuration. Any error here is fatal.
    pub fn triage_config(&self) -> Result<TriageConfig> {
        let mut config = match &self.config {
            Some(path) => TriageConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => TriageConfig::default(),
        };
        if let Some(secs) = self.sweep_interval_secs {
            config.sweep_interval_secs = secs;
        }
        config
            .validate()
            .context("Invalid triage engine configuration")?;
        Ok(config)
    }
}
