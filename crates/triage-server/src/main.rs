//! Triage escalation server
//!
//! # Usage
//!
//! ```bash
//! # In-memory store, sweep every 5 minutes
//! triage-server --bind 0.0.0.0:8080
//!
//! # Durable store with a config override
//! TRIAGE_ROUTINE_WINDOW_MINUTES=1440 triage-server --state-dir ./triage-state --config triage.toml
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use triage_engine::{EventBus, EventFilter, LogAction, SharedTaskStore, TriageService};
use triage_server::{router, AppState, ServerConfig};

fn open_store(config: &ServerConfig) -> Result<SharedTaskStore> {
    match &config.state_dir {
        #[cfg(feature = "rocksdb-store")]
        Some(dir) => {
            let store = triage_engine::RocksStore::open(dir)
                .with_context(|| format!("Failed to open state directory {}", dir.display()))?;
            info!(path = %dir.display(), "Using RocksDB task store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "rocksdb-store"))]
        Some(dir) => anyhow::bail!(
            "--state-dir {} requires the rocksdb-store feature",
            dir.display()
        ),
        None => {
            warn!("No state directory given; tasks are kept in memory only");
            Ok(Arc::new(triage_engine::MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let server_config = ServerConfig::parse();
    let triage_config = server_config.triage_config()?;
    let store = open_store(&server_config)?;

    let events = EventBus::new().shared();
    let service = TriageService::from_config(store, &triage_config)
        .context("Invalid triage engine configuration")?
        .with_events(events.clone())
        .shared();
    let state = AppState::new(service);
    let cancel = CancellationToken::new();

    // Overdue alerts off the event bus
    let mut overdue_rx = events.subscribe();
    let overdue_filter = EventFilter::new().actions(vec![LogAction::MarkedOverdue]);
    let alert_cancel = cancel.clone();
    let alerts = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = alert_cancel.cancelled() => break,
                received = overdue_rx.recv() => match received {
                    Ok(entry) if overdue_filter.matches(&entry) => {
                        warn!(task_id = %entry.task_id, at = %entry.timestamp, "ALERT: triage task overdue");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Alert listener lagged; audit log remains authoritative");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let sweep = if server_config.no_sweep {
        info!("Background sweep disabled");
        None
    } else {
        Some(
            state
                .sweep
                .clone()
                .spawn(triage_config.sweep_interval(), cancel.clone()),
        )
    };

    let app = router(state);
    let listener = TcpListener::bind(server_config.bind)
        .await
        .with_context(|| format!("Failed to bind to address: {}", server_config.bind))?;
    info!(addr = %server_config.bind, "Triage server listening");

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
                _ = cancel.cancelled() => {}
            }
            cancel.cancel();
        }
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("Triage server failed")?;

    cancel.cancel();
    if let Some(handle) = sweep {
        let _ = handle.await;
    }
    let _ = alerts.await;
    info!("Triage server stopped");
    Ok(())
}
