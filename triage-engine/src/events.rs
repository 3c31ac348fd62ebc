//! Event bus for committed audit entries
//!
//! Every entry the service commits is broadcast after the commit lands.
//! Delivery is best-effort: the audit log in the store is the durable copy,
//! so a lagging or absent subscriber loses nothing that cannot be re-read.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::audit::{LogAction, TriageTaskLog};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<TriageTaskLog>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish a committed entry to all subscribers
    pub fn publish(&self, entry: TriageTaskLog) {
        let action = entry.action_type;
        let task_id = entry.task_id.clone();
        match self.sender.send(entry) {
            Ok(receivers) => debug!(%action, %task_id, receivers, "Audit entry published"),
            Err(_) => debug!(%action, %task_id, "Audit entry published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriageTaskLog> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Selective subscription filter
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub task_id: Option<String>,
    pub actions: Option<Vec<LogAction>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn actions(mut self, actions: Vec<LogAction>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn matches(&self, entry: &TriageTaskLog) -> bool {
        if let Some(ref tid) = self.task_id {
            if &entry.task_id != tid {
                return false;
            }
        }
        if let Some(ref actions) = self.actions {
            if !actions.contains(&entry.action_type) {
                return false;
            }
        }
        true
    }
}
