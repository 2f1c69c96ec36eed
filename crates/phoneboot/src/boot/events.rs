//! Bootstrap event definitions and bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::state::BootState;

/// Bootstrap event types.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BootEvent {
    /// The state machine moved.
    Transition {
        from: BootState,
        to: BootState,
        timestamp: i64,
    },
    /// A component failed without aborting the bootstrap.
    Degraded {
        component: String,
        message: String,
        timestamp: i64,
    },
}

/// Event bus for bootstrap events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BootEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BootEvent> {
        self.sender.subscribe()
    }

    /// Publish an event.
    pub fn publish(&self, event: BootEvent) {
        // Ignore SendError (no subscribers)
        let _ = self.sender.send(event);
    }
}
