use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::navigation::graph::ScreenId;
use crate::scenario_engine::state::{FightStatus, RunState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PilotEvent {
    StateChanged {
        state: RunState,
    },
    RoundFinished {
        round: u32,
        success: bool,
        detail: String,
    },
    ItemFinished {
        index: usize,
        status: FightStatus,
    },
    Interrupt {
        screen: ScreenId,
        action: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Fan-out of run events. Sending never blocks and never fails the run:
/// with no subscriber the event is dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PilotEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PilotEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: PilotEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
