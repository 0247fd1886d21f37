//! Lifecycle notifications for external observers
//!
//! Fire-and-forget: emitting never blocks and never fails, even when nobody
//! is subscribed or a subscriber has fallen behind.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::actor::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CombatEvent {
    CombatStarted {
        instance_id: String,
        combatants: Vec<ActorId>,
    },
    RoundProcessed {
        instance_id: String,
        round: u64,
        actions: usize,
    },
    CombatantDefeated {
        instance_id: String,
        victim: ActorId,
        killer: Option<ActorId>,
    },
    CombatEnded {
        instance_id: String,
        reason: String,
    },
}

impl CombatEvent {
    pub fn instance_id(&self) -> &str {
        match self {
            CombatEvent::CombatStarted { instance_id, .. }
            | CombatEvent::RoundProcessed { instance_id, .. }
            | CombatEvent::CombatantDefeated { instance_id, .. }
            | CombatEvent::CombatEnded { instance_id, .. } => instance_id,
        }
    }
}

/// An event plus the wall-clock time it was emitted
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: CombatEvent,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CombatEvent) {
        // No receivers is not an error
        let _ = self.tx.send(EventEnvelope {
            at: Utc::now(),
            event,
        });
    }
}
