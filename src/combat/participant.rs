//! Per-actor, per-encounter combat state

use crate::actor::ActorRef;

use super::action::Action;

/// A queued action plus its submission index within the engine
#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub action: Action,
    pub seq: u64,
}

#[derive(Debug)]
pub struct CombatParticipant {
    pub actor: ActorRef,
    pub initiative: i32,
    pub next_action: Vec<QueuedAction>,
}

impl CombatParticipant {
    pub fn new(actor: ActorRef, initiative: i32) -> Self {
        Self {
            actor,
            initiative,
            next_action: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.actor.id()
    }

    pub fn is_alive(&self) -> bool {
        self.actor.is_alive()
    }

    pub fn has_queued(&self) -> bool {
        !self.next_action.is_empty()
    }

    /// Take every queued action; each entry leaves the queue exactly once
    pub fn drain(&mut self) -> Vec<QueuedAction> {
        std::mem::take(&mut self.next_action)
    }
}
