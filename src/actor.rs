//! Actor capability surface
//!
//! The engine never owns actors. Hosts hand it [`ActorRef`]s and the engine
//! queries narrow capabilities one at a time: an actor that cannot receive
//! messages simply returns `None` from [`Actor::messageable`], and so on.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::ai::AiControlled;
use crate::combat::{Action, Attack, Reward};

/// Stable actor identifier (host-assigned)
pub type ActorId = String;

/// Shared handle to a host actor
pub type ActorRef = Arc<dyn Actor>;

/// Persistence failed for an actor joining combat
#[derive(Debug, Error)]
#[error("failed to persist {actor}: {reason}")]
pub struct PersistError {
    pub actor: ActorId,
    pub reason: String,
}

/// A per-turn hook returned an error
#[derive(Debug, Error)]
#[error("turn hook failed: {0}")]
pub struct HookError(pub String);

/// Movement or item pickup was refused by the host
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("no exit named '{0}'")]
    NoSuchExit(String),
    #[error("nothing named '{0}' here")]
    NoSuchItem(String),
    #[error("movement blocked: {0}")]
    Blocked(String),
}

/// "Already processed" flag for defeat handling.
///
/// Hosts embed one per actor; it is what makes death handling exactly-once
/// even when several lethal actions land in the same round.
#[derive(Debug, Default)]
pub struct DefeatMarker(AtomicBool);

impl DefeatMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as defeated. Returns true only for the first caller.
    pub fn mark(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_marked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the marker (respawn)
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Core actor surface. Everything beyond health and identity is optional.
pub trait Actor: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> String;
    fn health(&self) -> i32;
    fn max_health(&self) -> i32;
    fn set_health(&self, hp: i32);
    fn defeat_marker(&self) -> &DefeatMarker;

    fn is_alive(&self) -> bool {
        self.health() > 0
    }

    /// Attack used when the engine has to pick an action on the actor's behalf
    fn natural_attack(&self) -> Attack {
        Attack::default()
    }

    /// Allies never pick each other as targets
    fn faction(&self) -> Option<&str> {
        None
    }

    fn messageable(&self) -> Option<&dyn Messageable> {
        None
    }

    fn locatable(&self) -> Option<&dyn Locatable> {
        None
    }

    fn persistable(&self) -> Option<&dyn Persistable> {
        None
    }

    fn turn_hook(&self) -> Option<&dyn TurnHook> {
        None
    }

    fn targeting(&self) -> Option<&dyn Targeting> {
        None
    }

    fn rewardable(&self) -> Option<&dyn Rewardable> {
        None
    }

    fn scavenger(&self) -> Option<&dyn Scavenger> {
        None
    }

    fn ai(&self) -> Option<&dyn AiControlled> {
        None
    }
}

impl fmt::Debug for dyn Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id())
            .field("hp", &self.health())
            .finish()
    }
}

/// Receives direct text messages
pub trait Messageable {
    fn send(&self, message: &str);
}

/// A place actors stand in. Broadcast must never fail.
pub trait Location: Send + Sync {
    fn id(&self) -> &str;
    fn broadcast(&self, message: &str);
    fn occupants(&self) -> Vec<ActorRef>;
    fn exits(&self) -> Vec<String>;

    /// Loose items lying here, by name
    fn items(&self) -> Vec<String> {
        Vec::new()
    }
}

pub trait Locatable {
    fn location(&self) -> Option<Arc<dyn Location>>;
    fn travel(&self, exit: &str) -> Result<(), MoveError>;
}

pub trait Persistable {
    /// Whether the actor has unsaved state that must hit storage first
    fn needs_save(&self) -> bool {
        true
    }
    fn save(&self) -> Result<(), PersistError>;
}

/// What a per-turn hook wants done with the actor's queue
#[derive(Debug, Default)]
pub enum TurnDirective {
    #[default]
    Keep,
    Append(Vec<Action>),
    Replace(Vec<Action>),
}

pub trait TurnHook {
    fn on_turn(&self, target: Option<&ActorRef>) -> Result<TurnDirective, HookError>;
}

/// The actor's current `combat_target`. Hosts should hold it weakly.
pub trait Targeting {
    fn combat_target(&self) -> Option<ActorRef>;
    fn set_combat_target(&self, target: Option<&ActorRef>);
}

pub trait Rewardable {
    fn receive_reward(&self, reward: &Reward);
}

pub trait Scavenger {
    fn take_item(&self, item: &str) -> Result<(), MoveError>;
}

/// Send a direct message if the actor can receive one
pub fn tell(actor: &dyn Actor, message: &str) {
    if let Some(sink) = actor.messageable() {
        sink.send(message);
    }
}

pub fn location_of(actor: &dyn Actor) -> Option<Arc<dyn Location>> {
    actor.locatable().and_then(|l| l.location())
}

pub fn combat_target_of(actor: &dyn Actor) -> Option<ActorRef> {
    actor.targeting().and_then(|t| t.combat_target())
}

/// Same faction (both must declare one)
pub fn are_allies(a: &dyn Actor, b: &dyn Actor) -> bool {
    matches!((a.faction(), b.faction()), (Some(x), Some(y)) if x == y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defeat_marker_first_caller_wins() {
        let marker = DefeatMarker::new();
        assert!(!marker.is_marked());
        assert!(marker.mark());
        assert!(!marker.mark());
        assert!(marker.is_marked());

        marker.clear();
        assert!(marker.mark());
    }
}
