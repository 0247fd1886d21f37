//! Errors crossing the engine/instance/manager boundary

use thiserror::Error;

use crate::actor::{ActorId, PersistError};

#[derive(Debug, Error)]
pub enum CombatError {
    #[error("{0} is not in combat")]
    NotInCombat(ActorId),

    #[error("{0} is not a participant of this encounter")]
    NotParticipant(ActorId),

    #[error("combat instance {0} has already ended")]
    InstanceEnded(String),

    #[error("no combatant could join")]
    NoCombatants,

    #[error(transparent)]
    Persist(#[from] PersistError),
}
