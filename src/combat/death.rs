//! Death and defeat handling
//!
//! [`handle_defeat`] is the single entry point the engine uses. It checks the
//! victim's defeat marker so a handler runs exactly once per death, and it
//! swallows handler errors: a death that failed halfway is still a death.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::actor::{combat_target_of, location_of, tell, Actor, ActorId, ActorRef};

#[derive(Debug, Error)]
pub enum DeathError {
    #[error("reward calculation failed: {0}")]
    Reward(String),
    #[error("remains creation failed: {0}")]
    Remains(String),
}

/// What a killer earns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reward {
    pub experience: i64,
    pub currency: i64,
}

impl Reward {
    pub fn is_empty(&self) -> bool {
        self.experience == 0 && self.currency == 0
    }
}

/// Persistent remains left behind by a death (a corpse, a pile of dust)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remains {
    pub id: String,
    pub description: String,
    pub origin: ActorId,
}

/// Record of one defeat, as reported by a round
#[derive(Debug, Clone, Serialize)]
pub struct Defeat {
    pub victim: ActorId,
    pub killer: Option<ActorId>,
    pub remains: Option<Remains>,
}

pub trait DeathHandler: Send + Sync {
    fn handle(
        &self,
        victim: &ActorRef,
        killer: Option<&ActorRef>,
    ) -> Result<Option<Remains>, DeathError>;
}

/// External reward rule
pub trait RewardRule: Send + Sync {
    fn reward_for(&self, victim: &dyn Actor, killer: &dyn Actor) -> Result<Reward, DeathError>;
}

/// External remains factory
pub trait RemainsFactory: Send + Sync {
    fn create(&self, victim: &dyn Actor) -> Result<Remains, DeathError>;
}

/// Grants nothing
#[derive(Debug, Default)]
pub struct NoReward;

impl RewardRule for NoReward {
    fn reward_for(&self, _victim: &dyn Actor, _killer: &dyn Actor) -> Result<Reward, DeathError> {
        Ok(Reward::default())
    }
}

/// Leaves a corpse named after the victim
#[derive(Debug, Default)]
pub struct CorpseFactory;

impl RemainsFactory for CorpseFactory {
    fn create(&self, victim: &dyn Actor) -> Result<Remains, DeathError> {
        Ok(Remains {
            id: format!("corpse-{}", uuid::Uuid::new_v4()),
            description: format!("the corpse of {}", victim.name()),
            origin: victim.id().to_string(),
        })
    }
}

/// Clears combat bookkeeping, pays the killer, leaves remains
pub struct StandardDeathHandler {
    rewards: Arc<dyn RewardRule>,
    remains: Arc<dyn RemainsFactory>,
}

impl Default for StandardDeathHandler {
    fn default() -> Self {
        Self::new(Arc::new(NoReward), Arc::new(CorpseFactory))
    }
}

impl StandardDeathHandler {
    pub fn new(rewards: Arc<dyn RewardRule>, remains: Arc<dyn RemainsFactory>) -> Self {
        Self { rewards, remains }
    }

    fn pay(&self, victim: &ActorRef, killer: &ActorRef) -> Result<(), DeathError> {
        let reward = self.rewards.reward_for(&**victim, &**killer)?;
        if reward.is_empty() {
            return Ok(());
        }
        if let Some(sink) = killer.rewardable() {
            sink.receive_reward(&reward);
            tell(
                &**killer,
                &format!("You receive {} experience.", reward.experience),
            );
        }
        Ok(())
    }
}

impl DeathHandler for StandardDeathHandler {
    fn handle(
        &self,
        victim: &ActorRef,
        killer: Option<&ActorRef>,
    ) -> Result<Option<Remains>, DeathError> {
        if let Some(targeting) = victim.targeting() {
            targeting.set_combat_target(None);
        }

        if let Some(killer) = killer {
            let was_fighting_victim =
                combat_target_of(&**killer).is_some_and(|t| t.id() == victim.id());
            if was_fighting_victim {
                if let Some(targeting) = killer.targeting() {
                    targeting.set_combat_target(None);
                }
            }

            // A failed payout does not stop the remains from appearing
            if let Err(e) = self.pay(victim, killer) {
                warn!("No reward for killing {}: {}", victim.id(), e);
            }
        }

        if let Some(room) = location_of(&**victim) {
            room.broadcast(&format!("{} is dead! R.I.P.", victim.name()));
        }

        let remains = self.remains.create(&**victim)?;
        Ok(Some(remains))
    }
}

/// Run the death handler for `victim` unless its death was already handled.
///
/// Returns `None` if the victim's defeat marker was already set.
pub fn handle_defeat(
    handler: &dyn DeathHandler,
    victim: &ActorRef,
    killer: Option<&ActorRef>,
) -> Option<Defeat> {
    if !victim.defeat_marker().mark() {
        return None;
    }

    info!(
        "{} defeated by {}",
        victim.id(),
        killer.map(|k| k.id()).unwrap_or("nobody")
    );

    let remains = match handler.handle(victim, killer) {
        Ok(remains) => remains,
        Err(e) => {
            error!("Death handler failed for {}: {}", victim.id(), e);
            None
        }
    };

    Some(Defeat {
        victim: victim.id().to_string(),
        killer: killer.map(|k| k.id().to_string()),
        remains,
    })
}
