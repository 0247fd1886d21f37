//! Pipeline stages composed around the primary behavior

use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, info};

use super::{AiContext, AiError, AiStage, Decision, StageOutcome, StagePosition};
use crate::actor::{are_allies, combat_target_of};

/// Charmed actors follow their master's fight, until loyalty fails
#[derive(Debug, Default)]
pub struct CharmRebellion;

impl AiStage for CharmRebellion {
    fn name(&self) -> &str {
        "charm"
    }

    fn position(&self) -> StagePosition {
        StagePosition::Before
    }

    fn run(
        &self,
        ctx: &mut AiContext<'_>,
        decisions: &mut Vec<Decision>,
    ) -> Result<StageOutcome, AiError> {
        let Some(ai) = ctx.actor.ai() else {
            return Ok(StageOutcome::Continue);
        };
        let Some(charm) = ai.charm() else {
            return Ok(StageOutcome::Continue);
        };

        let master = ctx
            .occupants()
            .into_iter()
            .find(|o| o.id() == charm.master && o.is_alive());

        let roll: u32 = ctx.rng.random_range(1..=100);
        if roll > charm.loyalty {
            ai.release_charm();
            info!("{} broke free of {}", ctx.actor.id(), charm.master);
            decisions.push(Decision::Say("I serve no one!".to_string()));
            if let Some(master) = master {
                decisions.push(Decision::Engage(master));
            }
            return Ok(StageOutcome::Handled);
        }

        let foe = master
            .as_ref()
            .and_then(|m| combat_target_of(&**m))
            .filter(|t| t.is_alive() && t.id() != ctx.actor.id());
        if let Some(foe) = foe {
            decisions.push(Decision::Engage(foe));
        }
        Ok(StageOutcome::Handled)
    }
}

/// Flee through a random exit once health drops below the threshold
#[derive(Debug, Default)]
pub struct Wimpy;

impl AiStage for Wimpy {
    fn name(&self) -> &str {
        "wimpy"
    }

    fn position(&self) -> StagePosition {
        StagePosition::Before
    }

    fn run(
        &self,
        ctx: &mut AiContext<'_>,
        decisions: &mut Vec<Decision>,
    ) -> Result<StageOutcome, AiError> {
        let Some(threshold) = ctx.profile.wimpy else {
            return Ok(StageOutcome::Continue);
        };
        if !ctx.in_combat || ctx.health_percent() >= threshold {
            return Ok(StageOutcome::Continue);
        }

        let exits = ctx.exits();
        match exits.choose(ctx.rng) {
            Some(exit) => {
                decisions.push(Decision::Flee(exit.clone()));
                Ok(StageOutcome::Handled)
            }
            None => Ok(StageOutcome::Continue),
        }
    }
}

/// Remember attackers; go after them when they turn up again
#[derive(Debug, Default)]
pub struct Memory;

impl AiStage for Memory {
    fn name(&self) -> &str {
        "memory"
    }

    fn position(&self) -> StagePosition {
        StagePosition::Before
    }

    fn run(
        &self,
        ctx: &mut AiContext<'_>,
        decisions: &mut Vec<Decision>,
    ) -> Result<StageOutcome, AiError> {
        if !ctx.profile.memory {
            return Ok(StageOutcome::Continue);
        }
        let Some(ai) = ctx.actor.ai() else {
            return Ok(StageOutcome::Continue);
        };

        for aggressor in &ctx.aggressors {
            ai.remember(aggressor);
        }
        if ctx.in_combat {
            return Ok(StageOutcome::Continue);
        }

        let remembered = ai.remembered();
        let grudge = ctx
            .occupants()
            .into_iter()
            .find(|o| o.is_alive() && remembered.iter().any(|r| r == o.id()));
        match grudge {
            Some(foe) => {
                debug!("{} remembers {}", ctx.actor.id(), foe.id());
                decisions.push(Decision::Say(format!(
                    "Hey! You're the fiend that attacked me, {}!",
                    foe.name()
                )));
                decisions.push(Decision::Engage(foe));
                Ok(StageOutcome::Handled)
            }
            None => Ok(StageOutcome::Continue),
        }
    }
}

/// Join a fight an ally in the same room is already in
#[derive(Debug, Default)]
pub struct Assist;

impl AiStage for Assist {
    fn name(&self) -> &str {
        "assist"
    }

    fn position(&self) -> StagePosition {
        StagePosition::Before
    }

    fn run(
        &self,
        ctx: &mut AiContext<'_>,
        decisions: &mut Vec<Decision>,
    ) -> Result<StageOutcome, AiError> {
        if !ctx.profile.helper || ctx.in_combat {
            return Ok(StageOutcome::Continue);
        }

        let actor = ctx.actor;
        let foe = ctx
            .occupants()
            .into_iter()
            .filter(|o| o.is_alive() && are_allies(&**actor, &**o))
            .filter_map(|ally| combat_target_of(&*ally))
            .find(|t| t.is_alive() && t.id() != actor.id() && !are_allies(&**actor, &**t));

        match foe {
            Some(foe) => {
                decisions.push(Decision::Say("I'll help you!".to_string()));
                decisions.push(Decision::Engage(foe));
                Ok(StageOutcome::Handled)
            }
            None => Ok(StageOutcome::Continue),
        }
    }
}

/// Pick up whatever is lying around when idle
#[derive(Debug, Default)]
pub struct Scavenge;

impl AiStage for Scavenge {
    fn name(&self) -> &str {
        "scavenge"
    }

    fn position(&self) -> StagePosition {
        StagePosition::After
    }

    fn run(
        &self,
        ctx: &mut AiContext<'_>,
        decisions: &mut Vec<Decision>,
    ) -> Result<StageOutcome, AiError> {
        if !ctx.profile.scavenger || ctx.in_combat {
            return Ok(StageOutcome::Continue);
        }
        let moving = decisions
            .iter()
            .any(|d| matches!(d, Decision::Travel(_) | Decision::Flee(_) | Decision::Engage(_)));
        if moving {
            return Ok(StageOutcome::Continue);
        }

        let item = ctx
            .location
            .as_ref()
            .and_then(|room| room.items().into_iter().next());
        if let Some(item) = item {
            decisions.push(Decision::Take(item));
        }
        Ok(StageOutcome::Continue)
    }
}
