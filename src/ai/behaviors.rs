//! Baseline primary behaviors

use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use super::script::{OccupantView, ScriptCommand, ScriptRegistry, ScriptView};
use super::{AiContext, AiError, Behavior, Decision};
use crate::actor::{are_allies, location_of, ActorRef};

/// Continue the current fight, or pick one with the first eligible target
#[derive(Debug, Default)]
pub struct Aggressive;

impl Behavior for Aggressive {
    fn execute(&self, ctx: &mut AiContext<'_>) -> Result<Vec<Decision>, AiError> {
        if let Some(target) = ctx.current_target() {
            return Ok(vec![Decision::Engage(target)]);
        }
        Ok(ctx
            .hostiles()
            .into_iter()
            .next()
            .map(Decision::Engage)
            .into_iter()
            .collect())
    }
}

/// Fights back, never starts anything
#[derive(Debug, Default)]
pub struct Defensive;

impl Behavior for Defensive {
    fn execute(&self, ctx: &mut AiContext<'_>) -> Result<Vec<Decision>, AiError> {
        if !ctx.in_combat {
            return Ok(Vec::new());
        }
        if let Some(target) = ctx.current_target() {
            return Ok(vec![Decision::Engage(target)]);
        }
        let attacker = ctx
            .occupants()
            .into_iter()
            .find(|o| o.is_alive() && ctx.aggressors.iter().any(|a| a == o.id()));
        Ok(attacker.map(Decision::Engage).into_iter().collect())
    }
}

#[derive(Debug, Default)]
pub struct Passive;

impl Behavior for Passive {
    fn execute(&self, _ctx: &mut AiContext<'_>) -> Result<Vec<Decision>, AiError> {
        Ok(Vec::new())
    }
}

/// Drifts through a random exit while idle
#[derive(Debug, Default)]
pub struct Wander;

impl Behavior for Wander {
    fn execute(&self, ctx: &mut AiContext<'_>) -> Result<Vec<Decision>, AiError> {
        if ctx.profile.stationary || ctx.in_combat {
            return Ok(Vec::new());
        }
        let exits = ctx.exits();
        Ok(exits
            .choose(ctx.rng)
            .cloned()
            .map(Decision::Travel)
            .into_iter()
            .collect())
    }
}

/// Delegates to the script named in the actor's profile
pub struct Scripted {
    scripts: Arc<ScriptRegistry>,
}

impl Scripted {
    pub fn new(scripts: Arc<ScriptRegistry>) -> Self {
        Self { scripts }
    }

    fn view(ctx: &AiContext<'_>) -> ScriptView {
        let actor = ctx.actor;
        ScriptView {
            actor: actor.id().to_string(),
            name: actor.name(),
            health: actor.health(),
            max_health: actor.max_health(),
            in_combat: ctx.in_combat,
            target: ctx.current_target().map(|t| t.id().to_string()),
            exits: ctx.exits(),
            items: ctx
                .location
                .as_ref()
                .map(|room| room.items())
                .unwrap_or_default(),
            occupants: ctx
                .occupants()
                .iter()
                .map(|o| OccupantView {
                    id: o.id().to_string(),
                    name: o.name(),
                    health: o.health(),
                    ally: are_allies(&**actor, &**o),
                })
                .collect(),
            aggressors: ctx.aggressors.clone(),
        }
    }

    fn translate(ctx: &AiContext<'_>, command: ScriptCommand) -> Option<Decision> {
        match command {
            ScriptCommand::Attack { target } => {
                let found: Option<ActorRef> = ctx
                    .occupants()
                    .into_iter()
                    .find(|o| o.id() == target && o.is_alive());
                if found.is_none() {
                    debug!("Script target {} is not here", target);
                }
                found.map(Decision::Engage)
            }
            ScriptCommand::Move { exit } => Some(Decision::Travel(exit)),
            ScriptCommand::Flee { exit } => Some(Decision::Flee(exit)),
            ScriptCommand::Take { item } => Some(Decision::Take(item)),
            ScriptCommand::Say { text } => Some(Decision::Say(text)),
        }
    }
}

impl Behavior for Scripted {
    fn execute(&self, ctx: &mut AiContext<'_>) -> Result<Vec<Decision>, AiError> {
        let Some(name) = ctx.profile.script.clone() else {
            debug!("{} is scripted but names no script", ctx.actor.id());
            return Ok(Vec::new());
        };

        match self.scripts.run(&name, &Self::view(ctx)) {
            Ok(commands) => {
                let ctx: &AiContext<'_> = ctx;
                Ok(commands
                    .into_iter()
                    .filter_map(|c| Self::translate(ctx, c))
                    .collect())
            }
            Err(e) => {
                warn!(
                    "Script {} failed for {} in {}: {}",
                    name,
                    ctx.actor.id(),
                    location_of(&**ctx.actor)
                        .map(|r| r.id().to_string())
                        .unwrap_or_else(|| "nowhere".to_string()),
                    e
                );
                Ok(Vec::new())
            }
        }
    }
}
