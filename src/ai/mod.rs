//! NPC decision-making
//!
//! Each sweep, the [`AiDispatcher`] gives every AI-controlled actor one
//! turn: the before-stages of the pipeline run first (any of them may
//! claim the turn), then the actor's primary behavior from the
//! [`AiRegistry`], then the after-stages. Behaviors only *decide*; the
//! dispatcher applies the resulting [`Decision`]s against the combat
//! manager and the host world.

mod behaviors;
mod pipeline;
mod sandbox;
mod script;

pub use behaviors::{Aggressive, Defensive, Passive, Scripted, Wander};
pub use pipeline::{Assist, CharmRebellion, Memory, Scavenge, Wimpy};
pub use sandbox::{Sandbox, SandboxConfig, SandboxError};
pub use script::{NativeScript, OccupantView, ScriptCommand, ScriptError, ScriptRegistry, ScriptView};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::actor::{
    are_allies, combat_target_of, location_of, tell, ActorId, ActorRef, Location,
};
use crate::combat::{Action, CombatError, CombatRoundManager};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("unknown behavior '{0}'")]
    UnknownBehavior(String),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Combat(#[from] CombatError),

    #[error("{0}")]
    Failed(String),
}

/// Static AI settings for one actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiProfile {
    /// Registry key of the primary behavior
    pub behavior: String,
    /// Never wanders
    pub stationary: bool,
    /// Flee below this percentage of max health
    pub wimpy: Option<i32>,
    pub scavenger: bool,
    /// Remembers and hunts down attackers
    pub memory: bool,
    /// Joins fights its allies are in
    pub helper: bool,
    /// Script name for the scripted behavior
    pub script: Option<String>,
}

impl Default for AiProfile {
    fn default() -> Self {
        Self {
            behavior: "passive".to_string(),
            stationary: false,
            wimpy: None,
            scavenger: false,
            memory: false,
            helper: false,
            script: None,
        }
    }
}

impl AiProfile {
    pub fn new(behavior: &str) -> Self {
        Self {
            behavior: behavior.to_string(),
            ..Self::default()
        }
    }
}

/// A charm binding an actor to a master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charm {
    pub master: ActorId,
    /// Percent chance per turn that the charm holds
    pub loyalty: u32,
}

/// Host-side AI state
pub trait AiControlled: Send + Sync {
    fn profile(&self) -> AiProfile;
    fn remembered(&self) -> Vec<ActorId>;
    fn remember(&self, actor_id: &str);
    fn forget(&self, actor_id: &str);
    fn charm(&self) -> Option<Charm>;
    fn release_charm(&self);
}

/// One thing an actor decided to do this turn
#[derive(Debug, Clone)]
pub enum Decision {
    /// Start or continue fighting
    Engage(ActorRef),
    Travel(String),
    /// Leave combat through an exit
    Flee(String),
    Take(String),
    Say(String),
    /// Queue a prepared action in the actor's current encounter
    Queue(Action),
}

/// Everything a behavior may look at while deciding
pub struct AiContext<'a> {
    pub actor: &'a ActorRef,
    pub profile: AiProfile,
    pub location: Option<Arc<dyn Location>>,
    pub in_combat: bool,
    pub aggressors: Vec<ActorId>,
    pub rng: &'a mut StdRng,
}

impl AiContext<'_> {
    pub fn occupants(&self) -> Vec<ActorRef> {
        match &self.location {
            Some(room) => room
                .occupants()
                .into_iter()
                .filter(|o| o.id() != self.actor.id())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Living occupants that are not allies
    pub fn hostiles(&self) -> Vec<ActorRef> {
        self.occupants()
            .into_iter()
            .filter(|o| o.is_alive() && !are_allies(&**self.actor, &**o))
            .collect()
    }

    pub fn exits(&self) -> Vec<String> {
        self.location
            .as_ref()
            .map(|room| room.exits())
            .unwrap_or_default()
    }

    pub fn current_target(&self) -> Option<ActorRef> {
        combat_target_of(&**self.actor).filter(|t| t.is_alive())
    }

    pub fn health_percent(&self) -> i32 {
        let max = self.actor.max_health().max(1);
        (i64::from(self.actor.health()) * 100 / i64::from(max)) as i32
    }
}

/// Primary behavior, looked up by key
pub trait Behavior: Send + Sync {
    fn execute(&self, ctx: &mut AiContext<'_>) -> Result<Vec<Decision>, AiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePosition {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Continue,
    /// The turn is over; skip everything after this stage
    Handled,
}

/// A pipeline step run around the primary behavior
pub trait AiStage: Send + Sync {
    fn name(&self) -> &str;
    fn position(&self) -> StagePosition;
    fn run(
        &self,
        ctx: &mut AiContext<'_>,
        decisions: &mut Vec<Decision>,
    ) -> Result<StageOutcome, AiError>;
}

pub struct AiRegistry {
    behaviors: HashMap<String, Arc<dyn Behavior>>,
    before: Vec<Arc<dyn AiStage>>,
    after: Vec<Arc<dyn AiStage>>,
}

impl std::fmt::Debug for AiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.behaviors.keys().collect();
        keys.sort();
        f.debug_struct("AiRegistry")
            .field("behaviors", &keys)
            .field("before", &self.before.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("after", &self.after.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct AiRegistryBuilder {
    behaviors: HashMap<String, Arc<dyn Behavior>>,
    stages: Vec<Arc<dyn AiStage>>,
}

impl AiRegistryBuilder {
    pub fn behavior(mut self, key: &str, behavior: impl Behavior + 'static) -> Self {
        self.behaviors.insert(key.to_string(), Arc::new(behavior));
        self
    }

    /// Stages run in the order they are added
    pub fn stage(mut self, stage: impl AiStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> AiRegistry {
        let (before, after): (Vec<_>, Vec<_>) = self
            .stages
            .into_iter()
            .partition(|s| s.position() == StagePosition::Before);
        AiRegistry {
            behaviors: self.behaviors,
            before,
            after,
        }
    }
}

impl AiRegistry {
    pub fn builder() -> AiRegistryBuilder {
        AiRegistryBuilder::default()
    }

    /// The baseline behaviors and the full pipeline
    pub fn standard(scripts: Arc<ScriptRegistry>) -> Self {
        Self::builder()
            .behavior("aggressive", Aggressive)
            .behavior("defensive", Defensive)
            .behavior("passive", Passive)
            .behavior("wander", Wander)
            .behavior("scripted", Scripted::new(scripts))
            .stage(CharmRebellion)
            .stage(Wimpy)
            .stage(Memory)
            .stage(Assist)
            .stage(Scavenge)
            .build()
    }

    pub fn behavior(&self, key: &str) -> Option<&Arc<dyn Behavior>> {
        self.behaviors.get(key)
    }

    /// Run one full turn of decision-making
    pub fn decide(&self, ctx: &mut AiContext<'_>) -> Result<Vec<Decision>, AiError> {
        let mut decisions = Vec::new();

        for stage in &self.before {
            if stage.run(ctx, &mut decisions)? == StageOutcome::Handled {
                debug!("{} handled the turn of {}", stage.name(), ctx.actor.id());
                return Ok(decisions);
            }
        }

        let behavior = self
            .behaviors
            .get(&ctx.profile.behavior)
            .ok_or_else(|| AiError::UnknownBehavior(ctx.profile.behavior.clone()))?;
        decisions.extend(behavior.execute(ctx)?);

        for stage in &self.after {
            if stage.run(ctx, &mut decisions)? == StageOutcome::Handled {
                break;
            }
        }

        Ok(decisions)
    }
}

/// Source of actors for each sweep
pub trait Roster: Send + Sync {
    fn actors(&self) -> Vec<ActorRef>;
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub acted: usize,
    pub idle: usize,
    pub failed: usize,
}

pub struct AiDispatcher {
    registry: Arc<AiRegistry>,
    combat: CombatRoundManager,
    rng: Mutex<StdRng>,
}

impl AiDispatcher {
    pub fn new(registry: Arc<AiRegistry>, combat: CombatRoundManager) -> Self {
        let rng = match combat.config().rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_os_rng(),
        };
        Self {
            registry,
            combat,
            rng: Mutex::new(rng),
        }
    }

    /// One turn for every living AI-controlled actor. Failures are per actor.
    pub async fn sweep(&self, actors: &[ActorRef]) -> SweepReport {
        let mut report = SweepReport::default();

        for actor in actors {
            if actor.ai().is_none() || !actor.is_alive() {
                continue;
            }
            match self.act(actor).await {
                Ok(true) => report.acted += 1,
                Ok(false) => report.idle += 1,
                Err(e) => {
                    warn!("AI turn for {} failed: {}", actor.id(), e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Decide and apply one actor's turn. Returns whether it did anything.
    pub async fn act(&self, actor: &ActorRef) -> Result<bool, AiError> {
        let Some(ai) = actor.ai() else {
            return Ok(false);
        };

        let in_combat = self.combat.get_combatant_combat(actor.id()).await.is_some();
        let aggressors = self.combat.aggressors_of(actor.id()).await;

        let decisions = {
            let mut rng = self.rng.lock();
            let mut ctx = AiContext {
                actor,
                profile: ai.profile(),
                location: location_of(&**actor),
                in_combat,
                aggressors,
                rng: &mut *rng,
            };
            self.registry.decide(&mut ctx)?
        };

        let acted = !decisions.is_empty();
        for decision in decisions {
            self.apply(actor, decision).await?;
        }
        Ok(acted)
    }

    async fn apply(&self, actor: &ActorRef, decision: Decision) -> Result<(), AiError> {
        match decision {
            Decision::Engage(target) => {
                let round_time = self.combat.config().round_time();
                let instance = self
                    .combat
                    .start_combat(&[actor.clone(), target.clone()], round_time)
                    .await?;
                if let Some(targeting) = actor.targeting() {
                    targeting.set_combat_target(Some(&target));
                }
                if !instance.has_queued(actor.id()).await {
                    instance
                        .queue_action(actor, Action::attack(actor, &target))
                        .await?;
                }
            }
            Decision::Queue(action) => self.combat.queue_action(actor, action).await?,
            Decision::Travel(exit) => {
                if let Some(mover) = actor.locatable() {
                    mover
                        .travel(&exit)
                        .map_err(|e| AiError::Failed(e.to_string()))?;
                }
            }
            Decision::Flee(exit) => {
                let Some((origin, moved)) = actor
                    .locatable()
                    .map(|mover| (mover.location(), mover.travel(&exit)))
                else {
                    return Ok(());
                };
                match moved {
                    Ok(()) => {
                        if let Some(instance) = self.combat.get_combatant_combat(actor.id()).await {
                            instance.remove_combatant(actor.id()).await;
                        }
                        if let Some(targeting) = actor.targeting() {
                            targeting.set_combat_target(None);
                        }
                        tell(&**actor, &format!("You flee {}!", exit));
                        if let Some(room) = origin {
                            room.broadcast(&format!("{} flees {}.", actor.name(), exit));
                        }
                        info!("{} fled {}", actor.id(), exit);
                    }
                    Err(e) => {
                        tell(&**actor, "PANIC! You couldn't escape!");
                        debug!("{} failed to flee: {}", actor.id(), e);
                    }
                }
            }
            Decision::Take(item) => {
                if let Some(scavenger) = actor.scavenger() {
                    scavenger
                        .take_item(&item)
                        .map_err(|e| AiError::Failed(e.to_string()))?;
                    if let Some(room) = location_of(&**actor) {
                        room.broadcast(&format!("{} picks up {}.", actor.name(), item));
                    }
                }
            }
            Decision::Say(text) => {
                if let Some(room) = location_of(&**actor) {
                    room.broadcast(&format!("{} says, '{}'", actor.name(), text));
                }
            }
        }
        Ok(())
    }

    /// Sweep `roster` every `interval` until the task is aborted
    pub fn spawn(self: Arc<Self>, roster: Arc<dyn Roster>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = self.sweep(&roster.actors()).await;
                if report.failed > 0 {
                    warn!("AI sweep: {} actors failed", report.failed);
                }
                debug!(
                    "AI sweep: {} acted, {} idle, {} failed",
                    report.acted, report.idle, report.failed
                );
            }
        })
    }
}
