//! Round resolution for one encounter
//!
//! [`CombatEngine::process_round`] runs a full round to completion:
//! gather, haste augmentation, ordering, execution, cleanup, summary,
//! broadcast, advance. Nothing that goes wrong inside a round escapes it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::action::{Action, ActionRejected, CombatResult};
use super::damage::condition;
use super::death::{handle_defeat, DeathHandler, Defeat, StandardDeathHandler};
use super::dice::roll_d20;
use super::effects::EffectTracker;
use super::error::CombatError;
use super::participant::{CombatParticipant, QueuedAction};
use crate::actor::{
    combat_target_of, location_of, tell, Actor, ActorId, ActorRef, HookError, Location,
    TurnDirective,
};

/// Stats the engine asks the host about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stat {
    Haste,
}

/// Effective-stat service. Returns `None` when it knows nothing; the
/// engine does its own defaulting and clamping.
pub trait StatLookup: Send + Sync {
    fn effective(&self, actor: &dyn Actor, stat: Stat) -> Option<i32>;
}

/// Environment cleanup run once after every round (timed effects etc.)
pub trait RoundCleanup: Send + Sync {
    fn after_round(&self, participants: &[ActorRef]) -> Result<(), HookError>;
}

/// Haste to extra-attack conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasteRule {
    /// Haste needed per extra attack
    pub per_extra_attack: i32,
    pub max_extra: u32,
}

impl Default for HasteRule {
    fn default() -> Self {
        Self {
            per_extra_attack: 100,
            max_extra: 10,
        }
    }
}

impl HasteRule {
    pub fn extra_attacks(&self, haste: i32) -> usize {
        if self.per_extra_attack <= 0 || haste <= 0 {
            return 0;
        }
        ((haste / self.per_extra_attack) as u32).min(self.max_extra) as usize
    }

    /// Hard cap on attack actions per actor per round
    pub fn max_attacks(&self) -> usize {
        self.max_extra as usize + 1
    }
}

/// Host services every engine calls into
#[derive(Clone)]
pub struct CombatServices {
    pub stats: Arc<dyn StatLookup>,
    pub cleanup: Arc<dyn RoundCleanup>,
    pub death: Arc<dyn DeathHandler>,
}

impl Default for CombatServices {
    fn default() -> Self {
        Self::with_effects(Arc::new(EffectTracker::new()))
    }
}

impl fmt::Debug for CombatServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombatServices").finish_non_exhaustive()
    }
}

impl CombatServices {
    /// Use one effect tracker for both stat lookup and cleanup
    pub fn with_effects(tracker: Arc<EffectTracker>) -> Self {
        Self {
            stats: tracker.clone(),
            cleanup: tracker,
            death: Arc::new(StandardDeathHandler::default()),
        }
    }

    pub fn with_death_handler(mut self, handler: Arc<dyn DeathHandler>) -> Self {
        self.death = handler;
        self
    }
}

/// What happened during one round
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    /// Round counter after advancing
    pub round: u64,
    /// Acting actor for every ordered action, in execution order
    pub order: Vec<ActorId>,
    pub executed: Vec<CombatResult>,
    pub rejected: Vec<(ActorId, ActionRejected)>,
    pub hesitated: Vec<ActorId>,
    pub defeated: Vec<Defeat>,
    /// Lines delivered in the round broadcast
    pub lines: Vec<String>,
    /// Participants still alive after the round
    pub survivors: usize,
    /// Delay before the next round, if one should be scheduled
    pub next_round_in: Option<Duration>,
}

pub struct CombatEngine {
    participants: Vec<CombatParticipant>,
    round: u64,
    round_time: Option<Duration>,
    output: Vec<String>,
    next_seq: u64,
    haste: HasteRule,
    rng: StdRng,
    round_damage: HashMap<ActorId, i32>,
    /// target -> attackers, in first-hit order
    aggro: HashMap<ActorId, Vec<ActorId>>,
    services: CombatServices,
}

impl fmt::Debug for CombatEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombatEngine")
            .field("participants", &self.participants.len())
            .field("round", &self.round)
            .field("round_time", &self.round_time)
            .finish()
    }
}

impl CombatEngine {
    pub fn new(services: CombatServices, haste: HasteRule, seed: u64) -> Self {
        Self {
            participants: Vec::new(),
            round: 0,
            round_time: None,
            output: Vec::new(),
            next_seq: 0,
            haste,
            rng: StdRng::seed_from_u64(seed),
            round_damage: HashMap::new(),
            aggro: HashMap::new(),
            services,
        }
    }

    pub fn with_round_time(mut self, round_time: Option<Duration>) -> Self {
        self.round_time = round_time;
        self
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn round_time(&self) -> Option<Duration> {
        self.round_time
    }

    pub fn participants(&self) -> &[CombatParticipant] {
        &self.participants
    }

    pub fn participant(&self, actor_id: &str) -> Option<&CombatParticipant> {
        self.participants.iter().find(|p| p.id() == actor_id)
    }

    pub fn contains(&self, actor_id: &str) -> bool {
        self.participant(actor_id).is_some()
    }

    pub fn living_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_alive()).count()
    }

    pub fn has_queued(&self, actor_id: &str) -> bool {
        self.participant(actor_id).is_some_and(|p| p.has_queued())
    }

    /// Everyone who has hit `actor_id` in this encounter
    pub fn aggressors_of(&self, actor_id: &str) -> Vec<ActorId> {
        self.aggro.get(actor_id).cloned().unwrap_or_default()
    }

    /// Add with a rolled d20 initiative. Returns false if already present.
    pub fn add_participant(&mut self, actor: ActorRef) -> bool {
        let initiative = roll_d20(&mut self.rng);
        self.add_participant_with_initiative(actor, initiative)
    }

    pub fn add_participant_with_initiative(&mut self, actor: ActorRef, initiative: i32) -> bool {
        if self.contains(actor.id()) {
            return false;
        }
        debug!("{} joins combat with initiative {}", actor.id(), initiative);
        self.participants
            .push(CombatParticipant::new(actor, initiative));
        true
    }

    /// Remove a participant and anything it had queued. Returns false if absent.
    pub fn remove_participant(&mut self, actor_id: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.id() != actor_id);
        before != self.participants.len()
    }

    /// Append an action to the actor's queue
    pub fn queue_action(&mut self, actor: &ActorRef, action: Action) -> Result<(), CombatError> {
        let idx = self
            .index_of(actor.id())
            .ok_or_else(|| CombatError::NotParticipant(actor.id().to_string()))?;
        self.enqueue(idx, action);
        Ok(())
    }

    fn index_of(&self, actor_id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id() == actor_id)
    }

    fn enqueue(&mut self, idx: usize, action: Action) {
        let seq = self.take_seq();
        self.participants[idx]
            .next_action
            .push(QueuedAction { action, seq });
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn process_round(&mut self) -> RoundReport {
        let mut report = RoundReport::default();
        self.output.clear();
        self.round_damage.clear();

        let mut pending = self.gather(&mut report);

        // initiative desc, priority desc, submission index desc
        pending.sort_by(|(ia, qa), (ib, qb)| {
            ib.cmp(ia)
                .then_with(|| qb.action.priority.cmp(&qa.action.priority))
                .then_with(|| qb.seq.cmp(&qa.seq))
        });

        let mut defeated: HashSet<ActorId> = HashSet::new();
        for (_, queued) in pending {
            self.execute(queued.action, &mut defeated, &mut report);
        }

        let actors: Vec<ActorRef> = self.participants.iter().map(|p| p.actor.clone()).collect();
        if let Err(e) = self.services.cleanup.after_round(&actors) {
            warn!("Round cleanup failed: {}", e);
        }

        self.summarize();
        report.lines = self.broadcast();

        self.round += 1;
        report.round = self.round;
        report.survivors = self.living_count();
        report.next_round_in = self
            .round_time
            .filter(|d| !d.is_zero())
            .filter(|_| report.survivors > 0);
        report
    }

    /// Collect (initiative, action) pairs from every living participant
    fn gather(&mut self, report: &mut RoundReport) -> Vec<(i32, QueuedAction)> {
        let mut pending = Vec::new();

        for idx in 0..self.participants.len() {
            let actor = self.participants[idx].actor.clone();
            if !actor.is_alive() {
                let dropped = self.participants[idx].drain();
                if !dropped.is_empty() {
                    debug!("Dropping {} actions queued by fallen {}", dropped.len(), actor.id());
                }
                continue;
            }

            self.run_turn_hook(idx, &actor);

            if !self.participants[idx].has_queued() {
                match self.fallback_target(idx, &actor) {
                    Some(target) => self.enqueue(idx, Action::attack(&actor, &target)),
                    None => {
                        tell(&*actor, "You hesitate, finding no one to fight.");
                        report.hesitated.push(actor.id().to_string());
                        continue;
                    }
                }
            }

            let initiative = self.participants[idx].initiative;
            let queued = self.participants[idx].drain();
            for queued in self.augment_with_haste(&actor, queued) {
                pending.push((initiative, queued));
            }
        }

        pending
    }

    fn run_turn_hook(&mut self, idx: usize, actor: &ActorRef) {
        let Some(hook) = actor.turn_hook() else {
            return;
        };
        let target = combat_target_of(&**actor);

        match hook.on_turn(target.as_ref()) {
            Ok(TurnDirective::Keep) => {}
            Ok(TurnDirective::Append(actions)) => {
                for action in actions {
                    self.enqueue(idx, action);
                }
            }
            Ok(TurnDirective::Replace(actions)) => {
                self.participants[idx].next_action.clear();
                for action in actions {
                    self.enqueue(idx, action);
                }
            }
            Err(e) => warn!("Turn hook for {} failed: {}", actor.id(), e),
        }
    }

    /// combat_target if it is a living participant here, else the first
    /// other living participant
    fn fallback_target(&self, idx: usize, actor: &ActorRef) -> Option<ActorRef> {
        if let Some(target) = combat_target_of(&**actor) {
            if target.is_alive() && target.id() != actor.id() && self.contains(target.id()) {
                return Some(target);
            }
        }

        self.participants
            .iter()
            .enumerate()
            .find(|(i, p)| *i != idx && p.is_alive())
            .map(|(_, p)| p.actor.clone())
    }

    /// Duplicate attack actions for haste; other actions are left alone
    fn augment_with_haste(
        &mut self,
        actor: &ActorRef,
        mut queued: Vec<QueuedAction>,
    ) -> Vec<QueuedAction> {
        let cap = self.haste.max_attacks();

        let mut attacks = 0;
        queued.retain(|q| {
            if !q.action.is_attack() {
                return true;
            }
            attacks += 1;
            attacks <= cap
        });

        let base: Vec<Action> = queued
            .iter()
            .filter(|q| q.action.is_attack())
            .map(|q| q.action.clone())
            .collect();
        if base.is_empty() {
            return queued;
        }

        let haste = self
            .services
            .stats
            .effective(&**actor, Stat::Haste)
            .unwrap_or(0)
            .max(0);
        let extra = self
            .haste
            .extra_attacks(haste)
            .min(cap.saturating_sub(base.len()));

        for i in 0..extra {
            let action = base[i % base.len()].clone();
            let seq = self.take_seq();
            queued.push(QueuedAction { action, seq });
        }

        queued
    }

    fn execute(&mut self, action: Action, defeated: &mut HashSet<ActorId>, report: &mut RoundReport) {
        report.order.push(action.actor.id().to_string());

        let verdict = action.validate().and_then(|()| {
            if self.contains(action.target.id()) {
                Ok(())
            } else {
                Err(ActionRejected::new(format!(
                    "{} is not part of this fight.",
                    action.target.name()
                )))
            }
        });
        if let Err(rejection) = verdict {
            debug!("Rejected action by {}: {}", action.actor.id(), rejection);
            tell(&*action.actor, rejection.reason());
            report
                .rejected
                .push((action.actor.id().to_string(), rejection));
            return;
        }

        let result = action.resolve(&mut self.rng);
        let attacker = &action.actor;
        let target = &action.target;

        if let Some(damage) = result.damage() {
            self.apply_damage(attacker, target, damage);
        }

        self.output.push(format!(
            "{} {}.",
            target.name(),
            condition(target.health(), target.max_health())
        ));

        if let Some(message) = result.message() {
            if let Some(room) = location_of(&**target) {
                room.broadcast(message);
            }
        }

        if action.is_attack() || result.damage().is_some() {
            self.record_aggro(attacker, target);
        }

        if !target.is_alive() && defeated.insert(target.id().to_string()) {
            if let Some(defeat) = handle_defeat(&*self.services.death, target, Some(attacker)) {
                report.defeated.push(defeat);
            }
        }

        report.executed.push(result);
    }

    /// The one place damage lands
    fn apply_damage(&mut self, attacker: &ActorRef, target: &ActorRef, amount: i32) {
        target.set_health(target.health() - amount);
        *self
            .round_damage
            .entry(attacker.id().to_string())
            .or_insert(0) += amount;
    }

    fn record_aggro(&mut self, attacker: &ActorRef, target: &ActorRef) {
        let attackers = self.aggro.entry(target.id().to_string()).or_default();
        if !attackers.iter().any(|a| a == attacker.id()) {
            attackers.push(attacker.id().to_string());
        }

        let needs_target = |actor: &ActorRef| {
            combat_target_of(&**actor).map_or(true, |t| !t.is_alive())
        };
        if needs_target(attacker) {
            if let Some(targeting) = attacker.targeting() {
                targeting.set_combat_target(Some(target));
            }
        }
        if target.is_alive() && needs_target(target) {
            if let Some(targeting) = target.targeting() {
                targeting.set_combat_target(Some(attacker));
            }
        }
    }

    fn summarize(&mut self) {
        for participant in &self.participants {
            let dealt = self
                .round_damage
                .get(participant.id())
                .copied()
                .unwrap_or(0);
            if dealt != 0 {
                self.output
                    .push(format!("{} dealt {} damage.", participant.actor.name(), dealt));
            }
        }
    }

    /// Deliver buffered lines as one message: to the shared room if every
    /// participant stands in the same one, otherwise to each participant.
    fn broadcast(&mut self) -> Vec<String> {
        let lines = std::mem::take(&mut self.output);
        if lines.is_empty() {
            return lines;
        }
        let message = lines.join("\n");

        let rooms: Vec<Option<Arc<dyn Location>>> = self
            .participants
            .iter()
            .map(|p| location_of(&*p.actor))
            .collect();
        let shared = match rooms.first() {
            Some(Some(first))
                if rooms
                    .iter()
                    .all(|r| r.as_ref().is_some_and(|r| r.id() == first.id())) =>
            {
                Some(first.clone())
            }
            _ => None,
        };

        match shared {
            Some(room) => room.broadcast(&message),
            None => {
                for participant in &self.participants {
                    tell(&*participant.actor, &message);
                }
            }
        }

        lines
    }
}
