//! Shared fixtures for scenario tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use combatd::actor::{ActorRef, HookError, TurnDirective, TurnHook};
use combatd::combat::{
    Attack, CombatServices, DamageType, DeathError, DeathHandler, DiceRoll, Remains,
};
use combatd::config::CombatConfig;
use combatd::{CombatRoundManager, Mob, Room};

/// A mob whose natural attack always deals `damage`
pub fn fighter(id: &str, hp: i32, damage: i32) -> Arc<Mob> {
    Mob::builder(id, id)
        .hp(hp)
        .attack(Attack::new(DiceRoll::flat(damage), DamageType::Physical, "hits"))
        .build()
}

/// Put every mob in `room` and hand back engine handles
pub fn gather(room: &Arc<Room>, mobs: &[&Arc<Mob>]) -> Vec<ActorRef> {
    mobs.iter()
        .map(|mob| {
            room.admit(mob);
            (*mob).clone() as ActorRef
        })
        .collect()
}

/// Seeded config; a zero round time leaves rounds to the shared loop
pub fn config(round_time_ms: i64) -> CombatConfig {
    CombatConfig {
        tick_interval_ms: 1000,
        round_time_ms,
        rng_seed: Some(17),
        ..CombatConfig::default()
    }
}

pub fn manager(round_time_ms: i64) -> CombatRoundManager {
    CombatRoundManager::new(config(round_time_ms), CombatServices::default())
}

/// Counts calls, leaves no remains
#[derive(Default)]
pub struct CountingDeaths {
    pub calls: AtomicUsize,
}

impl CountingDeaths {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeathHandler for CountingDeaths {
    fn handle(
        &self,
        _victim: &ActorRef,
        _killer: Option<&ActorRef>,
    ) -> Result<Option<Remains>, DeathError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Turn hook that always errors
pub struct BrokenHook;

impl TurnHook for BrokenHook {
    fn on_turn(&self, _target: Option<&ActorRef>) -> Result<TurnDirective, HookError> {
        Err(HookError("spell book is on fire".to_string()))
    }
}
