//! Timed status effects
//!
//! Effects last a number of combat rounds. [`EffectTracker`] is the default
//! environment-cleanup hook (it ages and expires effects after every round)
//! and the default stat lookup (haste comes from `Hasted`/`Slowed`).

use std::collections::HashMap;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{RoundCleanup, Stat, StatLookup};
use crate::actor::{tell, Actor, ActorId, ActorRef, HookError};

/// Types of status effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectType {
    /// Extra attacks per round (magnitude adds haste)
    Hasted,
    /// Fewer attacks per round (magnitude subtracts haste)
    Slowed,
    Stunned,
    Poisoned,
    Blinded,
    Protected,
}

impl FromStr for EffectType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hasted" | "haste" => Ok(EffectType::Hasted),
            "slowed" | "slow" => Ok(EffectType::Slowed),
            "stunned" | "stun" => Ok(EffectType::Stunned),
            "poisoned" | "poison" => Ok(EffectType::Poisoned),
            "blinded" | "blind" => Ok(EffectType::Blinded),
            "protected" | "protect" => Ok(EffectType::Protected),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for EffectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EffectType::Hasted => "hasted",
            EffectType::Slowed => "slowed",
            EffectType::Stunned => "stunned",
            EffectType::Poisoned => "poisoned",
            EffectType::Blinded => "blinded",
            EffectType::Protected => "protected",
        };
        write!(f, "{}", s)
    }
}

/// A status effect instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEffect {
    pub effect_type: EffectType,
    /// Rounds left before the effect wears off
    pub remaining_rounds: u32,
    pub magnitude: i32,
    /// Who applied this effect
    pub source_id: Option<ActorId>,
}

impl StatusEffect {
    pub fn new(effect_type: EffectType, rounds: u32, magnitude: i32) -> Self {
        Self {
            effect_type,
            remaining_rounds: rounds,
            magnitude,
            source_id: None,
        }
    }

    pub fn with_source(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_rounds == 0
    }
}

/// Effects on a single actor
#[derive(Debug, Clone, Default)]
struct ActorEffects {
    effects: Vec<StatusEffect>,
}

impl ActorEffects {
    /// Refreshes an existing effect of the same type rather than stacking
    fn add(&mut self, effect: StatusEffect) {
        if let Some(existing) = self
            .effects
            .iter_mut()
            .find(|e| e.effect_type == effect.effect_type)
        {
            existing.remaining_rounds = existing.remaining_rounds.max(effect.remaining_rounds);
            existing.magnitude = existing.magnitude.max(effect.magnitude);
        } else {
            self.effects.push(effect);
        }
    }

    /// Age every effect by one round and return the ones that wore off
    fn age(&mut self) -> Vec<StatusEffect> {
        for effect in &mut self.effects {
            effect.remaining_rounds = effect.remaining_rounds.saturating_sub(1);
        }
        let (expired, active): (Vec<_>, Vec<_>) =
            self.effects.drain(..).partition(StatusEffect::is_expired);
        self.effects = active;
        expired
    }

    fn magnitude_of(&self, effect_type: EffectType) -> i32 {
        self.effects
            .iter()
            .filter(|e| e.effect_type == effect_type && !e.is_expired())
            .map(|e| e.magnitude)
            .sum()
    }
}

/// Tracks timed effects and base stats for every actor
#[derive(Debug, Default)]
pub struct EffectTracker {
    effects: RwLock<HashMap<ActorId, ActorEffects>>,
    base: RwLock<HashMap<(ActorId, Stat), i32>>,
}

impl EffectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_effect(&self, actor_id: &str, effect: StatusEffect) {
        self.effects
            .write()
            .entry(actor_id.to_string())
            .or_default()
            .add(effect);
    }

    pub fn remove_effect(&self, actor_id: &str, effect_type: EffectType) {
        if let Some(effects) = self.effects.write().get_mut(actor_id) {
            effects.effects.retain(|e| e.effect_type != effect_type);
        }
    }

    pub fn has_effect(&self, actor_id: &str, effect_type: EffectType) -> bool {
        self.effects
            .read()
            .get(actor_id)
            .is_some_and(|e| {
                e.effects
                    .iter()
                    .any(|x| x.effect_type == effect_type && !x.is_expired())
            })
    }

    /// Set an actor's base value for a stat (before effects)
    pub fn set_base(&self, actor_id: &str, stat: Stat, value: i32) {
        self.base.write().insert((actor_id.to_string(), stat), value);
    }

    pub fn clear(&self, actor_id: &str) {
        self.effects.write().remove(actor_id);
        self.base.write().retain(|(id, _), _| id != actor_id);
    }
}

impl StatLookup for EffectTracker {
    fn effective(&self, actor: &dyn Actor, stat: Stat) -> Option<i32> {
        let base = self.base.read().get(&(actor.id().to_string(), stat)).copied();
        let effects = self.effects.read();
        let from_effects = effects.get(actor.id()).map(|e| match stat {
            Stat::Haste => e.magnitude_of(EffectType::Hasted) - e.magnitude_of(EffectType::Slowed),
        });

        match (base, from_effects) {
            (None, None) => None,
            (b, e) => Some(b.unwrap_or(0) + e.unwrap_or(0)),
        }
    }
}

impl RoundCleanup for EffectTracker {
    fn after_round(&self, participants: &[ActorRef]) -> Result<(), HookError> {
        for actor in participants {
            let expired = match self.effects.write().get_mut(actor.id()) {
                Some(effects) => effects.age(),
                None => continue,
            };
            for effect in expired {
                debug!("{} wore off {}", effect.effect_type, actor.id());
                tell(&**actor, &format!("You are no longer {}.", effect.effect_type));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Mob;

    #[test]
    fn test_effect_type_parsing() {
        assert_eq!("haste".parse::<EffectType>(), Ok(EffectType::Hasted));
        assert_eq!("STUN".parse::<EffectType>(), Ok(EffectType::Stunned));
        assert!("invalid".parse::<EffectType>().is_err());
    }

    #[test]
    fn test_effect_refresh_keeps_longest() {
        let tracker = EffectTracker::new();
        tracker.add_effect("a", StatusEffect::new(EffectType::Hasted, 2, 100));
        tracker.add_effect("a", StatusEffect::new(EffectType::Hasted, 5, 50));

        let effects = tracker.effects.read();
        let hasted = &effects["a"].effects[0];
        assert_eq!(hasted.remaining_rounds, 5);
        assert_eq!(hasted.magnitude, 100);
    }

    #[test]
    fn test_haste_lookup_combines_base_and_effects() {
        let tracker = EffectTracker::new();
        let mob = Mob::builder("a", "Alice").hp(10).build();

        assert_eq!(tracker.effective(&*mob, Stat::Haste), None);

        tracker.set_base("a", Stat::Haste, 50);
        assert_eq!(tracker.effective(&*mob, Stat::Haste), Some(50));

        tracker.add_effect("a", StatusEffect::new(EffectType::Hasted, 3, 200));
        tracker.add_effect("a", StatusEffect::new(EffectType::Slowed, 3, 30));
        assert_eq!(tracker.effective(&*mob, Stat::Haste), Some(220));
    }

    #[test]
    fn test_cleanup_expires_and_notifies() {
        let tracker = EffectTracker::new();
        let mob = Mob::builder("a", "Alice").hp(10).build();
        tracker.add_effect("a", StatusEffect::new(EffectType::Hasted, 2, 100));

        let participants: Vec<ActorRef> = vec![mob.clone()];
        tracker.after_round(&participants).unwrap();
        assert!(tracker.has_effect("a", EffectType::Hasted));
        assert!(mob.inbox().is_empty());

        tracker.after_round(&participants).unwrap();
        assert!(!tracker.has_effect("a", EffectType::Hasted));
        assert_eq!(mob.inbox(), vec!["You are no longer hasted.".to_string()]);
    }

    #[test]
    fn test_clear_forgets_actor() {
        let tracker = EffectTracker::new();
        let mob = Mob::builder("a", "Alice").hp(10).build();
        tracker.set_base("a", Stat::Haste, 10);
        tracker.add_effect("a", StatusEffect::new(EffectType::Stunned, 2, 0));

        tracker.clear("a");
        assert!(!tracker.has_effect("a", EffectType::Stunned));
        assert_eq!(tracker.effective(&*mob, Stat::Haste), None);
    }
}
