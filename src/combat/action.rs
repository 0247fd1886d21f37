//! Action and result model
//!
//! An [`Action`] is an intent queued by a caller (player command, AI, turn
//! hook). The engine validates and resolves it into an immutable
//! [`CombatResult`].

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use serde::Serialize;
use thiserror::Error;

use super::damage::DamageType;
use super::dice::DiceRoll;
use crate::actor::{location_of, ActorId, ActorRef};

/// Why an action was refused. Sent verbatim to the acting actor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ActionRejected {
    reason: String,
}

impl ActionRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A weapon or natural attack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attack {
    pub dice: DiceRoll,
    pub damage_type: DamageType,
    /// Third-person verb used in messages ("hits", "bites")
    pub verb: String,
}

impl Attack {
    pub fn new(dice: DiceRoll, damage_type: DamageType, verb: impl Into<String>) -> Self {
        Self {
            dice,
            damage_type,
            verb: verb.into(),
        }
    }
}

impl Default for Attack {
    fn default() -> Self {
        Self::new(DiceRoll::new(1, 4, 0), DamageType::Physical, "hits")
    }
}

/// Extension point for non-attack actions (spells, bashes, heals).
///
/// Skills are never duplicated by haste.
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    /// Extra checks on top of the liveness/location checks every action gets
    fn validate(&self, _actor: &ActorRef, _target: &ActorRef) -> Result<(), ActionRejected> {
        Ok(())
    }

    fn resolve(&self, actor: &ActorRef, target: &ActorRef, rng: &mut StdRng) -> CombatResult;
}

#[derive(Clone)]
pub enum ActionKind {
    Attack(Attack),
    Skill(Arc<dyn Skill>),
}

impl fmt::Debug for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Attack(attack) => f.debug_tuple("Attack").field(attack).finish(),
            ActionKind::Skill(skill) => f.debug_tuple("Skill").field(&skill.name()).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Action {
    pub actor: ActorRef,
    pub target: ActorRef,
    /// Secondary sort key after initiative (higher fires first)
    pub priority: i32,
    pub kind: ActionKind,
}

impl Action {
    /// Basic attack with the actor's natural weapon
    pub fn attack(actor: &ActorRef, target: &ActorRef) -> Self {
        let attack = actor.natural_attack();
        Self::with_attack(actor, target, attack)
    }

    pub fn with_attack(actor: &ActorRef, target: &ActorRef, attack: Attack) -> Self {
        Self {
            actor: actor.clone(),
            target: target.clone(),
            priority: 0,
            kind: ActionKind::Attack(attack),
        }
    }

    pub fn skill(actor: &ActorRef, target: &ActorRef, skill: Arc<dyn Skill>) -> Self {
        Self {
            actor: actor.clone(),
            target: target.clone(),
            priority: 0,
            kind: ActionKind::Skill(skill),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_attack(&self) -> bool {
        matches!(self.kind, ActionKind::Attack(_))
    }

    pub fn validate(&self) -> Result<(), ActionRejected> {
        if !self.actor.is_alive() {
            return Err(ActionRejected::new("You are in no condition to fight."));
        }
        if !self.target.is_alive() {
            return Err(ActionRejected::new(format!(
                "{} is already dead.",
                self.target.name()
            )));
        }

        if let (Some(here), Some(there)) = (location_of(&*self.actor), location_of(&*self.target)) {
            if here.id() != there.id() {
                return Err(ActionRejected::new(format!(
                    "{} is not here.",
                    self.target.name()
                )));
            }
        }

        match &self.kind {
            ActionKind::Attack(_) if self.actor.id() == self.target.id() => {
                Err(ActionRejected::new("You can't attack yourself."))
            }
            ActionKind::Attack(_) => Ok(()),
            ActionKind::Skill(skill) => skill.validate(&self.actor, &self.target),
        }
    }

    pub fn resolve(&self, rng: &mut StdRng) -> CombatResult {
        match &self.kind {
            ActionKind::Attack(attack) => {
                let damage = attack.dice.roll_with(rng).max(0);
                let message = format!(
                    "{} {} {} for {} {} damage.",
                    self.actor.name(),
                    attack.verb,
                    self.target.name(),
                    damage,
                    attack.damage_type
                );
                CombatResult::new(
                    self.actor.id(),
                    self.target.id(),
                    Some(damage),
                    Some(attack.damage_type),
                    Some(message),
                )
            }
            ActionKind::Skill(skill) => skill.resolve(&self.actor, &self.target, rng),
        }
    }
}

/// Outcome of one resolved action. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatResult {
    actor: ActorId,
    target: ActorId,
    damage: Option<i32>,
    damage_type: Option<DamageType>,
    message: Option<String>,
}

impl CombatResult {
    pub fn new(
        actor: &str,
        target: &str,
        damage: Option<i32>,
        damage_type: Option<DamageType>,
        message: Option<String>,
    ) -> Self {
        Self {
            actor: actor.to_string(),
            target: target.to_string(),
            damage,
            damage_type,
            message,
        }
    }

    /// A result that only carries a message
    pub fn message_only(actor: &str, target: &str, message: impl Into<String>) -> Self {
        Self::new(actor, target, None, None, Some(message.into()))
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn damage(&self) -> Option<i32> {
        self.damage
    }

    pub fn damage_type(&self) -> Option<DamageType> {
        self.damage_type
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Mob, Room};
    use rand::SeedableRng;

    struct Taunt;

    impl Skill for Taunt {
        fn name(&self) -> &str {
            "taunt"
        }

        fn validate(&self, actor: &ActorRef, target: &ActorRef) -> Result<(), ActionRejected> {
            if actor.id() == target.id() {
                return Err(ActionRejected::new("You can't taunt yourself."));
            }
            Ok(())
        }

        fn resolve(&self, actor: &ActorRef, target: &ActorRef, _rng: &mut StdRng) -> CombatResult {
            CombatResult::message_only(actor.id(), target.id(), "Come here!")
        }
    }

    #[test]
    fn test_attack_resolves_flat_damage() {
        let a: ActorRef = Mob::builder("a", "Alice").hp(10).build();
        let b: ActorRef = Mob::builder("b", "Bob").hp(10).build();
        let action = Action::with_attack(
            &a,
            &b,
            Attack::new(DiceRoll::flat(3), DamageType::Fire, "burns"),
        );

        assert!(action.validate().is_ok());
        let result = action.resolve(&mut StdRng::seed_from_u64(0));
        assert_eq!(result.actor(), "a");
        assert_eq!(result.target(), "b");
        assert_eq!(result.damage(), Some(3));
        assert_eq!(result.damage_type(), Some(DamageType::Fire));
        assert_eq!(result.message(), Some("Alice burns Bob for 3 fire damage."));
    }

    #[test]
    fn test_validate_rejects_dead_target_and_self() {
        let a: ActorRef = Mob::builder("a", "Alice").hp(10).build();
        let b: ActorRef = Mob::builder("b", "Bob").hp(0).build();

        let err = Action::attack(&a, &b).validate().unwrap_err();
        assert_eq!(err.reason(), "Bob is already dead.");

        let err = Action::attack(&a, &a).validate().unwrap_err();
        assert_eq!(err.reason(), "You can't attack yourself.");

        let err = Action::attack(&b, &a).validate().unwrap_err();
        assert_eq!(err.reason(), "You are in no condition to fight.");
    }

    #[test]
    fn test_validate_rejects_other_room() {
        let hall = Room::new("hall", "Hall");
        let yard = Room::new("yard", "Yard");
        let a = Mob::builder("a", "Alice").hp(10).build();
        let b = Mob::builder("b", "Bob").hp(10).build();
        hall.admit(&a);
        yard.admit(&b);

        let a: ActorRef = a;
        let b: ActorRef = b;
        let err = Action::attack(&a, &b).validate().unwrap_err();
        assert_eq!(err.reason(), "Bob is not here.");
    }

    #[test]
    fn test_skill_is_not_an_attack() {
        let a: ActorRef = Mob::builder("a", "Alice").hp(10).build();
        let b: ActorRef = Mob::builder("b", "Bob").hp(10).build();
        let action = Action::skill(&a, &b, Arc::new(Taunt)).with_priority(5);

        assert!(!action.is_attack());
        assert_eq!(action.priority, 5);
        let result = action.resolve(&mut StdRng::seed_from_u64(0));
        assert_eq!(result.damage(), None);
        assert_eq!(result.message(), Some("Come here!"));

        let selfish = Action::skill(&a, &a, Arc::new(Taunt));
        assert_eq!(
            selfish.validate().unwrap_err().reason(),
            "You can't taunt yourself."
        );
    }
}
