//! Combat system module
//!
//! Round-based combat with:
//! - Dice rolling (e.g., "2d6+3") and d20 initiative
//! - Queued actions resolved in initiative/priority order
//! - Haste-driven extra attacks
//! - Timed status effects
//! - Exactly-once defeat handling
//! - Many encounters driven by one shared tick loop

pub mod action;
pub mod damage;
pub mod death;
pub mod dice;
pub mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod instance;
pub mod manager;
pub mod participant;

pub use action::{Action, ActionKind, ActionRejected, Attack, CombatResult, Skill};
pub use damage::{condition, DamageType};
pub use death::{
    handle_defeat, CorpseFactory, DeathError, DeathHandler, Defeat, NoReward, Remains,
    RemainsFactory, Reward, RewardRule, StandardDeathHandler,
};
pub use dice::{parse_dice, roll_d20, DiceRoll};
pub use effects::{EffectTracker, EffectType, StatusEffect};
pub use engine::{
    CombatEngine, CombatServices, HasteRule, RoundCleanup, RoundReport, Stat, StatLookup,
};
pub use error::CombatError;
pub use events::{CombatEvent, EventBus, EventEnvelope};
pub use instance::CombatInstance;
pub use manager::CombatRoundManager;
pub use participant::{CombatParticipant, QueuedAction};
