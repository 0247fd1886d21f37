//! Damage types and condition descriptions

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Types of damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageType {
    /// Physical damage (unarmed, generic weapons)
    Physical,
    /// Slashing damage (swords, claws)
    Slashing,
    /// Piercing damage (arrows, spears)
    Piercing,
    /// Bludgeoning damage (maces, hammers)
    Bludgeoning,
    Fire,
    Cold,
    Lightning,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Psychic,
    Force,
    Thunder,
}

impl FromStr for DamageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "physical" => Ok(DamageType::Physical),
            "slashing" => Ok(DamageType::Slashing),
            "piercing" => Ok(DamageType::Piercing),
            "bludgeoning" => Ok(DamageType::Bludgeoning),
            "fire" => Ok(DamageType::Fire),
            "cold" | "ice" => Ok(DamageType::Cold),
            "lightning" | "electric" => Ok(DamageType::Lightning),
            "acid" => Ok(DamageType::Acid),
            "poison" => Ok(DamageType::Poison),
            "necrotic" | "death" => Ok(DamageType::Necrotic),
            "radiant" | "holy" => Ok(DamageType::Radiant),
            "psychic" | "mental" => Ok(DamageType::Psychic),
            "force" | "magic" => Ok(DamageType::Force),
            "thunder" | "sonic" => Ok(DamageType::Thunder),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DamageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DamageType::Physical => "physical",
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Cold => "cold",
            DamageType::Lightning => "lightning",
            DamageType::Acid => "acid",
            DamageType::Poison => "poison",
            DamageType::Necrotic => "necrotic",
            DamageType::Radiant => "radiant",
            DamageType::Psychic => "psychic",
            DamageType::Force => "force",
            DamageType::Thunder => "thunder",
        };
        write!(f, "{}", s)
    }
}

/// Describe a combatant's condition from its remaining health.
///
/// Bands are percentages of `max_hp`; anything at or below zero is dead.
pub fn condition(hp: i32, max_hp: i32) -> &'static str {
    if hp <= 0 {
        return "is dead";
    }
    let pct = i64::from(hp) * 100 / i64::from(max_hp.max(1));
    match pct {
        100.. => "is in excellent condition",
        75..=99 => "has a few scratches",
        50..=74 => "is wounded",
        25..=49 => "is badly wounded",
        10..=24 => "is bleeding heavily",
        _ => "is barely standing",
    }
}
