//! Dice notation for attack damage and initiative
//!
//! Parses and rolls notation like "2d6+3", "1d20", "4d6-2". Rolling always
//! takes the caller's RNG so a seeded engine replays identically.

use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Most dice a single roll may throw
pub const MAX_DICE: u32 = 100;
/// Most sides a single die may have
pub const MAX_SIDES: u32 = 1000;

/// A parsed dice roll specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Modifier to add/subtract
    pub modifier: i32,
}

impl DiceRoll {
    /// Count and sides are clamped into `1..=MAX_DICE` and `1..=MAX_SIDES`
    pub const fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count: clamp(count, MAX_DICE),
            sides: clamp(sides, MAX_SIDES),
            modifier,
        }
    }

    /// A roll that always yields `value`
    pub const fn flat(value: i32) -> Self {
        Self::new(1, 1, value - 1)
    }

    /// Roll the dice with the supplied RNG and return the total
    pub fn roll_with<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        let sides = clamp(self.sides, MAX_SIDES);
        let mut total: i32 = 0;
        for _ in 0..clamp(self.count, MAX_DICE) {
            total += rng.random_range(1..=sides) as i32;
        }
        total.saturating_add(self.modifier)
    }

    /// Get the minimum possible result
    pub fn min(&self) -> i32 {
        (clamp(self.count, MAX_DICE) as i32).saturating_add(self.modifier)
    }

    /// Get the maximum possible result
    pub fn max(&self) -> i32 {
        let top = clamp(self.count, MAX_DICE) * clamp(self.sides, MAX_SIDES);
        (top as i32).saturating_add(self.modifier)
    }
}

/// 0 becomes 1, anything above `max` becomes `max`
const fn clamp(value: u32, max: u32) -> u32 {
    if value == 0 {
        1
    } else if value > max {
        max
    } else {
        value
    }
}

impl FromStr for DiceRoll {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl TryFrom<String> for DiceRoll {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_dice(&value)
    }
}

impl From<DiceRoll> for String {
    fn from(roll: DiceRoll) -> Self {
        roll.to_string()
    }
}

impl std::fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifier > 0 {
            write!(f, "{}d{}+{}", self.count, self.sides, self.modifier)
        } else if self.modifier < 0 {
            write!(f, "{}d{}{}", self.count, self.sides, self.modifier)
        } else {
            write!(f, "{}d{}", self.count, self.sides)
        }
    }
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(notation: &str) -> Result<DiceRoll, String> {
    let notation = notation.trim().to_lowercase();

    let d_pos = notation.find('d').ok_or("Missing 'd' in dice notation")?;

    let count_str = &notation[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1 // "d6" means "1d6"
    } else {
        count_str
            .parse()
            .map_err(|_| format!("Invalid dice count: {}", count_str))?
    };

    if count == 0 {
        return Err("Dice count must be at least 1".to_string());
    }
    if count > MAX_DICE {
        return Err(format!("Dice count must be at most {}", MAX_DICE));
    }

    let rest = &notation[d_pos + 1..];

    let (sides_str, modifier) = if let Some(plus_pos) = rest.find('+') {
        let mod_str = &rest[plus_pos + 1..];
        let modifier: i32 = mod_str
            .parse()
            .map_err(|_| format!("Invalid modifier: {}", mod_str))?;
        (&rest[..plus_pos], modifier)
    } else if let Some(minus_pos) = rest.rfind('-').filter(|p| *p > 0) {
        let mod_str = &rest[minus_pos..]; // keeps the sign
        let modifier: i32 = mod_str
            .parse()
            .map_err(|_| format!("Invalid modifier: {}", mod_str))?;
        (&rest[..minus_pos], modifier)
    } else {
        (rest, 0)
    };

    let sides: u32 = sides_str
        .parse()
        .map_err(|_| format!("Invalid die sides: {}", sides_str))?;

    if sides == 0 {
        return Err("Die sides must be at least 1".to_string());
    }
    if sides > MAX_SIDES {
        return Err(format!("Die sides must be at most {}", MAX_SIDES));
    }

    Ok(DiceRoll { count, sides, modifier })
}

/// Roll a single d20 (initiative)
pub fn roll_d20<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    rng.random_range(1..=20)
}
