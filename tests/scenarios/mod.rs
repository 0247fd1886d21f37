//! Scenario tests for combatd
//!
//! - Rounds: ordering, haste, defeat, hesitation
//! - Encounters: instance registry, scheduling, shutdown
//! - AI: dispatcher sweeps feeding the combat manager

pub mod ai;
pub mod encounters;
pub mod rounds;
