//! Reference host world
//!
//! Just enough of a MUD to drive the engine: rooms with exits, loose items
//! and a transcript, and mobs that implement every actor capability.

mod mob;
mod room;

pub use mob::{Mob, MobBuilder};
pub use room::Room;
