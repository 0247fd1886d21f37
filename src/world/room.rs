//! In-memory rooms

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::mob::Mob;
use crate::actor::{ActorRef, Location};
use crate::ai::Roster;

/// Broadcasts remembered per room
const TRANSCRIPT_LIMIT: usize = 256;

#[derive(Default)]
struct RoomState {
    occupants: Vec<Arc<Mob>>,
    exits: BTreeMap<String, Weak<Room>>,
    items: Vec<String>,
    transcript: VecDeque<String>,
}

pub struct Room {
    id: String,
    name: String,
    state: RwLock<RoomState>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("occupants", &state.occupants.len())
            .field("exits", &state.exits.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Room {
    pub fn new(id: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            name: name.to_string(),
            state: RwLock::new(RoomState::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-way exit
    pub fn link(&self, exit: &str, to: &Arc<Room>) {
        self.state
            .write()
            .exits
            .insert(exit.to_string(), Arc::downgrade(to));
    }

    pub fn exit(&self, exit: &str) -> Option<Arc<Room>> {
        self.state.read().exits.get(exit).and_then(Weak::upgrade)
    }

    /// Move `mob` here from wherever it was
    pub fn admit(self: &Arc<Self>, mob: &Arc<Mob>) {
        if let Some(previous) = mob.room() {
            previous.release(mob.id_str());
        }
        {
            let mut state = self.state.write();
            if !state.occupants.iter().any(|m| Arc::ptr_eq(m, mob)) {
                state.occupants.push(mob.clone());
            }
        }
        mob.place(self);
    }

    pub(crate) fn release(&self, mob_id: &str) {
        self.state.write().occupants.retain(|m| m.id_str() != mob_id);
    }

    pub fn drop_item(&self, item: &str) {
        self.state.write().items.push(item.to_string());
    }

    /// Remove an item by name. Returns false if it is not here.
    pub fn take_item(&self, item: &str) -> bool {
        let mut state = self.state.write();
        match state.items.iter().position(|i| i == item) {
            Some(idx) => {
                state.items.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn mobs(&self) -> Vec<Arc<Mob>> {
        self.state.read().occupants.clone()
    }

    /// Recent broadcasts, oldest first
    pub fn transcript(&self) -> Vec<String> {
        self.state.read().transcript.iter().cloned().collect()
    }
}

impl Location for Room {
    fn id(&self) -> &str {
        &self.id
    }

    fn broadcast(&self, message: &str) {
        let occupants = {
            let mut state = self.state.write();
            if state.transcript.len() == TRANSCRIPT_LIMIT {
                state.transcript.pop_front();
            }
            state.transcript.push_back(message.to_string());
            state.occupants.clone()
        };
        for mob in occupants {
            mob.hear(message);
        }
    }

    fn occupants(&self) -> Vec<ActorRef> {
        self.state
            .read()
            .occupants
            .iter()
            .map(|m| m.clone() as ActorRef)
            .collect()
    }

    fn exits(&self) -> Vec<String> {
        self.state.read().exits.keys().cloned().collect()
    }

    fn items(&self) -> Vec<String> {
        self.state.read().items.clone()
    }
}

impl Roster for Room {
    fn actors(&self) -> Vec<ActorRef> {
        self.occupants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Mob;

    #[test]
    fn test_transcript_keeps_only_recent_lines() {
        let room = Room::new("hall", "Hall");
        for n in 0..TRANSCRIPT_LIMIT + 44 {
            room.broadcast(&format!("line {}", n));
        }

        let transcript = room.transcript();
        assert_eq!(transcript.len(), TRANSCRIPT_LIMIT);
        assert_eq!(transcript[0], "line 44");
        assert_eq!(
            transcript[TRANSCRIPT_LIMIT - 1],
            format!("line {}", TRANSCRIPT_LIMIT + 43)
        );
    }

    #[test]
    fn test_broadcast_reaches_occupants() {
        let room = Room::new("hall", "Hall");
        let mob = Mob::builder("m", "a moth").hp(1).build();
        room.admit(&mob);
        room.broadcast("A bell tolls.");
        assert_eq!(mob.inbox(), vec!["A bell tolls."]);
        assert_eq!(room.transcript(), vec!["A bell tolls."]);
    }
}
