//! In-memory NPCs implementing every actor capability

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::room::Room;
use crate::actor::{
    Actor, ActorRef, DefeatMarker, Locatable, Location, Messageable, MoveError, PersistError,
    Persistable, Rewardable, Scavenger, Targeting, TurnHook,
};
use crate::ai::{AiControlled, AiProfile, Charm};
use crate::combat::{Attack, Reward};

/// Messages kept per mob
const INBOX_LIMIT: usize = 256;

#[derive(Default)]
struct MobState {
    hp: i32,
    max_hp: i32,
    target: Option<Weak<dyn Actor>>,
    room: Weak<Room>,
    inbox: VecDeque<String>,
    memory: Vec<String>,
    charm: Option<Charm>,
    inventory: Vec<String>,
    rewards: Reward,
    saves: usize,
    dirty: bool,
}

pub struct Mob {
    id: String,
    name: String,
    faction: Option<String>,
    attack: Attack,
    profile: Option<AiProfile>,
    persistent: bool,
    failing_save: bool,
    hook: Option<Box<dyn TurnHook + Send + Sync>>,
    defeat: DefeatMarker,
    me: Weak<Mob>,
    state: Mutex<MobState>,
}

impl std::fmt::Debug for Mob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mob")
            .field("id", &self.id)
            .field("hp", &state.hp)
            .field("max_hp", &state.max_hp)
            .finish()
    }
}

pub struct MobBuilder {
    id: String,
    name: String,
    hp: i32,
    max_hp: Option<i32>,
    faction: Option<String>,
    attack: Attack,
    profile: Option<AiProfile>,
    persistent: bool,
    failing_save: bool,
    hook: Option<Box<dyn TurnHook + Send + Sync>>,
}

impl MobBuilder {
    pub fn hp(mut self, hp: i32) -> Self {
        self.hp = hp;
        self
    }

    /// Defaults to the starting hp
    pub fn max_hp(mut self, max_hp: i32) -> Self {
        self.max_hp = Some(max_hp);
        self
    }

    pub fn faction(mut self, faction: &str) -> Self {
        self.faction = Some(faction.to_string());
        self
    }

    pub fn attack(mut self, attack: Attack) -> Self {
        self.attack = attack;
        self
    }

    pub fn ai(mut self, profile: AiProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Must be saved before joining combat
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.failing_save = true;
        self
    }

    pub fn turn_hook(mut self, hook: impl TurnHook + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Arc<Mob> {
        let max_hp = self.max_hp.unwrap_or(self.hp).max(1);
        Arc::new_cyclic(|me| Mob {
            id: self.id,
            name: self.name,
            faction: self.faction,
            attack: self.attack,
            profile: self.profile,
            persistent: self.persistent,
            failing_save: self.failing_save,
            hook: self.hook,
            defeat: DefeatMarker::new(),
            me: me.clone(),
            state: Mutex::new(MobState {
                hp: self.hp,
                max_hp,
                dirty: true,
                ..MobState::default()
            }),
        })
    }
}

impl Mob {
    pub fn builder(id: &str, name: &str) -> MobBuilder {
        MobBuilder {
            id: id.to_string(),
            name: name.to_string(),
            hp: 10,
            max_hp: None,
            faction: None,
            attack: Attack::default(),
            profile: None,
            persistent: false,
            failing_save: false,
            hook: None,
        }
    }

    pub(crate) fn id_str(&self) -> &str {
        &self.id
    }

    pub fn room(&self) -> Option<Arc<Room>> {
        self.state.lock().room.upgrade()
    }

    pub(crate) fn place(&self, room: &Arc<Room>) {
        self.state.lock().room = Arc::downgrade(room);
    }

    pub(crate) fn hear(&self, message: &str) {
        let mut state = self.state.lock();
        if state.inbox.len() == INBOX_LIMIT {
            state.inbox.pop_front();
        }
        state.inbox.push_back(message.to_string());
    }

    /// Messages received so far, oldest first
    pub fn inbox(&self) -> Vec<String> {
        self.state.lock().inbox.iter().cloned().collect()
    }

    pub fn inventory(&self) -> Vec<String> {
        self.state.lock().inventory.clone()
    }

    pub fn rewards(&self) -> Reward {
        self.state.lock().rewards.clone()
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    pub fn set_charm(&self, charm: Option<Charm>) {
        self.state.lock().charm = charm;
    }

    /// Full heal and clear the defeat marker
    pub fn respawn(&self) {
        {
            let mut state = self.state.lock();
            state.hp = state.max_hp;
            state.target = None;
        }
        self.defeat.clear();
    }
}

impl Actor for Mob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn health(&self) -> i32 {
        self.state.lock().hp
    }

    fn max_health(&self) -> i32 {
        self.state.lock().max_hp
    }

    fn set_health(&self, hp: i32) {
        let mut state = self.state.lock();
        state.hp = hp.min(state.max_hp);
        state.dirty = true;
    }

    fn defeat_marker(&self) -> &DefeatMarker {
        &self.defeat
    }

    fn natural_attack(&self) -> Attack {
        self.attack.clone()
    }

    fn faction(&self) -> Option<&str> {
        self.faction.as_deref()
    }

    fn messageable(&self) -> Option<&dyn Messageable> {
        Some(self)
    }

    fn locatable(&self) -> Option<&dyn Locatable> {
        Some(self)
    }

    fn persistable(&self) -> Option<&dyn Persistable> {
        self.persistent.then_some(self as &dyn Persistable)
    }

    fn turn_hook(&self) -> Option<&dyn TurnHook> {
        self.hook.as_deref().map(|h| h as &dyn TurnHook)
    }

    fn targeting(&self) -> Option<&dyn Targeting> {
        Some(self)
    }

    fn rewardable(&self) -> Option<&dyn Rewardable> {
        Some(self)
    }

    fn scavenger(&self) -> Option<&dyn Scavenger> {
        Some(self)
    }

    fn ai(&self) -> Option<&dyn AiControlled> {
        self.profile.as_ref().map(|_| self as &dyn AiControlled)
    }
}

impl Messageable for Mob {
    fn send(&self, message: &str) {
        self.hear(message);
    }
}

impl Locatable for Mob {
    fn location(&self) -> Option<Arc<dyn Location>> {
        self.room().map(|room| room as Arc<dyn Location>)
    }

    fn travel(&self, exit: &str) -> Result<(), MoveError> {
        let here = self
            .room()
            .ok_or_else(|| MoveError::Blocked(format!("{} is nowhere", self.id)))?;
        let there = here
            .exit(exit)
            .ok_or_else(|| MoveError::NoSuchExit(exit.to_string()))?;
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| MoveError::Blocked(format!("{} is gone", self.id)))?;
        there.admit(&me);
        Ok(())
    }
}

impl Persistable for Mob {
    fn needs_save(&self) -> bool {
        self.state.lock().dirty
    }

    fn save(&self) -> Result<(), PersistError> {
        if self.failing_save {
            return Err(PersistError {
                actor: self.id.clone(),
                reason: "storage unavailable".to_string(),
            });
        }
        let mut state = self.state.lock();
        state.saves += 1;
        state.dirty = false;
        Ok(())
    }
}

impl Targeting for Mob {
    fn combat_target(&self) -> Option<ActorRef> {
        self.state.lock().target.as_ref().and_then(Weak::upgrade)
    }

    fn set_combat_target(&self, target: Option<&ActorRef>) {
        self.state.lock().target = target.map(Arc::downgrade);
    }
}

impl Rewardable for Mob {
    fn receive_reward(&self, reward: &Reward) {
        let mut state = self.state.lock();
        state.rewards.experience += reward.experience;
        state.rewards.currency += reward.currency;
    }
}

impl Scavenger for Mob {
    fn take_item(&self, item: &str) -> Result<(), MoveError> {
        let room = self
            .room()
            .ok_or_else(|| MoveError::NoSuchItem(item.to_string()))?;
        if !room.take_item(item) {
            return Err(MoveError::NoSuchItem(item.to_string()));
        }
        self.state.lock().inventory.push(item.to_string());
        Ok(())
    }
}

impl AiControlled for Mob {
    fn profile(&self) -> AiProfile {
        self.profile.clone().unwrap_or_default()
    }

    fn remembered(&self) -> Vec<String> {
        self.state.lock().memory.clone()
    }

    fn remember(&self, actor_id: &str) {
        let mut state = self.state.lock();
        if !state.memory.iter().any(|m| m == actor_id) {
            state.memory.push(actor_id.to_string());
        }
    }

    fn forget(&self, actor_id: &str) {
        self.state.lock().memory.retain(|m| m != actor_id);
    }

    fn charm(&self) -> Option<Charm> {
        self.state.lock().charm.clone()
    }

    fn release_charm(&self) {
        self.state.lock().charm = None;
    }
}
