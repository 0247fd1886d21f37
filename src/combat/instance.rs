//! One running encounter
//!
//! A [`CombatInstance`] owns exactly one [`CombatEngine`] plus the
//! authoritative membership list. The engine's participant list may lag
//! behind membership until [`CombatInstance::sync_participants`] runs.
//!
//! Lock order: the manager registry may be held while taking an instance's
//! state lock, never the other way around.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::action::Action;
use super::engine::{CombatEngine, RoundReport};
use super::error::CombatError;
use super::events::{CombatEvent, EventBus};
use super::manager::ManagerShared;
use crate::actor::{ActorId, ActorRef, Location};
use crate::timers::{TimerHandle, TimerManager};

struct InstanceState {
    engine: CombatEngine,
    combatants: Vec<ActorRef>,
    timer: Option<TimerHandle>,
}

impl InstanceState {
    fn is_member(&self, actor_id: &str) -> bool {
        self.combatants.iter().any(|a| a.id() == actor_id)
    }

    /// Set-difference reconciliation of engine participants against membership
    fn sync(&mut self) -> (usize, usize) {
        let missing: Vec<ActorRef> = self
            .combatants
            .iter()
            .filter(|a| !self.engine.contains(a.id()))
            .cloned()
            .collect();
        let stale: Vec<ActorId> = self
            .engine
            .participants()
            .iter()
            .filter(|p| !self.is_member(p.id()))
            .map(|p| p.id().to_string())
            .collect();

        for actor in &missing {
            self.engine.add_participant(actor.clone());
        }
        for id in &stale {
            self.engine.remove_participant(id);
        }
        (missing.len(), stale.len())
    }
}

pub struct CombatInstance {
    id: String,
    serial: u64,
    room: Option<Arc<dyn Location>>,
    round_time: Option<Duration>,
    ended: AtomicBool,
    state: Mutex<InstanceState>,
    timers: TimerManager,
    events: EventBus,
    registry: Weak<ManagerShared>,
}

impl std::fmt::Debug for CombatInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombatInstance")
            .field("id", &self.id)
            .field("round_time", &self.round_time)
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl CombatInstance {
    pub(crate) fn new(
        serial: u64,
        room: Option<Arc<dyn Location>>,
        engine: CombatEngine,
        timers: TimerManager,
        events: EventBus,
        registry: Weak<ManagerShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: format!("combat-{}", uuid::Uuid::new_v4()),
            serial,
            room,
            round_time: engine.round_time(),
            ended: AtomicBool::new(false),
            state: Mutex::new(InstanceState {
                engine,
                combatants: Vec::new(),
                timer: None,
            }),
            timers,
            events,
            registry,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation order within the owning manager
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn room(&self) -> Option<&Arc<dyn Location>> {
        self.room.as_ref()
    }

    pub fn round_time(&self) -> Option<Duration> {
        self.round_time
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Rounds fire on the instance's own timer rather than the shared loop
    pub fn is_self_scheduled(&self) -> bool {
        self.round_time.is_some_and(|d| !d.is_zero())
    }

    pub async fn combatants(&self) -> Vec<ActorRef> {
        self.state.lock().await.combatants.clone()
    }

    pub async fn contains(&self, actor_id: &str) -> bool {
        self.state.lock().await.is_member(actor_id)
    }

    pub async fn living_count(&self) -> usize {
        self.state
            .lock()
            .await
            .combatants
            .iter()
            .filter(|a| a.is_alive())
            .count()
    }

    pub async fn round(&self) -> u64 {
        self.state.lock().await.engine.round()
    }

    pub async fn has_queued(&self, actor_id: &str) -> bool {
        self.state.lock().await.engine.has_queued(actor_id)
    }

    pub async fn aggressors_of(&self, actor_id: &str) -> Vec<ActorId> {
        self.state.lock().await.engine.aggressors_of(actor_id)
    }

    pub async fn has_pending_timer(&self) -> bool {
        let state = self.state.lock().await;
        state
            .timer
            .as_ref()
            .is_some_and(|h| self.timers.is_pending(h))
    }

    /// Persist if needed, then add to membership and the engine.
    ///
    /// Returns `Ok(false)` if the actor was already a member.
    pub(crate) async fn admit(&self, actor: &ActorRef) -> Result<bool, CombatError> {
        if self.is_ended() {
            return Err(CombatError::InstanceEnded(self.id.clone()));
        }

        let mut state = self.state.lock().await;
        if state.is_member(actor.id()) {
            return Ok(false);
        }

        if let Some(store) = actor.persistable() {
            if store.needs_save() {
                store.save()?;
            }
        }

        state.combatants.push(actor.clone());
        state.engine.add_participant(actor.clone());
        debug!("{} joined {}", actor.id(), self.id);
        Ok(true)
    }

    /// Add a combatant and index it with the owning manager
    pub async fn add_combatant(&self, actor: &ActorRef) -> Result<bool, CombatError> {
        let added = self.admit(actor).await.inspect_err(|e| {
            warn!("{} could not join {}: {}", actor.id(), self.id, e);
        })?;
        if added {
            if let Some(shared) = self.registry.upgrade() {
                shared.index(actor.id(), &self.id).await;
            }
        }
        Ok(added)
    }

    /// Drop a combatant (fled, teleported). Returns false if not a member.
    pub async fn remove_combatant(&self, actor_id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock().await;
            let before = state.combatants.len();
            state.combatants.retain(|a| a.id() != actor_id);
            state.engine.remove_participant(actor_id);
            before != state.combatants.len()
        };

        if removed {
            if let Some(shared) = self.registry.upgrade() {
                shared.deindex(&[actor_id.to_string()], &self.id).await;
            }
        }
        removed
    }

    /// Reconcile engine participants with membership. Returns (added, removed).
    pub async fn sync_participants(&self) -> (usize, usize) {
        self.state.lock().await.sync()
    }

    pub async fn queue_action(&self, actor: &ActorRef, action: Action) -> Result<(), CombatError> {
        if self.is_ended() {
            return Err(CombatError::InstanceEnded(self.id.clone()));
        }
        let mut state = self.state.lock().await;
        if !state.is_member(actor.id()) {
            return Err(CombatError::NotParticipant(actor.id().to_string()));
        }
        state.sync();
        state.engine.queue_action(actor, action)
    }

    /// Run one round, then decide whether the encounter is over.
    ///
    /// Returns `None` if the instance had already ended.
    pub async fn process_round(self: &Arc<Self>) -> Option<RoundReport> {
        if self.is_ended() {
            return None;
        }

        let mut state = self.state.lock().await;
        if self.is_ended() {
            return None;
        }
        // A direct call supersedes any round already waiting on the timer
        if let Some(handle) = state.timer.take() {
            self.timers.cancel(&handle);
        }

        state.sync();
        let report = state.engine.process_round();

        let fallen: Vec<ActorId> = report.defeated.iter().map(|d| d.victim.clone()).collect();
        for id in &fallen {
            state.combatants.retain(|a| a.id() != id);
            state.engine.remove_participant(id);
        }

        let ending = report.survivors <= 1;
        if !ending {
            if let Some(delay) = report.next_round_in {
                self.schedule(&mut state, delay);
            }
        }
        let victor = state
            .combatants
            .iter()
            .find(|a| a.is_alive())
            .map(|a| a.name());
        drop(state);

        if !fallen.is_empty() {
            if let Some(shared) = self.registry.upgrade() {
                shared.deindex(&fallen, &self.id).await;
            }
        }

        self.events.emit(CombatEvent::RoundProcessed {
            instance_id: self.id.clone(),
            round: report.round,
            actions: report.executed.len(),
        });
        for defeat in &report.defeated {
            self.events.emit(CombatEvent::CombatantDefeated {
                instance_id: self.id.clone(),
                victim: defeat.victim.clone(),
                killer: defeat.killer.clone(),
            });
        }

        if ending {
            let reason = match victor {
                Some(name) => format!("{} is victorious.", name),
                None => "No one is left standing.".to_string(),
            };
            self.end_combat(&reason).await;
        }

        Some(report)
    }

    /// End the encounter. Only the first call has any effect.
    pub async fn end_combat(&self, reason: &str) -> bool {
        if self
            .ended
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let combatants = {
            let mut state = self.state.lock().await;
            if let Some(handle) = state.timer.take() {
                self.timers.cancel(&handle);
            }
            std::mem::take(&mut state.combatants)
        };

        for actor in &combatants {
            if let Some(targeting) = actor.targeting() {
                targeting.set_combat_target(None);
            }
        }

        if let Some(shared) = self.registry.upgrade() {
            shared.deregister(&self.id).await;
        }

        if let Some(room) = &self.room {
            room.broadcast(reason);
        }

        info!("Combat {} ended: {}", self.id, reason);
        self.events.emit(CombatEvent::CombatEnded {
            instance_id: self.id.clone(),
            reason: reason.to_string(),
        });
        true
    }

    #[cfg(test)]
    pub(crate) fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }

    /// Arm the round timer if this instance is self-scheduled and idle
    pub(crate) async fn ensure_scheduled(self: &Arc<Self>) {
        let Some(delay) = self.round_time.filter(|d| !d.is_zero()) else {
            return;
        };
        if self.is_ended() {
            return;
        }

        let mut state = self.state.lock().await;
        let armed = state
            .timer
            .as_ref()
            .is_some_and(|h| self.timers.is_pending(h));
        if !armed {
            self.schedule(&mut state, delay);
        }
    }

    fn schedule(self: &Arc<Self>, state: &mut InstanceState, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        if let Some(old) = state.timer.take() {
            self.timers.cancel(&old);
        }
        let label = format!("round:{}", self.id);
        let handle = self
            .timers
            .call_out(&label, delay, Self::tick(Arc::downgrade(self)));
        state.timer = Some(handle);
    }

    fn tick(instance: Weak<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if let Some(instance) = instance.upgrade() {
                instance.process_round().await;
            }
        })
    }
}
