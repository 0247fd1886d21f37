//! Process-wide registry of combat instances
//!
//! [`CombatRoundManager`] is a cheap cloneable handle. It keeps the
//! id→instance map and the actor→instance index behind one coarse lock,
//! guarantees an actor is in at most one live instance, and drives the
//! shared tick loop while any instance is registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::action::Action;
use super::engine::{CombatEngine, CombatServices};
use super::error::CombatError;
use super::events::{CombatEvent, EventBus};
use super::instance::CombatInstance;
use crate::actor::{location_of, ActorId, ActorRef};
use crate::config::CombatConfig;
use crate::timers::TimerManager;

#[derive(Default)]
struct Registry {
    instances: HashMap<String, Arc<CombatInstance>>,
    /// actor id -> instance id
    index: HashMap<ActorId, String>,
}

impl Registry {
    fn live(&self, actor_id: &str) -> Option<&Arc<CombatInstance>> {
        self.index
            .get(actor_id)
            .and_then(|id| self.instances.get(id))
            .filter(|i| !i.is_ended())
    }

    fn remove(&mut self, instance_id: &str) -> Option<Arc<CombatInstance>> {
        self.index.retain(|_, id| id != instance_id);
        self.instances.remove(instance_id)
    }
}

/// State shared by every manager handle and weakly by each instance
pub(crate) struct ManagerShared {
    registry: RwLock<Registry>,
    config: CombatConfig,
    services: CombatServices,
    events: EventBus,
    timers: TimerManager,
    rng: SyncMutex<StdRng>,
    serial: AtomicU64,
    running: AtomicBool,
    ticker: SyncMutex<Option<JoinHandle<()>>>,
}

impl ManagerShared {
    pub(crate) async fn index(&self, actor_id: &str, instance_id: &str) {
        self.registry
            .write()
            .await
            .index
            .insert(actor_id.to_string(), instance_id.to_string());
    }

    /// Forget index entries, but only those still pointing at `instance_id`
    pub(crate) async fn deindex(&self, actor_ids: &[ActorId], instance_id: &str) {
        let mut registry = self.registry.write().await;
        for actor_id in actor_ids {
            if registry.index.get(actor_id).is_some_and(|id| id == instance_id) {
                registry.index.remove(actor_id);
            }
        }
    }

    pub(crate) async fn deregister(&self, instance_id: &str) {
        if self.registry.write().await.remove(instance_id).is_some() {
            debug!("Deregistered combat {}", instance_id);
        }
    }
}

#[derive(Clone)]
pub struct CombatRoundManager {
    shared: Arc<ManagerShared>,
}

impl std::fmt::Debug for CombatRoundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombatRoundManager")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl CombatRoundManager {
    pub fn new(config: CombatConfig, services: CombatServices) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            shared: Arc::new(ManagerShared {
                registry: RwLock::new(Registry::default()),
                config,
                services,
                events: EventBus::default(),
                timers: TimerManager::new(),
                rng: SyncMutex::new(rng),
                serial: AtomicU64::new(0),
                running: AtomicBool::new(false),
                ticker: SyncMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CombatConfig {
        &self.shared.config
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Whether the shared tick loop is currently running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub async fn instance_count(&self) -> usize {
        self.shared.registry.read().await.instances.len()
    }

    /// Round timers still waiting to fire, across every instance
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.pending_count()
    }

    /// Register `actors` in combat without arming a round timer.
    ///
    /// If any actor already fights in a live instance, everyone else is
    /// folded into that instance instead. Actors whose save fails, or who
    /// are bound to some other live instance, are skipped.
    pub async fn create_combat(
        &self,
        actors: &[ActorRef],
        round_time: Option<Duration>,
    ) -> Result<Arc<CombatInstance>, CombatError> {
        let instance = {
            let mut registry = self.shared.registry.write().await;

            let existing = actors
                .iter()
                .find_map(|a| registry.live(a.id()))
                .cloned();
            let created = existing.is_none();
            let instance = match existing {
                Some(instance) => instance,
                None => self.new_instance(actors, round_time),
            };

            let mut joined: Vec<ActorId> = Vec::new();
            for actor in actors {
                if let Some(current) = registry.live(actor.id()) {
                    if current.id() != instance.id() {
                        debug!("{} already fighting in {}", actor.id(), current.id());
                    }
                    continue;
                }

                match instance.admit(actor).await {
                    Ok(_) => {
                        registry
                            .index
                            .insert(actor.id().to_string(), instance.id().to_string());
                        joined.push(actor.id().to_string());
                    }
                    Err(e) => warn!("{} excluded from combat: {}", actor.id(), e),
                }
            }

            if created {
                if joined.is_empty() {
                    return Err(CombatError::NoCombatants);
                }
                registry
                    .instances
                    .insert(instance.id().to_string(), instance.clone());
                info!("Combat {} started with {}", instance.id(), joined.join(", "));
                self.shared.events.emit(CombatEvent::CombatStarted {
                    instance_id: instance.id().to_string(),
                    combatants: joined,
                });
            } else if !joined.is_empty() {
                info!("{} joined combat {}", joined.join(", "), instance.id());
            }

            instance
        };

        self.ensure_ticking();
        Ok(instance)
    }

    /// Like [`create_combat`](Self::create_combat), and arm the first round
    pub async fn start_combat(
        &self,
        actors: &[ActorRef],
        round_time: Option<Duration>,
    ) -> Result<Arc<CombatInstance>, CombatError> {
        let instance = self.create_combat(actors, round_time).await?;
        instance.ensure_scheduled().await;
        Ok(instance)
    }

    fn new_instance(&self, actors: &[ActorRef], round_time: Option<Duration>) -> Arc<CombatInstance> {
        let config = &self.shared.config;
        let seed: u64 = self.shared.rng.lock().random();
        let engine = CombatEngine::new(self.shared.services.clone(), config.haste_rule(), seed)
            .with_round_time(round_time);
        let room = actors.iter().find_map(|a| location_of(&**a));

        CombatInstance::new(
            self.shared.serial.fetch_add(1, Ordering::Relaxed),
            room,
            engine,
            self.shared.timers.clone(),
            self.shared.events.clone(),
            Arc::downgrade(&self.shared),
        )
    }

    pub async fn get_combatant_combat(&self, actor_id: &str) -> Option<Arc<CombatInstance>> {
        self.shared.registry.read().await.live(actor_id).cloned()
    }

    pub async fn queue_action(&self, actor: &ActorRef, action: Action) -> Result<(), CombatError> {
        let instance = self
            .get_combatant_combat(actor.id())
            .await
            .ok_or_else(|| CombatError::NotInCombat(actor.id().to_string()))?;
        instance.queue_action(actor, action).await
    }

    /// Everyone who has hit `actor_id` in its current encounter
    pub async fn aggressors_of(&self, actor_id: &str) -> Vec<ActorId> {
        match self.get_combatant_combat(actor_id).await {
            Some(instance) => instance.aggressors_of(actor_id).await,
            None => Vec::new(),
        }
    }

    /// End and deregister one instance. Returns false if it was not registered.
    pub async fn remove_instance(&self, instance_id: &str) -> bool {
        let instance = self
            .shared
            .registry
            .read()
            .await
            .instances
            .get(instance_id)
            .cloned();
        match instance {
            Some(instance) => {
                instance.end_combat("The fight is over.").await;
                self.shared.deregister(instance_id).await;
                true
            }
            None => false,
        }
    }

    /// End every instance, cancel every round timer and stop the loop.
    ///
    /// Safe to call repeatedly; returns how many instances were ended.
    pub async fn force_end_all_combat(&self) -> usize {
        let instances: Vec<Arc<CombatInstance>> = {
            let mut registry = self.shared.registry.write().await;
            registry.index.clear();
            registry.instances.drain().map(|(_, i)| i).collect()
        };

        for instance in &instances {
            instance.end_combat("Combat has been called off.").await;
        }

        let stray = self.shared.timers.cancel_all();
        if stray > 0 {
            warn!("Cancelled {} stray round timers", stray);
        }
        self.stop_loop();

        if !instances.is_empty() {
            info!("Force-ended {} combat instances", instances.len());
        }
        instances.len()
    }

    /// Return to a pristine state between tests or world reloads
    pub async fn reset(&self) {
        self.force_end_all_combat().await;
    }

    /// One pass of the shared loop. Returns whether any instance remains.
    pub async fn tick(&self) -> bool {
        let mut instances: Vec<Arc<CombatInstance>> = self
            .shared
            .registry
            .read()
            .await
            .instances
            .values()
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.serial());

        for instance in instances {
            if instance.is_ended() {
                warn!("Dropping stale combat instance {}", instance.id());
                self.shared.deregister(instance.id()).await;
                continue;
            }

            instance.sync_participants().await;
            if instance.living_count().await == 0 {
                instance.end_combat("No one is left standing.").await;
                continue;
            }

            if instance.is_self_scheduled() {
                instance.ensure_scheduled().await;
            } else {
                Self::run_round(instance).await;
            }
        }

        !self.shared.registry.read().await.instances.is_empty()
    }

    /// Run one loop-driven round in its own task so a panic stays inside
    /// that encounter. A panicking instance is ended.
    async fn run_round(instance: Arc<CombatInstance>) {
        let round = tokio::spawn({
            let instance = instance.clone();
            async move {
                instance.process_round().await;
            }
        });

        if let Err(e) = round.await {
            if e.is_panic() {
                error!("Round in combat {} panicked", instance.id());
                instance.end_combat("The fight falls apart.").await;
            }
        }
    }

    /// Start the shared loop unless it is already running
    fn ensure_ticking(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.run_loop().await });
        *self.shared.ticker.lock() = Some(handle);
    }

    async fn run_loop(self) {
        let _guard = LoopGuard(&self.shared.running);
        let mut interval = tokio::time::interval(self.shared.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        debug!("Combat loop started");

        loop {
            interval.tick().await;
            if self.tick().await {
                continue;
            }

            // Empty: stop, unless a creation raced in after the last pass
            self.shared.running.store(false, Ordering::Release);
            if self.shared.registry.read().await.instances.is_empty() {
                break;
            }
            if self.shared.running.swap(true, Ordering::AcqRel) {
                break;
            }
        }

        debug!("Combat loop stopped");
    }

    fn stop_loop(&self) {
        if let Some(handle) = self.shared.ticker.lock().take() {
            handle.abort();
        }
        self.shared.running.store(false, Ordering::Release);
    }
}

/// Clears the running flag if the loop task unwinds
struct LoopGuard<'a>(&'a AtomicBool);

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(false, Ordering::Release);
        }
    }
}
