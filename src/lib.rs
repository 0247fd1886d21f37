//! combatd - round-based combat engine and encounter scheduler
//!
//! Many concurrent encounters on one shared tick loop, AI dispatch on its
//! own cadence, and a small in-memory world to drive them.

pub mod actor;
pub mod ai;
pub mod combat;
pub mod config;
pub mod timers;
pub mod world;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};

pub use actor::{Actor, ActorId, ActorRef};
pub use ai::{AiDispatcher, AiProfile, AiRegistry, Roster, SandboxConfig, ScriptRegistry};
pub use combat::{
    Action, CombatEngine, CombatError, CombatEvent, CombatInstance, CombatRoundManager,
    CombatServices,
};
pub use config::{Config, ConfigError};
pub use world::{Mob, Room};

use combat::{Attack, DamageType, DiceRoll};

const MOB_NAMES: &[&str] = &[
    "a goblin",
    "an orc",
    "a kobold",
    "a hobgoblin",
    "a gnoll",
    "a bugbear",
];

/// Outcome of an arena run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArenaReport {
    pub rounds: u64,
    pub defeated: usize,
    pub survivors: Vec<String>,
    /// Instances still live at shutdown
    pub force_ended: usize,
}

/// One room full of aggressive mobs, fought out to the last one standing
pub struct Arena {
    config: Config,
    room: Arc<Room>,
    combat: CombatRoundManager,
    dispatcher: Arc<AiDispatcher>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Arena {
    pub fn new(config: Config, mobs: usize) -> Self {
        let mut rng = match config.combat.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let room = Room::new("arena", "The Arena");
        for i in 0..mobs {
            let base = MOB_NAMES[i % MOB_NAMES.len()];
            let name = match i / MOB_NAMES.len() {
                0 => base.to_string(),
                n => format!("{} #{}", base, n + 1),
            };
            let attack = Attack::new(
                DiceRoll::new(1, rng.random_range(4..=8), 0),
                DamageType::Physical,
                "hits",
            );
            let mob = Mob::builder(&format!("mob-{}", i + 1), &name)
                .hp(rng.random_range(20..=40))
                .attack(attack)
                .ai(AiProfile {
                    memory: true,
                    ..AiProfile::new("aggressive")
                })
                .build();
            room.admit(&mob);
        }

        let scripts = Arc::new(ScriptRegistry::new(
            config.ai.script_namespaces.clone(),
            SandboxConfig::from(&config.ai.sandbox),
        ));
        let combat = CombatRoundManager::new(config.combat.clone(), CombatServices::default());
        let dispatcher = Arc::new(AiDispatcher::new(
            Arc::new(AiRegistry::standard(scripts)),
            combat.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            room,
            combat,
            dispatcher,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn combat(&self) -> &CombatRoundManager {
        &self.combat
    }

    /// Run until at most one mob is standing and no fight is live, or
    /// until [`Arena::shutdown`] is called
    pub async fn run(&self) -> ArenaReport {
        let mut events = self.combat.events().subscribe();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let roster: Arc<dyn Roster> = self.room.clone();
        let sweeper = self
            .dispatcher
            .clone()
            .spawn(roster, self.config.ai.sweep_interval());

        info!("Arena open with {} mobs", self.room.mobs().len());

        let mut report = ArenaReport::default();
        while !self.settled().await {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(envelope) => match envelope.event {
                        CombatEvent::RoundProcessed { .. } => report.rounds += 1,
                        CombatEvent::CombatantDefeated { victim, .. } => {
                            report.defeated += 1;
                            info!("{} was defeated", victim);
                        }
                        _ => {}
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event stream lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown_rx.changed() => {
                    info!("Arena shutdown requested");
                    break;
                }
            }
        }

        sweeper.abort();
        report.force_ended = self.combat.force_end_all_combat().await;
        report.survivors = self
            .room
            .mobs()
            .iter()
            .filter(|m| m.is_alive())
            .map(|m| m.name())
            .collect();
        info!("Arena closed after {} rounds", report.rounds);
        report
    }

    async fn settled(&self) -> bool {
        let standing = self.room.mobs().iter().filter(|m| m.is_alive()).count();
        standing <= 1 && self.combat.instance_count().await == 0
    }

    /// Signal the arena to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(seed: u64) -> Config {
        let mut config = Config::default();
        config.combat.rng_seed = Some(seed);
        config.combat.tick_interval_ms = 100;
        config.combat.round_time_ms = 0;
        config.ai.sweep_interval_ms = 50;
        config
    }

    #[test]
    fn test_arena_names_repeat_with_suffix() {
        let arena = Arena::new(fast_config(1), MOB_NAMES.len() + 1);
        let names: Vec<String> = arena.room().mobs().iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), MOB_NAMES.len() + 1);
        assert_eq!(names[0], "a goblin");
        assert_eq!(names[MOB_NAMES.len()], "a goblin #2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_arena_fights_to_last_standing() {
        let arena = Arena::new(fast_config(7), 3);
        let report = arena.run().await;

        assert_eq!(report.survivors.len(), 1);
        assert!(report.rounds > 0);
        assert_eq!(report.force_ended, 0);
        let standing = arena.room().mobs().iter().filter(|m| m.is_alive()).count();
        assert_eq!(standing, 1);
        assert_eq!(arena.combat().instance_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_mob_arena_settles_immediately() {
        let arena = Arena::new(fast_config(3), 1);
        let report = arena.run().await;
        assert_eq!(report.survivors.len(), 1);
        assert_eq!(report.rounds, 0);
    }
}
