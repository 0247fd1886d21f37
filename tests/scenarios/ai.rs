//! AI sweeps feeding the combat manager

use std::sync::Arc;

use combatd::actor::Targeting;
use combatd::ai::{AiDispatcher, AiProfile, AiRegistry, Roster, SandboxConfig, ScriptRegistry};
use combatd::{CombatRoundManager, Mob, Room};

use crate::common::{fighter, manager};

fn dispatcher(manager: &CombatRoundManager, scripts: ScriptRegistry) -> AiDispatcher {
    AiDispatcher::new(
        Arc::new(AiRegistry::standard(Arc::new(scripts))),
        manager.clone(),
    )
}

fn no_scripts() -> ScriptRegistry {
    ScriptRegistry::new(vec!["ai".to_string()], SandboxConfig::default())
}

#[tokio::test]
async fn test_aggressive_mob_starts_a_fight() {
    let manager = manager(0);
    let ai = dispatcher(&manager, no_scripts());
    let room = Room::new("glade", "Glade");
    let wolf = Mob::builder("wolf", "a wolf")
        .hp(10)
        .ai(AiProfile::new("aggressive"))
        .build();
    let deer = fighter("deer", 5, 1);
    room.admit(&wolf);
    room.admit(&deer);

    let report = ai.sweep(&room.actors()).await;
    assert_eq!(report.acted, 1);
    assert_eq!(report.failed, 0);

    let instance = manager.get_combatant_combat("deer").await.unwrap();
    assert!(instance.contains("wolf").await);
    assert!(instance.has_queued("wolf").await);
    assert_eq!(wolf.combat_target().unwrap().id(), "deer");

    // A second sweep keeps the one queued attack
    ai.sweep(&room.actors()).await;
    assert_eq!(manager.instance_count().await, 1);
    manager.reset().await;
}

#[tokio::test]
async fn test_wimpy_mob_flees_out_of_combat() {
    let manager = manager(0);
    let ai = dispatcher(&manager, no_scripts());
    let burrow = Room::new("burrow", "Burrow");
    let meadow = Room::new("meadow", "Meadow");
    burrow.link("up", &meadow);

    let rabbit = Mob::builder("rabbit", "a rabbit")
        .hp(1)
        .max_hp(10)
        .ai(AiProfile {
            wimpy: Some(50),
            ..AiProfile::default()
        })
        .build();
    let fox = fighter("fox", 10, 1);
    burrow.admit(&rabbit);
    burrow.admit(&fox);
    manager.create_combat(&burrow.actors(), None).await.unwrap();

    let report = ai.sweep(&burrow.actors()).await;
    assert_eq!(report.acted, 1);

    assert_eq!(rabbit.room().unwrap().name(), "Meadow");
    assert!(manager.get_combatant_combat("rabbit").await.is_none());
    assert!(manager.get_combatant_combat("fox").await.is_some());
    assert!(rabbit.inbox().contains(&"You flee up!".to_string()));
    assert!(burrow
        .transcript()
        .contains(&"a rabbit flees up.".to_string()));
    manager.reset().await;
}

#[tokio::test]
async fn test_lua_script_picks_the_target() {
    let manager = manager(0);
    let scripts = no_scripts();
    scripts
        .register_lua(
            "ai.hunter",
            r#"
            for _, o in ipairs(ctx.occupants) do
                if not o.ally and o.health > 0 then
                    return { { action = "attack", target = o.id } }
                end
            end
            return nil
            "#,
        )
        .unwrap();
    let ai = dispatcher(&manager, scripts);

    let room = Room::new("lair", "Lair");
    let hunter = Mob::builder("hunter", "a hunter")
        .hp(10)
        .faction("lodge")
        .ai(AiProfile {
            script: Some("ai.hunter".to_string()),
            ..AiProfile::new("scripted")
        })
        .build();
    let friend = Mob::builder("friend", "a tracker").hp(10).faction("lodge").build();
    let boar = fighter("boar", 10, 1);
    for mob in [&hunter, &friend, &boar] {
        room.admit(mob);
    }

    let report = ai.sweep(&room.actors()).await;
    assert_eq!(report.acted, 1);
    let instance = manager.get_combatant_combat("hunter").await.unwrap();
    assert!(instance.contains("boar").await);
    assert!(!instance.contains("friend").await);
    manager.reset().await;
}
