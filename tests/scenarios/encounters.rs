//! Instance registry, scheduling and shutdown through the manager

use std::sync::Arc;
use std::time::Duration;

use combatd::actor::{Actor, ActorRef};
use combatd::combat::{Action, CombatError, CombatEvent};
use combatd::{Mob, Room};

use crate::common::{fighter, gather, manager, BrokenHook};

fn ids(actors: &[ActorRef]) -> Vec<String> {
    let mut ids: Vec<String> = actors.iter().map(|a| a.id().to_string()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_overlapping_starts_share_one_instance() {
    let manager = manager(0);
    let room = Room::new("yard", "Yard");
    let (a, b, c) = (fighter("a", 10, 1), fighter("b", 10, 1), fighter("c", 10, 1));
    let actors = gather(&room, &[&a, &b, &c]);

    let first = manager
        .start_combat(&[actors[0].clone(), actors[1].clone()], None)
        .await
        .unwrap();
    let before = manager.get_combatant_combat("b").await.unwrap();

    let second = manager
        .start_combat(&[actors[1].clone(), actors[2].clone()], None)
        .await
        .unwrap();
    let after = manager.get_combatant_combat("b").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(ids(&first.combatants().await), vec!["a", "b", "c"]);
    assert_eq!(manager.instance_count().await, 1);

    manager.reset().await;
}

#[tokio::test]
async fn test_one_round_settles_lopsided_fight() {
    let manager = manager(0);
    let room = Room::new("pit", "Pit");
    let (attacker, defender) = (fighter("attacker", 10, 1), fighter("defender", 1, 1));
    let actors = gather(&room, &[&attacker, &defender]);

    let instance = manager.create_combat(&actors, None).await.unwrap();
    manager
        .queue_action(&actors[0], Action::attack(&actors[0], &actors[1]))
        .await
        .unwrap();

    let report = instance.process_round().await.unwrap();
    assert_eq!(defender.health(), 0);
    assert!(attacker.is_alive());
    assert_eq!(report.defeated.len(), 1);
    assert!(instance.is_ended());
    assert!(manager.get_combatant_combat("defender").await.is_none());
    assert!(manager.get_combatant_combat("attacker").await.is_none());
    assert!(room
        .transcript()
        .contains(&"attacker is victorious.".to_string()));

    // Nothing more happens to an ended instance
    assert!(instance.process_round().await.is_none());
    manager.reset().await;
}

#[tokio::test]
async fn test_end_combat_twice_broadcasts_once() {
    let manager = manager(0);
    let room = Room::new("ring", "Ring");
    let (x, y) = (fighter("x", 10, 1), fighter("y", 10, 1));
    let actors = gather(&room, &[&x, &y]);

    let instance = manager.create_combat(&actors, None).await.unwrap();
    assert!(instance.end_combat("Enough!").await);
    assert!(!instance.end_combat("Enough!").await);

    let said = room.transcript().iter().filter(|l| *l == "Enough!").count();
    assert_eq!(said, 1);
    assert_eq!(manager.instance_count().await, 0);

    let err = manager
        .queue_action(&actors[0], Action::attack(&actors[0], &actors[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, CombatError::NotInCombat(_)));
    manager.reset().await;
}

#[tokio::test]
async fn test_failed_save_excludes_only_that_actor() {
    let manager = manager(0);
    let room = Room::new("vault", "Vault");
    let saved = Mob::builder("saved", "a clerk").hp(10).persistent().build();
    let broken = Mob::builder("broken", "a ghost")
        .hp(10)
        .persistent()
        .failing_save()
        .build();
    let plain = fighter("plain", 10, 1);
    let actors = gather(&room, &[&saved, &broken, &plain]);

    let instance = manager.create_combat(&actors, None).await.unwrap();
    assert_eq!(ids(&instance.combatants().await), vec!["plain", "saved"]);
    assert_eq!(saved.save_count(), 1);
    assert!(manager.get_combatant_combat("broken").await.is_none());
    manager.reset().await;
}

#[tokio::test(start_paused = true)]
async fn test_force_end_cancels_every_round_timer() {
    let manager = manager(3000);
    let round_time = Some(Duration::from_secs(3));

    let mut instances = Vec::new();
    let mut mobs = Vec::new();
    for n in 0..3 {
        let room = Room::new(&format!("room-{}", n), "Room");
        let (p, q) = (
            fighter(&format!("p{}", n), 10, 1),
            fighter(&format!("q{}", n), 10, 1),
        );
        let actors = gather(&room, &[&p, &q]);
        instances.push(manager.start_combat(&actors, round_time).await.unwrap());
        mobs.extend([p, q]);
    }
    assert_eq!(manager.instance_count().await, 3);
    assert_eq!(manager.pending_timers(), 3);

    assert_eq!(manager.force_end_all_combat().await, 3);
    assert_eq!(manager.instance_count().await, 0);
    assert_eq!(manager.pending_timers(), 0);
    assert!(!manager.is_running());

    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::task::yield_now().await;

    for instance in &instances {
        assert!(instance.is_ended());
        assert_eq!(instance.round().await, 0);
    }
    assert!(mobs.iter().all(|m| m.health() == 10));
    assert_eq!(manager.force_end_all_combat().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_broken_hook_does_not_stall_other_encounters() {
    let manager = manager(0);
    let mut events = manager.events().subscribe();

    let cursed_room = Room::new("crypt", "Crypt");
    let cursed = Mob::builder("cursed", "cursed")
        .hp(3)
        .attack(combatd::combat::Attack::new(
            combatd::combat::DiceRoll::flat(1),
            combatd::combat::DamageType::Physical,
            "claws",
        ))
        .turn_hook(BrokenHook)
        .build();
    let knight = fighter("knight", 3, 1);
    let crypt = gather(&cursed_room, &[&cursed, &knight]);

    let field_room = Room::new("field", "Field");
    let (left, right) = (fighter("left", 2, 1), fighter("right", 2, 1));
    let field = gather(&field_room, &[&left, &right]);

    manager.start_combat(&crypt, None).await.unwrap();
    manager.start_combat(&field, None).await.unwrap();
    assert_eq!(manager.instance_count().await, 2);

    for _ in 0..20 {
        if manager.instance_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(manager.instance_count().await, 0);

    let mut ended = 0;
    while let Ok(envelope) = events.try_recv() {
        if let CombatEvent::CombatEnded { .. } = envelope.event {
            ended += 1;
        }
    }
    assert_eq!(ended, 2);
    assert!(cursed.is_alive() ^ knight.is_alive());
    assert!(left.is_alive() ^ right.is_alive());
}
