//! Single-round behavior of the engine

use std::sync::Arc;

use combatd::actor::ActorRef;
use combatd::combat::{
    Action, CombatEngine, CombatServices, EffectTracker, EffectType, HasteRule, Stat,
    StatusEffect,
};

use crate::common::{fighter, CountingDeaths};

fn engine(services: CombatServices) -> CombatEngine {
    CombatEngine::new(services, HasteRule::default(), 42)
}

fn attacks_by(order: &[String], id: &str) -> usize {
    order.iter().filter(|a| a.as_str() == id).count()
}

/// a and b tie on initiative, c goes first; b outranks a by priority and
/// a's later submission fires before its earlier one
fn ordered_round() -> combatd::combat::RoundReport {
    let a: ActorRef = fighter("a", 100, 1);
    let b: ActorRef = fighter("b", 100, 1);
    let c: ActorRef = fighter("c", 100, 1);

    let mut engine = engine(CombatServices::default());
    engine.add_participant_with_initiative(a.clone(), 10);
    engine.add_participant_with_initiative(b.clone(), 10);
    engine.add_participant_with_initiative(c.clone(), 20);

    engine.queue_action(&a, Action::attack(&a, &b)).unwrap();
    engine.queue_action(&a, Action::attack(&a, &c)).unwrap();
    engine
        .queue_action(&b, Action::attack(&b, &a).with_priority(5))
        .unwrap();

    engine.process_round()
}

#[test]
fn test_execution_order_follows_initiative_priority_submission() {
    let report = ordered_round();
    assert_eq!(report.order, vec!["c", "b", "a", "a"]);

    let a_targets: Vec<&str> = report
        .executed
        .iter()
        .filter(|r| r.actor() == "a")
        .map(|r| r.target())
        .collect();
    assert_eq!(a_targets, vec!["c", "b"]);
}

#[test]
fn test_identical_inputs_give_identical_rounds() {
    let first = ordered_round();
    let second = ordered_round();
    assert_eq!(first.order, second.order);
    assert_eq!(first.executed, second.executed);
    assert_eq!(first.lines, second.lines);
}

#[test]
fn test_haste_adds_attacks_up_to_cap() {
    let tracker = Arc::new(EffectTracker::new());
    let quick: ActorRef = fighter("quick", 1000, 1);
    let dummy: ActorRef = fighter("dummy", 1000, 1);

    let mut engine = engine(CombatServices::with_effects(tracker.clone()));
    engine.add_participant_with_initiative(quick.clone(), 5);
    engine.add_participant_with_initiative(dummy.clone(), 1);

    // threshold 100, max extra 10
    tracker.set_base("quick", Stat::Haste, 300);
    engine.queue_action(&quick, Action::attack(&quick, &dummy)).unwrap();
    let report = engine.process_round();
    assert_eq!(attacks_by(&report.order, "quick"), 4);
    assert_eq!(attacks_by(&report.order, "dummy"), 1);

    tracker.set_base("quick", Stat::Haste, 1_000_000);
    engine.queue_action(&quick, Action::attack(&quick, &dummy)).unwrap();
    let report = engine.process_round();
    assert_eq!(attacks_by(&report.order, "quick"), 11);
}

#[test]
fn test_hasted_effect_counts_toward_extra_attacks() {
    let tracker = Arc::new(EffectTracker::new());
    let quick: ActorRef = fighter("quick", 100, 1);
    let dummy: ActorRef = fighter("dummy", 100, 1);

    let mut engine = engine(CombatServices::with_effects(tracker.clone()));
    engine.add_participant_with_initiative(quick.clone(), 5);
    engine.add_participant_with_initiative(dummy.clone(), 1);
    tracker.add_effect("quick", StatusEffect::new(EffectType::Hasted, 5, 200));

    let report = engine.process_round();
    assert_eq!(attacks_by(&report.order, "quick"), 3);
    assert!(tracker.has_effect("quick", EffectType::Hasted));
}

#[test]
fn test_simultaneous_lethal_hits_handle_death_once() {
    let deaths = Arc::new(CountingDeaths::default());
    let first: ActorRef = fighter("first", 20, 5);
    let second: ActorRef = fighter("second", 20, 5);
    let victim: ActorRef = fighter("victim", 1, 1);

    let mut engine = engine(CombatServices::default().with_death_handler(deaths.clone()));
    engine.add_participant_with_initiative(first.clone(), 20);
    engine.add_participant_with_initiative(second.clone(), 15);
    engine.add_participant_with_initiative(victim.clone(), 1);
    engine.queue_action(&first, Action::attack(&first, &victim)).unwrap();
    engine.queue_action(&second, Action::attack(&second, &victim)).unwrap();

    let report = engine.process_round();
    assert_eq!(deaths.count(), 1);
    assert_eq!(report.defeated.len(), 1);
    assert_eq!(report.defeated[0].killer.as_deref(), Some("first"));
    assert!(!victim.is_alive());

    // The fallen are skipped at the next gather
    let report = engine.process_round();
    assert_eq!(deaths.count(), 1);
    assert_eq!(attacks_by(&report.order, "victim"), 0);
}

#[test]
fn test_lone_survivor_only_hesitates() {
    let loner = fighter("loner", 10, 1);
    let corpse: ActorRef = fighter("corpse", 0, 1);
    let loner_ref: ActorRef = loner.clone();

    let mut engine = engine(CombatServices::default());
    engine.add_participant(loner_ref);
    engine.add_participant(corpse);

    let report = engine.process_round();
    assert_eq!(report.hesitated, vec!["loner"]);
    assert!(report.order.is_empty());
    assert!(report.executed.is_empty());
    assert_eq!(loner.inbox(), vec!["You hesitate, finding no one to fight."]);
}
