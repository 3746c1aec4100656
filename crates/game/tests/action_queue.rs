use glam::DVec2;
use proptest::prelude::*;

use orbital::entity::Controls;
use orbital::{Action, ActionCode, ActionQueue, Entity, EntityId, EntityRegistry};

fn code_strategy() -> impl Strategy<Value = ActionCode> {
    prop_oneof![
        Just(ActionCode::LeftDown),
        Just(ActionCode::LeftUp),
        Just(ActionCode::RightDown),
        Just(ActionCode::RightUp),
        Just(ActionCode::ThrustDown),
        Just(ActionCode::ThrustUp),
        Just(ActionCode::FireDown),
        Just(ActionCode::FireUp),
    ]
}

proptest! {
    #[test]
    fn every_action_fires_once_at_its_tick(
        targets in proptest::collection::vec((0u64..30, code_strategy()), 0..60),
        last_tick in 1u64..25,
    ) {
        let mut registry = EntityRegistry::new();
        let ship = registry.add(Entity::ship("p", DVec2::ZERO), false);
        let queue = ActionQueue::new();
        let actions: Vec<Action> = targets
            .iter()
            .map(|&(tick, code)| Action::new(ship, code, tick))
            .collect();
        for action in &actions {
            queue.enqueue(*action);
        }

        let mut applied = Vec::new();
        let mut missed = Vec::new();
        for tick in 1..=last_tick {
            let report = queue.apply(tick, &mut registry);
            prop_assert!(report.applied.iter().all(|a| a.target_tick == tick));
            prop_assert!(report.missed.iter().all(|a| a.target_tick < tick));
            applied.extend(report.applied);
            missed.extend(report.missed);
        }

        let expected_applied: Vec<Action> = actions
            .iter()
            .copied()
            .filter(|a| (1..=last_tick).contains(&a.target_tick))
            .collect();
        let mut sorted = expected_applied.clone();
        sorted.sort_by_key(|a| a.target_tick);
        prop_assert_eq!(applied, sorted);

        let expected_missed: Vec<Action> =
            actions.iter().copied().filter(|a| a.target_tick == 0).collect();
        prop_assert_eq!(missed, expected_missed);

        let expected_pending: Vec<Action> =
            actions.iter().copied().filter(|a| a.target_tick > last_tick).collect();
        prop_assert_eq!(queue.pending(), expected_pending);
    }

    #[test]
    fn actions_for_unknown_actors_never_fault(
        actor in 2i64..1000,
        code in code_strategy(),
    ) {
        let mut registry = EntityRegistry::new();
        let ship = registry.add(Entity::ship("p", DVec2::ZERO), false);
        let queue = ActionQueue::new();
        queue.enqueue(Action::new(EntityId(actor), code, 1));

        let report = queue.apply(1, &mut registry);
        prop_assert_eq!(report.applied.len(), 1);
        prop_assert_eq!(
            registry.get(ship).and_then(|e| e.as_ship()).map(|s| s.controls),
            Some(Controls::empty())
        );
    }
}
