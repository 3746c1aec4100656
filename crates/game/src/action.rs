use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::codec::{DecodeError, Reader, Writer};
use crate::entity::{Controls, EntityId, EntityRegistry};

const ACTION_BYTES: usize = 8 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ActionCode {
    LeftDown = 1,
    LeftUp = 2,
    RightDown = 3,
    RightUp = 4,
    ThrustDown = 5,
    ThrustUp = 6,
    FireDown = 7,
    FireUp = 8,
}

impl TryFrom<i32> for ActionCode {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::LeftDown,
            2 => Self::LeftUp,
            3 => Self::RightDown,
            4 => Self::RightUp,
            5 => Self::ThrustDown,
            6 => Self::ThrustUp,
            7 => Self::FireDown,
            8 => Self::FireUp,
            other => return Err(DecodeError::UnknownActionCode(other)),
        })
    }
}

impl ActionCode {
    pub const ALL: [ActionCode; 8] = [
        Self::LeftDown,
        Self::LeftUp,
        Self::RightDown,
        Self::RightUp,
        Self::ThrustDown,
        Self::ThrustUp,
        Self::FireDown,
        Self::FireUp,
    ];

    /// Console spelling, e.g. `left-down`.
    pub fn name(self) -> &'static str {
        match self {
            Self::LeftDown => "left-down",
            Self::LeftUp => "left-up",
            Self::RightDown => "right-down",
            Self::RightUp => "right-up",
            Self::ThrustDown => "thrust-down",
            Self::ThrustUp => "thrust-up",
            Self::FireDown => "fire-down",
            Self::FireUp => "fire-up",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.name() == name)
    }

    fn control(self) -> (Controls, bool) {
        match self {
            Self::LeftDown => (Controls::LEFT, true),
            Self::LeftUp => (Controls::LEFT, false),
            Self::RightDown => (Controls::RIGHT, true),
            Self::RightUp => (Controls::RIGHT, false),
            Self::ThrustDown => (Controls::THRUST, true),
            Self::ThrustUp => (Controls::THRUST, false),
            Self::FireDown => (Controls::FIRE, true),
            Self::FireUp => (Controls::FIRE, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub actor: EntityId,
    pub code: ActionCode,
    pub target_tick: u64,
}

impl Action {
    pub fn new(actor: EntityId, code: ActionCode, target_tick: u64) -> Self {
        Self {
            actor,
            code,
            target_tick,
        }
    }

    /// Schedules `code` at least one tick after `current_tick`.
    pub fn delayed(actor: EntityId, code: ActionCode, current_tick: u64, delay: u64) -> Self {
        Self::new(actor, code, current_tick + delay.max(1))
    }

    /// Applies the action to its actor. A missing actor, or one that is not a
    /// ship, is ignored.
    pub fn apply(&self, registry: &mut EntityRegistry) -> bool {
        let Some(ship) = registry.get_mut(self.actor).and_then(|e| e.as_ship_mut()) else {
            log::debug!("Action {:?} for absent actor {} ignored", self.code, self.actor);
            return false;
        };
        let (control, pressed) = self.code.control();
        ship.controls.set(control, pressed);
        true
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_i64(self.actor.0);
        w.put_i32(self.code as i32);
        w.put_u64(self.target_tick);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            actor: EntityId(r.i64()?),
            code: ActionCode::try_from(r.i32()?)?,
            target_tick: r.u64()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<Action>,
    pub missed: Vec<Action>,
}

/// Pending actions, shared between input producers and the tick thread.
#[derive(Debug, Default)]
pub struct ActionQueue {
    pending: Mutex<VecDeque<Action>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Action>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, action: Action) {
        self.lock().push_back(action);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pending(&self) -> Vec<Action> {
        self.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Applies actions targeted at exactly `tick`, in enqueue order, and drops
    /// actions whose tick has already passed. Later actions stay queued.
    pub fn apply(&self, tick: u64, registry: &mut EntityRegistry) -> ApplyReport {
        let mut report = ApplyReport::default();
        {
            let mut pending = self.lock();
            pending.retain(|action| {
                if action.target_tick == tick {
                    report.applied.push(*action);
                    false
                } else if action.target_tick < tick {
                    report.missed.push(*action);
                    false
                } else {
                    true
                }
            });
        }

        for action in &report.missed {
            log::warn!(
                "Missed deadline: {:?} for {} was due at tick {}, now {}",
                action.code,
                action.actor,
                action.target_tick,
                tick
            );
        }
        for action in &report.applied {
            action.apply(registry);
        }
        report
    }

    pub fn serialize(&self, w: &mut Writer) {
        let pending = self.lock();
        w.put_i32(pending.len() as i32);
        for action in pending.iter() {
            action.encode(w);
        }
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.count(ACTION_BYTES)?;
        let mut pending = VecDeque::with_capacity(count);
        for _ in 0..count {
            pending.push_back(Action::decode(r)?);
        }
        Ok(Self {
            pending: Mutex::new(pending),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use glam::DVec2;

    fn registry_with_ship() -> (EntityRegistry, EntityId) {
        let mut registry = EntityRegistry::new();
        let id = registry.add(Entity::ship("p1", DVec2::ZERO), false);
        (registry, id)
    }

    #[test]
    fn names_round_trip() {
        for code in ActionCode::ALL {
            assert_eq!(ActionCode::from_name(code.name()), Some(code));
        }
        assert_eq!(ActionCode::from_name("jump"), None);
    }

    fn controls(registry: &EntityRegistry, id: EntityId) -> Controls {
        registry.get(id).unwrap().as_ship().unwrap().controls
    }

    #[test]
    fn applies_only_exact_tick() {
        let (mut registry, ship) = registry_with_ship();
        let queue = ActionQueue::new();
        queue.enqueue(Action::new(ship, ActionCode::LeftDown, 10));
        queue.enqueue(Action::new(ship, ActionCode::ThrustDown, 11));

        let report = queue.apply(10, &mut registry);
        assert_eq!(report.applied.len(), 1);
        assert!(report.missed.is_empty());
        assert_eq!(controls(&registry, ship), Controls::LEFT);
        assert_eq!(queue.len(), 1);

        let report = queue.apply(11, &mut registry);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(controls(&registry, ship), Controls::LEFT | Controls::THRUST);
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_order_is_dispatch_order() {
        let (mut registry, ship) = registry_with_ship();
        let queue = ActionQueue::new();
        queue.enqueue(Action::new(ship, ActionCode::FireDown, 5));
        queue.enqueue(Action::new(ship, ActionCode::FireUp, 5));

        let report = queue.apply(5, &mut registry);
        let codes: Vec<_> = report.applied.iter().map(|a| a.code).collect();
        assert_eq!(codes, vec![ActionCode::FireDown, ActionCode::FireUp]);
        assert!(!controls(&registry, ship).contains(Controls::FIRE));
    }

    #[test]
    fn late_actions_are_dropped_not_replayed() {
        let (mut registry, ship) = registry_with_ship();
        let queue = ActionQueue::new();
        queue.enqueue(Action::new(ship, ActionCode::LeftDown, 3));

        let report = queue.apply(4, &mut registry);
        assert_eq!(report.missed.len(), 1);
        assert!(report.applied.is_empty());
        assert!(queue.is_empty());

        for tick in 0..10 {
            assert!(queue.apply(tick, &mut registry).applied.is_empty());
        }
        assert_eq!(controls(&registry, ship), Controls::empty());
    }

    #[test]
    fn absent_actor_is_a_no_op() {
        let mut registry = EntityRegistry::new();
        let queue = ActionQueue::new();
        queue.enqueue(Action::new(EntityId(99), ActionCode::LeftDown, 1));
        let report = queue.apply(1, &mut registry);
        assert_eq!(report.applied.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn delayed_is_strictly_in_the_future() {
        let action = Action::delayed(EntityId(1), ActionCode::LeftDown, 100, 0);
        assert_eq!(action.target_tick, 101);
        let action = Action::delayed(EntityId(1), ActionCode::LeftDown, 100, 2);
        assert_eq!(action.target_tick, 102);
    }

    #[test]
    fn concurrent_producers() {
        let queue = std::sync::Arc::new(ActionQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        queue.enqueue(Action::new(EntityId(t + 1), ActionCode::FireDown, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 200);
    }

    #[test]
    fn serialize_keeps_pending_order() {
        let queue = ActionQueue::new();
        queue.enqueue(Action::new(EntityId(2), ActionCode::RightDown, 40));
        queue.enqueue(Action::new(EntityId(1), ActionCode::ThrustUp, 39));

        let mut w = Writer::new();
        queue.serialize(&mut w);
        let bytes = w.into_bytes();
        let restored = ActionQueue::deserialize(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(restored.pending(), queue.pending());
    }
}
