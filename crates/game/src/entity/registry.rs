use std::collections::{HashMap, HashSet};

use glam::DVec2;

use crate::codec::{DecodeError, Reader, Writer};

use super::kind::{Entity, EntityId, EntityType, EntityView};

/// Smallest possible encoded entity: tag, id and four coordinates.
const MIN_ENTITY_BYTES: usize = 4 + 8 + 4 * 8;

/// First id handed out by the host outside the deterministic step.
///
/// Ids below this are allocated identically by every participant as the
/// simulation runs; ids from here up are only ever minted by the host and
/// reach peers with the entity itself.
pub const HOSTED_ID_BASE: i64 = 1 << 62;

/// Changes to network-synced entities, drained by the host after each tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Created(Entity),
    Removed(EntityId),
}

/// Owns every simulated entity, in insertion order, under a stable id.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
    index: HashMap<EntityId, usize>,
    next_id: i64,
    next_hosted_id: i64,
    synced: HashSet<EntityId>,
    changes: Vec<RegistryChange>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
            next_hosted_id: HOSTED_ID_BASE,
            synced: HashSet::new(),
            changes: Vec::new(),
        }
    }

    /// Inserts `entity`, allocating a step id unless it already carries one.
    ///
    /// A restored id that is already present replaces the existing entity
    /// only when both are of the same type; a type clash leaves the live
    /// entity alone and returns [`EntityId::UNASSIGNED`].
    pub fn add(&mut self, mut entity: Entity, network_synced: bool) -> EntityId {
        if entity.id.is_assigned() {
            self.reserve(entity.id);
        } else {
            entity.id = EntityId(self.next_id);
            self.next_id += 1;
        }
        self.insert(entity, network_synced)
    }

    /// Inserts `entity` under a fresh host-only id, disjoint from the ids the
    /// step allocates.
    pub fn add_hosted(&mut self, mut entity: Entity, network_synced: bool) -> EntityId {
        entity.id = EntityId(self.next_hosted_id);
        self.next_hosted_id += 1;
        self.insert(entity, network_synced)
    }

    fn reserve(&mut self, id: EntityId) {
        let counter = if id.0 >= HOSTED_ID_BASE {
            &mut self.next_hosted_id
        } else {
            &mut self.next_id
        };
        if id.0 >= *counter {
            *counter = id.0 + 1;
        }
    }

    fn insert(&mut self, entity: Entity, network_synced: bool) -> EntityId {
        let id = entity.id;
        if let Some(&slot) = self.index.get(&id) {
            let existing = self.entities[slot].entity_type();
            if existing != entity.entity_type() {
                log::warn!(
                    "Refusing to replace {:?} {} with a {:?}",
                    existing,
                    id,
                    entity.entity_type()
                );
                return EntityId::UNASSIGNED;
            }
            log::debug!("Replacing entity {} with restored copy", id);
        }

        if network_synced {
            self.synced.insert(id);
            self.changes.push(RegistryChange::Created(entity.clone()));
        }

        match self.index.get(&id) {
            Some(&slot) => self.entities[slot] = entity,
            None => {
                self.index.insert(id, self.entities.len());
                self.entities.push(entity);
            }
        }
        id
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.index.remove(&id)?;
        let entity = self.entities.remove(slot);
        for moved in &self.entities[slot..] {
            if let Some(i) = self.index.get_mut(&moved.id) {
                *i -= 1;
            }
        }
        if self.synced.remove(&id) {
            self.changes.push(RegistryChange::Removed(id));
        }
        Some(entity)
    }

    /// Removes an entity and records the removal for peers, whether or not it
    /// was added as network-synced.
    pub fn remove_synced(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.remove(id)?;
        if !self.changes.contains(&RegistryChange::Removed(id)) {
            self.changes.push(RegistryChange::Removed(id));
        }
        Some(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).map(|&slot| &self.entities[slot])
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.index.get(&id).map(|&slot| &mut self.entities[slot])
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| e.id).collect()
    }

    pub fn of_type(&self, entity_type: EntityType) -> impl Iterator<Item = &Entity> {
        self.entities
            .iter()
            .filter(move |e| e.entity_type() == entity_type)
    }

    pub fn ships(&self) -> impl Iterator<Item = &Entity> {
        self.of_type(EntityType::Ship)
    }

    pub fn asteroids(&self) -> impl Iterator<Item = &Entity> {
        self.of_type(EntityType::Asteroid)
    }

    pub fn shooting(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.is_shooting())
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.of_type(entity_type).count()
    }

    /// Overwrites position and velocity; returns false for unknown ids.
    pub fn set_motion(&mut self, id: EntityId, position: DVec2, velocity: DVec2) -> bool {
        match self.get_mut(id) {
            Some(entity) => {
                entity.position = position;
                entity.velocity = velocity;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<EntityView> {
        self.entities.iter().map(Entity::view).collect()
    }

    pub fn take_changes(&mut self) -> Vec<RegistryChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.put_i32(self.entities.len() as i32);
        for entity in &self.entities {
            entity.encode(w);
        }
        w.put_i64(self.next_id);
        w.put_i64(self.next_hosted_id);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.count(MIN_ENTITY_BYTES)?;
        let mut registry = Self::new();
        for _ in 0..count {
            let entity = Entity::decode(r)?;
            if !entity.id.is_assigned() || registry.contains(entity.id) {
                return Err(DecodeError::InvalidValue {
                    what: "entity id",
                    value: entity.id.0,
                });
            }
            registry.add(entity, false);
        }
        let next_id = r.i64()?;
        let next_hosted_id = r.i64()?;
        registry.next_id = registry.next_id.max(next_id);
        registry.next_hosted_id = registry.next_hosted_id.max(next_hosted_id);
        Ok(registry)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::kind::{Asteroid, Bonus, BonusKind, EntityKind};

    fn asteroid(x: f64) -> Entity {
        Entity::new(
            DVec2::new(x, 0.0),
            DVec2::ZERO,
            EntityKind::Asteroid(Asteroid {
                size: 3,
                angle: 0.0,
                spin: 0.01,
            }),
        )
    }

    #[test]
    fn ids_are_unique_and_not_reused() {
        let mut registry = EntityRegistry::new();
        let a = registry.add(asteroid(0.0), false);
        let b = registry.add(asteroid(1.0), false);
        assert_ne!(a, b);

        registry.remove(b);
        let c = registry.add(asteroid(2.0), false);
        assert_ne!(c, b);
        assert!(registry.get(b).is_none());
    }

    #[test]
    fn restored_id_is_kept_and_bumps_allocator() {
        let mut registry = EntityRegistry::new();
        let mut restored = asteroid(0.0);
        restored.id = EntityId(40);
        assert_eq!(registry.add(restored, false), EntityId(40));
        assert_eq!(registry.add(asteroid(1.0), false), EntityId(41));
    }

    #[test]
    fn hosted_ids_never_shift_step_ids() {
        let mut host = EntityRegistry::new();
        let mut peer = EntityRegistry::new();
        host.add(asteroid(0.0), false);
        peer.add(asteroid(0.0), false);

        let ship = host.add_hosted(Entity::ship("late", DVec2::ZERO), false);
        assert!(ship.0 >= HOSTED_ID_BASE);
        peer.add(host.get(ship).unwrap().clone(), false);

        assert_eq!(host.add(asteroid(1.0), false), peer.add(asteroid(1.0), false));
        assert_eq!(peer.add_hosted(asteroid(2.0), false).0, ship.0 + 1);
    }

    #[test]
    fn restored_id_of_another_type_is_refused() {
        let mut registry = EntityRegistry::new();
        let rock = registry.add(asteroid(0.0), false);
        let mut impostor = Entity::ship("x", DVec2::ZERO);
        impostor.id = rock;

        assert_eq!(registry.add(impostor, false), EntityId::UNASSIGNED);
        assert_eq!(registry.get(rock).unwrap().entity_type(), EntityType::Asteroid);

        let mut moved = asteroid(7.0);
        moved.id = rock;
        assert_eq!(registry.add(moved, false), rock);
        assert_eq!(registry.get(rock).unwrap().position.x, 7.0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_synced_reports_local_entities() {
        let mut registry = EntityRegistry::new();
        let local = registry.add(asteroid(0.0), false);
        let synced = registry.add(asteroid(1.0), true);
        registry.take_changes();

        registry.remove_synced(local);
        registry.remove_synced(synced);
        assert!(registry.remove_synced(local).is_none());
        assert_eq!(
            registry.take_changes(),
            vec![RegistryChange::Removed(local), RegistryChange::Removed(synced)]
        );
    }

    #[test]
    fn duplicate_ids_in_stream_are_rejected() {
        let mut registry = EntityRegistry::new();
        let id = registry.add(asteroid(0.0), false);
        let mut w = Writer::new();
        w.put_i32(2);
        registry.get(id).unwrap().encode(&mut w);
        registry.get(id).unwrap().encode(&mut w);
        w.put_i64(2);
        w.put_i64(HOSTED_ID_BASE);
        let bytes = w.into_bytes();

        assert_eq!(
            EntityRegistry::deserialize(&mut Reader::new(&bytes)).unwrap_err(),
            DecodeError::InvalidValue {
                what: "entity id",
                value: id.0,
            }
        );
    }

    #[test]
    fn unknown_lookup_is_none() {
        let registry = EntityRegistry::new();
        assert!(registry.get(EntityId(5)).is_none());
    }

    #[test]
    fn removal_preserves_order_and_lookup() {
        let mut registry = EntityRegistry::new();
        let ids: Vec<_> = (0..4).map(|i| registry.add(asteroid(i as f64), false)).collect();
        registry.remove(ids[1]);

        assert_eq!(registry.ids(), vec![ids[0], ids[2], ids[3]]);
        assert_eq!(registry.get(ids[3]).unwrap().position.x, 3.0);
    }

    #[test]
    fn category_views_filter_one_store() {
        let mut registry = EntityRegistry::new();
        registry.add(Entity::ship("a", DVec2::ZERO), false);
        registry.add(asteroid(5.0), false);
        registry.add(
            Entity::new(
                DVec2::ZERO,
                DVec2::ZERO,
                EntityKind::Bonus(Bonus {
                    kind: BonusKind::Shield,
                    ttl: 10,
                }),
            ),
            false,
        );
        assert_eq!(registry.ships().count(), 1);
        assert_eq!(registry.asteroids().count(), 1);
        assert_eq!(registry.shooting().count(), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn synced_changes_are_recorded() {
        let mut registry = EntityRegistry::new();
        let local = registry.add(asteroid(0.0), false);
        let synced = registry.add(asteroid(1.0), true);
        registry.remove(local);
        registry.remove(synced);

        let changes = registry.take_changes();
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], RegistryChange::Created(e) if e.id == synced));
        assert_eq!(changes[1], RegistryChange::Removed(synced));
        assert!(registry.take_changes().is_empty());
    }

    #[test]
    fn serialize_preserves_order_and_ids() {
        let mut registry = EntityRegistry::new();
        registry.add(asteroid(3.0), false);
        registry.add(Entity::ship("pilot", DVec2::new(1.0, 2.0)), false);
        let gone = registry.add(asteroid(4.0), false);
        registry.add(asteroid(5.0), false);
        registry.remove(gone);

        let mut w = Writer::new();
        registry.serialize(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let mut restored = EntityRegistry::deserialize(&mut r).unwrap();
        r.finish().unwrap();

        assert_eq!(restored.ids(), registry.ids());
        for (a, b) in restored.iter().zip(registry.iter()) {
            assert_eq!(a, b);
        }
        // The removed id is never handed out again after a round trip.
        let fresh = restored.add(asteroid(9.0), false);
        assert!(fresh.0 > gone.0);
        assert_eq!(
            restored.add_hosted(asteroid(9.0), false),
            registry.add_hosted(asteroid(9.0), false)
        );
    }
}
