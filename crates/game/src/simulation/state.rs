use std::io;
use std::path::Path;

use glam::DVec2;

use crate::action::{Action, ActionQueue, ApplyReport};
use crate::codec::{DecodeError, Reader, Writer};
use crate::entity::{Entity, EntityId, EntityKind, EntityRegistry, EntityView, ProjectileStage};
use crate::level::Level;
use crate::rng::{CosmeticRng, GameRng};

use super::step::{ARENA, step_entities};

const SPAWN_SPACING: f64 = 40.0;
const EXPLOSION_FLASH: f64 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("save file i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("save file is corrupt: {0}")]
    Decode(#[from] DecodeError),
}

/// The authoritative game state of one process.
#[derive(Debug)]
pub struct SimulationState {
    tick: u64,
    paused: bool,
    level: Level,
    registry: EntityRegistry,
    actions: ActionQueue,
    cosmetic: CosmeticRng,
}

impl SimulationState {
    pub fn new(level: Level) -> Self {
        let mut registry = EntityRegistry::new();
        level.populate(&mut registry);
        Self {
            tick: 0,
            paused: false,
            level,
            registry,
            actions: ActionQueue::new(),
            cosmetic: CosmeticRng::new(),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    pub fn enqueue(&self, action: Action) {
        self.actions.enqueue(action);
    }

    /// Runs one tick. Returns `None` without touching anything while paused.
    pub fn advance(&mut self) -> Option<ApplyReport> {
        if self.paused {
            return None;
        }
        let mut rng = GameRng::for_tick(self.level.seed(), self.tick);
        self.level.update(&mut self.registry, &mut rng, self.tick);
        self.tick += 1;
        let report = self.actions.apply(self.tick, &mut self.registry);
        step_entities(&mut self.registry, &mut rng);
        Some(report)
    }

    /// Adds a ship for a new participant, spread out from the arena centre.
    ///
    /// The id comes from the host-only range so joins never shift the ids the
    /// step hands out.
    pub fn spawn_ship(&mut self, name: &str) -> EntityId {
        let offset = self.registry.ships().count() as f64 * SPAWN_SPACING;
        let position = ARENA * 0.5 + DVec2::new(offset, 0.0);
        self.registry.add_hosted(Entity::ship(name, position), false)
    }

    pub fn snapshot(&mut self) -> Vec<EntityView> {
        let mut views = self.registry.snapshot();
        for (view, entity) in views.iter_mut().zip(self.registry.iter()) {
            if let EntityKind::Projectile(p) = &entity.kind {
                if let ProjectileStage::Exploding { remaining } = p.stage {
                    view.flash = remaining as f64 + self.cosmetic.jitter(EXPLOSION_FLASH);
                }
            }
        }
        views
    }

    pub fn serialize(&self, w: &mut Writer) {
        self.level.encode(w);
        w.put_u64(self.tick);
        self.registry.serialize(w);
        self.actions.serialize(w);
        w.put_bool(self.paused);
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let level = Level::decode(r)?;
        let tick = r.u64()?;
        let registry = EntityRegistry::deserialize(r)?;
        let actions = ActionQueue::deserialize(r)?;
        let paused = r.bool()?;
        Ok(Self {
            tick,
            paused,
            level,
            registry,
            actions,
            cosmetic: CosmeticRng::new(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(4096);
        self.serialize(&mut w);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let state = Self::deserialize(&mut r)?;
        r.finish()?;
        Ok(state)
    }

    /// State followed by the local player's id; the layout of both save
    /// files and full-sync payloads.
    pub fn encode_with_player(&self, player: EntityId) -> Vec<u8> {
        let mut w = Writer::with_capacity(4096);
        self.serialize(&mut w);
        w.put_i64(player.0);
        w.into_bytes()
    }

    pub fn decode_with_player(bytes: &[u8]) -> Result<(Self, EntityId), DecodeError> {
        let mut r = Reader::new(bytes);
        let state = Self::deserialize(&mut r)?;
        let player = EntityId(r.i64()?);
        r.finish()?;
        Ok((state, player))
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>, player: EntityId) -> Result<(), SaveError> {
        std::fs::write(path.as_ref(), self.encode_with_player(player))?;
        log::info!("Saved tick {} to {}", self.tick, path.as_ref().display());
        Ok(())
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<(Self, EntityId), SaveError> {
        let bytes = std::fs::read(path.as_ref())?;
        let (state, player) = Self::decode_with_player(&bytes)?;
        log::info!("Loaded tick {} from {}", state.tick, path.as_ref().display());
        Ok((state, player))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionCode;
    use crate::entity::{Controls, EntityType};

    fn busy_state() -> (SimulationState, EntityId) {
        let mut state = SimulationState::new(Level::skirmish(1234));
        let ship = state.spawn_ship("host");
        state.registry_mut().get_mut(ship).unwrap().as_ship_mut().unwrap().controls =
            Controls::FIRE | Controls::THRUST;
        for _ in 0..40 {
            state.advance();
        }
        state.enqueue(Action::new(ship, ActionCode::LeftDown, state.tick() + 5));
        (state, ship)
    }

    #[test]
    fn advance_increments_tick_and_applies_due_actions() {
        let mut state = SimulationState::new(Level::waves(1));
        let ship = state.spawn_ship("p");
        state.enqueue(Action::new(ship, ActionCode::RightDown, 1));
        let report = state.advance().unwrap();
        assert_eq!(state.tick(), 1);
        assert_eq!(report.applied.len(), 1);
        let controls = state.registry().get(ship).unwrap().as_ship().unwrap().controls;
        assert_eq!(controls, Controls::RIGHT);
    }

    #[test]
    fn paused_state_does_not_advance() {
        let mut state = SimulationState::new(Level::skirmish(1));
        state.set_paused(true);
        assert!(state.advance().is_none());
        assert_eq!(state.tick(), 0);
    }

    #[test]
    fn round_trip_preserves_everything_observable() {
        let (state, ship) = busy_state();
        assert!(state.registry().count(EntityType::Projectile) > 0);

        let bytes = state.encode_with_player(ship);
        let (restored, player) = SimulationState::decode_with_player(&bytes).unwrap();

        assert_eq!(player, ship);
        assert_eq!(restored.tick(), state.tick());
        assert_eq!(restored.is_paused(), state.is_paused());
        assert_eq!(restored.level(), state.level());
        assert_eq!(restored.registry().ids(), state.registry().ids());
        for (a, b) in restored.registry().iter().zip(state.registry().iter()) {
            assert_eq!(a, b);
        }
        assert_eq!(restored.actions().pending(), state.actions().pending());
    }

    #[test]
    fn restored_state_evolves_identically() {
        let (mut original, _) = busy_state();
        let mut copy = SimulationState::from_bytes(&original.to_bytes()).unwrap();
        for _ in 0..200 {
            original.advance();
            copy.advance();
        }
        assert_eq!(original.to_bytes(), copy.to_bytes());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let state = SimulationState::new(Level::skirmish(5));
        let mut bytes = state.to_bytes();
        bytes.push(0);
        assert_eq!(
            SimulationState::from_bytes(&bytes).unwrap_err(),
            DecodeError::TrailingBytes(1)
        );
    }

    #[test]
    fn save_file_round_trip() {
        let (state, ship) = busy_state();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");

        state.save_to_path(&path, ship).unwrap();
        let (loaded, player) = SimulationState::load_from_path(&path).unwrap();
        assert_eq!(player, ship);
        assert_eq!(loaded.tick(), state.tick());
        assert_eq!(loaded.to_bytes(), state.to_bytes());
    }

    #[test]
    fn missing_save_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SimulationState::load_from_path(dir.path().join("absent.sav"));
        assert!(matches!(result, Err(SaveError::Io(_))));
    }

    #[test]
    fn snapshot_flash_never_changes_state() {
        let (mut state, _) = busy_state();
        let before = state.to_bytes();
        let views = state.snapshot();
        assert_eq!(views.len(), state.registry().len());
        assert_eq!(state.to_bytes(), before);
    }
}
