use glam::DVec2;

use crate::codec::{DecodeError, Reader, Writer};
use crate::entity::{
    Alien, Asteroid, BlackHole, Bonus, BonusKind, Entity, EntityKind, EntityRegistry, Station,
};
use crate::rng::GameRng;
use crate::simulation::ARENA;

const SKIRMISH_MIN_ASTEROIDS: u32 = 6;
const SKIRMISH_BONUS_INTERVAL: u64 = 1_500;
const BONUS_TTL: u32 = 1_000;
const WAVE_PAUSE_TICKS: u64 = 300;
const WAVE_BASE_ASTEROIDS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LevelType {
    Skirmish = 1,
    Waves = 2,
}

impl TryFrom<i32> for LevelType {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Skirmish),
            2 => Ok(Self::Waves),
            other => Err(DecodeError::UnknownLevelType(other)),
        }
    }
}

/// Free-for-all: the asteroid field is kept topped up and bonuses drop in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skirmish {
    pub seed: u64,
    pub min_asteroids: u32,
    pub next_bonus_tick: u64,
}

/// Escalating waves: each cleared field is followed by a bigger one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waves {
    pub seed: u64,
    pub wave: u32,
    /// Tick at which the next wave spawns, once the field has been cleared.
    pub next_wave_tick: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    Skirmish(Skirmish),
    Waves(Waves),
}

fn edge_position(rng: &mut GameRng) -> DVec2 {
    if rng.chance(0.5) {
        DVec2::new(rng.range(0.0, ARENA.x), 0.0)
    } else {
        DVec2::new(0.0, rng.range(0.0, ARENA.y))
    }
}

fn spawn_asteroid(registry: &mut EntityRegistry, rng: &mut GameRng, size: u8) {
    let position = edge_position(rng);
    let velocity = DVec2::from_angle(rng.angle()) * rng.range(0.4, 1.5);
    registry.add(
        Entity::new(
            position,
            velocity,
            EntityKind::Asteroid(Asteroid {
                size,
                angle: rng.angle(),
                spin: rng.range(-0.03, 0.03),
            }),
        ),
        false,
    );
}

impl Level {
    pub fn skirmish(seed: u64) -> Self {
        Self::Skirmish(Skirmish {
            seed,
            min_asteroids: SKIRMISH_MIN_ASTEROIDS,
            next_bonus_tick: SKIRMISH_BONUS_INTERVAL,
        })
    }

    pub fn waves(seed: u64) -> Self {
        Self::Waves(Waves {
            seed,
            wave: 0,
            next_wave_tick: Some(0),
        })
    }

    pub fn level_type(&self) -> LevelType {
        match self {
            Self::Skirmish(_) => LevelType::Skirmish,
            Self::Waves(_) => LevelType::Waves,
        }
    }

    pub fn seed(&self) -> u64 {
        match self {
            Self::Skirmish(s) => s.seed,
            Self::Waves(w) => w.seed,
        }
    }

    /// Places the fixed scenery of a fresh game.
    pub fn populate(&self, registry: &mut EntityRegistry) {
        let mut rng = GameRng::for_tick(self.seed(), 0);
        match self {
            Self::Skirmish(_) => {
                registry.add(
                    Entity::new(
                        ARENA * DVec2::new(0.25, 0.5),
                        DVec2::ZERO,
                        EntityKind::BlackHole(BlackHole {
                            mass: 60.0,
                            radius: 18.0,
                        }),
                    ),
                    false,
                );
                registry.add(
                    Entity::new(
                        ARENA * DVec2::new(0.75, 0.5),
                        DVec2::ZERO,
                        EntityKind::Station(Station {
                            heading: rng.angle(),
                            cooldown: 120,
                        }),
                    ),
                    false,
                );
            }
            Self::Waves(_) => {}
        }
    }

    /// Level-specific logic, run at the start of every tick.
    pub fn update(&mut self, registry: &mut EntityRegistry, rng: &mut GameRng, tick: u64) {
        match self {
            Self::Skirmish(level) => {
                let present = registry.asteroids().count() as u32;
                for _ in present..level.min_asteroids {
                    spawn_asteroid(registry, rng, 3);
                }
                if tick >= level.next_bonus_tick {
                    level.next_bonus_tick = tick + SKIRMISH_BONUS_INTERVAL;
                    let kind = match rng.below(3) {
                        0 => BonusKind::ExtraLife,
                        1 => BonusKind::Shield,
                        _ => BonusKind::RapidFire,
                    };
                    let position = DVec2::new(rng.range(0.0, ARENA.x), rng.range(0.0, ARENA.y));
                    registry.add(
                        Entity::new(
                            position,
                            DVec2::ZERO,
                            EntityKind::Bonus(Bonus {
                                kind,
                                ttl: BONUS_TTL,
                            }),
                        ),
                        false,
                    );
                }
            }
            Self::Waves(level) => match level.next_wave_tick {
                Some(due) if tick >= due => {
                    level.wave += 1;
                    level.next_wave_tick = None;
                    log::info!("Wave {} begins at tick {}", level.wave, tick);
                    for _ in 0..WAVE_BASE_ASTEROIDS + level.wave {
                        spawn_asteroid(registry, rng, 3);
                    }
                    registry.add(
                        Entity::new(
                            edge_position(rng),
                            DVec2::from_angle(rng.angle()),
                            EntityKind::Alien(Alien { cooldown: 150 }),
                        ),
                        false,
                    );
                }
                Some(_) => {}
                None => {
                    if registry.asteroids().next().is_none() {
                        level.next_wave_tick = Some(tick + WAVE_PAUSE_TICKS);
                    }
                }
            },
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_i32(self.level_type() as i32);
        match self {
            Self::Skirmish(level) => {
                w.put_u64(level.seed);
                w.put_u32(level.min_asteroids);
                w.put_u64(level.next_bonus_tick);
            }
            Self::Waves(level) => {
                w.put_u64(level.seed);
                w.put_u32(level.wave);
                match level.next_wave_tick {
                    Some(tick) => {
                        w.put_bool(true);
                        w.put_u64(tick);
                    }
                    None => {
                        w.put_bool(false);
                        w.put_u64(0);
                    }
                }
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(match LevelType::try_from(r.i32()?)? {
            LevelType::Skirmish => Self::Skirmish(Skirmish {
                seed: r.u64()?,
                min_asteroids: r.u32()?,
                next_bonus_tick: r.u64()?,
            }),
            LevelType::Waves => {
                let seed = r.u64()?;
                let wave = r.u32()?;
                let scheduled = r.bool()?;
                let tick = r.u64()?;
                Self::Waves(Waves {
                    seed,
                    wave,
                    next_wave_tick: scheduled.then_some(tick),
                })
            }
        })
    }
}
