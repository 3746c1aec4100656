use std::fmt;

use bitflags::bitflags;
use glam::DVec2;
use serde::Serialize;

use crate::codec::{DecodeError, Reader, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub i64);

impl EntityId {
    pub const UNASSIGNED: EntityId = EntityId(0);

    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum EntityType {
    Ship = 1,
    Asteroid = 2,
    Alien = 3,
    Station = 4,
    Bonus = 5,
    BlackHole = 6,
    Projectile = 7,
}

impl TryFrom<i32> for EntityType {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Ship,
            2 => Self::Asteroid,
            3 => Self::Alien,
            4 => Self::Station,
            5 => Self::Bonus,
            6 => Self::BlackHole,
            7 => Self::Projectile,
            other => return Err(DecodeError::UnknownEntityType(other)),
        })
    }
}

bitflags! {
    /// Controls currently held down on a ship.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Controls: u8 {
        const THRUST = 1 << 0;
        const LEFT = 1 << 1;
        const RIGHT = 1 << 2;
        const FIRE = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ship {
    pub name: String,
    pub heading: f64,
    pub controls: Controls,
    pub cooldown: u32,
    pub lives: u32,
    pub shield: u32,
    pub rapid_fire: u32,
    pub score: i64,
}

impl Ship {
    pub const STARTING_LIVES: u32 = 3;
    pub const SPAWN_SHIELD_TICKS: u32 = 300;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            heading: -std::f64::consts::FRAC_PI_2,
            controls: Controls::empty(),
            cooldown: 0,
            lives: Self::STARTING_LIVES,
            shield: Self::SPAWN_SHIELD_TICKS,
            rapid_fire: 0,
            score: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.lives > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Asteroid {
    /// 3 = large, 1 = small; size 1 asteroids do not split.
    pub size: u8,
    pub angle: f64,
    pub spin: f64,
}

impl Asteroid {
    pub fn radius(&self) -> f64 {
        12.0 * self.size as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alien {
    pub cooldown: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Station {
    pub heading: f64,
    pub cooldown: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum BonusKind {
    ExtraLife = 0,
    Shield = 1,
    RapidFire = 2,
}

impl TryFrom<u8> for BonusKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ExtraLife),
            1 => Ok(Self::Shield),
            2 => Ok(Self::RapidFire),
            other => Err(DecodeError::InvalidValue {
                what: "bonus kind",
                value: other as i64,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bonus {
    pub kind: BonusKind,
    pub ttl: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlackHole {
    pub mass: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileStage {
    Flying,
    Exploding { remaining: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projectile {
    pub owner: EntityId,
    pub ttl: u32,
    pub stage: ProjectileStage,
}

impl Projectile {
    pub const LIFETIME_TICKS: u32 = 120;
    pub const EXPLOSION_TICKS: u32 = 20;

    pub fn new(owner: EntityId) -> Self {
        Self {
            owner,
            ttl: Self::LIFETIME_TICKS,
            stage: ProjectileStage::Flying,
        }
    }

    pub fn is_flying(&self) -> bool {
        self.stage == ProjectileStage::Flying
    }

    pub fn explode(&mut self) {
        if self.is_flying() {
            self.stage = ProjectileStage::Exploding {
                remaining: Self::EXPLOSION_TICKS,
            };
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Ship(Ship),
    Asteroid(Asteroid),
    Alien(Alien),
    Station(Station),
    Bonus(Bonus),
    BlackHole(BlackHole),
    Projectile(Projectile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub position: DVec2,
    pub velocity: DVec2,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(position: DVec2, velocity: DVec2, kind: EntityKind) -> Self {
        Self {
            id: EntityId::UNASSIGNED,
            position,
            velocity,
            kind,
        }
    }

    pub fn ship(name: impl Into<String>, position: DVec2) -> Self {
        Self::new(position, DVec2::ZERO, EntityKind::Ship(Ship::new(name)))
    }

    pub fn entity_type(&self) -> EntityType {
        match self.kind {
            EntityKind::Ship(_) => EntityType::Ship,
            EntityKind::Asteroid(_) => EntityType::Asteroid,
            EntityKind::Alien(_) => EntityType::Alien,
            EntityKind::Station(_) => EntityType::Station,
            EntityKind::Bonus(_) => EntityType::Bonus,
            EntityKind::BlackHole(_) => EntityType::BlackHole,
            EntityKind::Projectile(_) => EntityType::Projectile,
        }
    }

    pub fn radius(&self) -> f64 {
        match &self.kind {
            EntityKind::Ship(_) => 10.0,
            EntityKind::Asteroid(a) => a.radius(),
            EntityKind::Alien(_) => 14.0,
            EntityKind::Station(_) => 24.0,
            EntityKind::Bonus(_) => 8.0,
            EntityKind::BlackHole(h) => h.radius,
            EntityKind::Projectile(p) => match p.stage {
                ProjectileStage::Flying => 2.0,
                ProjectileStage::Exploding { .. } => 0.0,
            },
        }
    }

    /// Entities that fire projectiles on their own.
    pub fn is_shooting(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Ship(_) | EntityKind::Alien(_) | EntityKind::Station(_)
        )
    }

    pub fn as_ship(&self) -> Option<&Ship> {
        match &self.kind {
            EntityKind::Ship(ship) => Some(ship),
            _ => None,
        }
    }

    pub fn as_ship_mut(&mut self) -> Option<&mut Ship> {
        match &mut self.kind {
            EntityKind::Ship(ship) => Some(ship),
            _ => None,
        }
    }

    pub fn heading(&self) -> f64 {
        match &self.kind {
            EntityKind::Ship(s) => s.heading,
            EntityKind::Station(s) => s.heading,
            EntityKind::Asteroid(a) => a.angle,
            _ => 0.0,
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_i32(self.entity_type() as i32);
        w.put_i64(self.id.0);
        w.put_f64(self.position.x);
        w.put_f64(self.position.y);
        w.put_f64(self.velocity.x);
        w.put_f64(self.velocity.y);

        match &self.kind {
            EntityKind::Ship(s) => {
                w.put_str(&s.name);
                w.put_f64(s.heading);
                w.put_u8(s.controls.bits());
                w.put_u32(s.cooldown);
                w.put_u32(s.lives);
                w.put_u32(s.shield);
                w.put_u32(s.rapid_fire);
                w.put_i64(s.score);
            }
            EntityKind::Asteroid(a) => {
                w.put_u8(a.size);
                w.put_f64(a.angle);
                w.put_f64(a.spin);
            }
            EntityKind::Alien(a) => {
                w.put_u32(a.cooldown);
            }
            EntityKind::Station(s) => {
                w.put_f64(s.heading);
                w.put_u32(s.cooldown);
            }
            EntityKind::Bonus(b) => {
                w.put_u8(b.kind as u8);
                w.put_u32(b.ttl);
            }
            EntityKind::BlackHole(h) => {
                w.put_f64(h.mass);
                w.put_f64(h.radius);
            }
            EntityKind::Projectile(p) => {
                w.put_i64(p.owner.0);
                w.put_u32(p.ttl);
                match p.stage {
                    ProjectileStage::Flying => {
                        w.put_u8(0);
                        w.put_u32(0);
                    }
                    ProjectileStage::Exploding { remaining } => {
                        w.put_u8(1);
                        w.put_u32(remaining);
                    }
                }
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let entity_type = EntityType::try_from(r.i32()?)?;
        let id = EntityId(r.i64()?);
        if !id.is_assigned() {
            return Err(DecodeError::InvalidValue {
                what: "entity id",
                value: id.0,
            });
        }
        let position = DVec2::new(r.f64()?, r.f64()?);
        let velocity = DVec2::new(r.f64()?, r.f64()?);

        let kind = match entity_type {
            EntityType::Ship => {
                let name = r.str()?;
                let heading = r.f64()?;
                let bits = r.u8()?;
                let controls = Controls::from_bits(bits).ok_or(DecodeError::InvalidValue {
                    what: "controls",
                    value: bits as i64,
                })?;
                EntityKind::Ship(Ship {
                    name,
                    heading,
                    controls,
                    cooldown: r.u32()?,
                    lives: r.u32()?,
                    shield: r.u32()?,
                    rapid_fire: r.u32()?,
                    score: r.i64()?,
                })
            }
            EntityType::Asteroid => EntityKind::Asteroid(Asteroid {
                size: r.u8()?,
                angle: r.f64()?,
                spin: r.f64()?,
            }),
            EntityType::Alien => EntityKind::Alien(Alien { cooldown: r.u32()? }),
            EntityType::Station => EntityKind::Station(Station {
                heading: r.f64()?,
                cooldown: r.u32()?,
            }),
            EntityType::Bonus => EntityKind::Bonus(Bonus {
                kind: BonusKind::try_from(r.u8()?)?,
                ttl: r.u32()?,
            }),
            EntityType::BlackHole => EntityKind::BlackHole(BlackHole {
                mass: r.f64()?,
                radius: r.f64()?,
            }),
            EntityType::Projectile => {
                let owner = EntityId(r.i64()?);
                let ttl = r.u32()?;
                let stage = match (r.u8()?, r.u32()?) {
                    (0, _) => ProjectileStage::Flying,
                    (1, remaining) => ProjectileStage::Exploding { remaining },
                    (other, _) => {
                        return Err(DecodeError::InvalidValue {
                            what: "projectile stage",
                            value: other as i64,
                        });
                    }
                };
                EntityKind::Projectile(Projectile { owner, ttl, stage })
            }
        };

        Ok(Self {
            id,
            position,
            velocity,
            kind,
        })
    }

    pub fn view(&self) -> EntityView {
        EntityView {
            id: self.id,
            entity_type: self.entity_type(),
            position: self.position,
            velocity: self.velocity,
            heading: self.heading(),
            radius: self.radius(),
            flash: 0.0,
        }
    }
}

/// Read-only copy of an entity for renderers and other observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub position: DVec2,
    pub velocity: DVec2,
    pub heading: f64,
    pub radius: f64,
    /// Cosmetic flicker for explosions; never read back by the simulation.
    pub flash: f64,
}
