use std::collections::HashSet;

use glam::DVec2;

use crate::entity::{
    Asteroid, BonusKind, Controls, Entity, EntityId, EntityKind, EntityRegistry, Projectile,
    ProjectileStage, Ship,
};
use crate::rng::GameRng;

pub const ARENA: DVec2 = DVec2::new(1024.0, 768.0);

const TURN_RATE: f64 = 0.06;
const THRUST: f64 = 0.08;
const DRAG: f64 = 0.995;
const MAX_SHIP_SPEED: f64 = 6.0;
const PROJECTILE_SPEED: f64 = 8.0;
const FIRE_COOLDOWN: u32 = 12;
const RAPID_FIRE_COOLDOWN: u32 = 4;
const ALIEN_FIRE_COOLDOWN: u32 = 90;
const ALIEN_AIM_SPREAD: f64 = 0.15;
const STATION_TURN_RATE: f64 = 0.01;
const STATION_FIRE_COOLDOWN: u32 = 60;
const GRAVITY: f64 = 40.0;
const MAX_GRAVITY_ACCEL: f64 = 0.5;
const BONUS_SHIELD_TICKS: u32 = 400;
const BONUS_RAPID_FIRE_TICKS: u32 = 600;
const ASTEROID_SCORE: i64 = 100;
const ALIEN_SCORE: i64 = 250;
const SHIP_SCORE: i64 = 500;

fn wrap(position: DVec2) -> DVec2 {
    DVec2::new(position.x.rem_euclid(ARENA.x), position.y.rem_euclid(ARENA.y))
}

fn direction(angle: f64) -> DVec2 {
    DVec2::new(angle.cos(), angle.sin())
}

fn projectile_from(owner: &Entity, heading: f64) -> Entity {
    let dir = direction(heading);
    Entity::new(
        owner.position + dir * (owner.radius() + 4.0),
        owner.velocity + dir * PROJECTILE_SPEED,
        EntityKind::Projectile(Projectile::new(owner.id)),
    )
}

pub(crate) fn respawn(entity: &mut Entity) {
    entity.position = ARENA * 0.5;
    entity.velocity = DVec2::ZERO;
    if let Some(ship) = entity.as_ship_mut() {
        ship.heading = -std::f64::consts::FRAC_PI_2;
        ship.shield = Ship::SPAWN_SHIELD_TICKS;
        ship.cooldown = 0;
    }
}

fn kill_ship(entity: &mut Entity) {
    let Some(ship) = entity.as_ship_mut() else {
        return;
    };
    ship.lives = ship.lives.saturating_sub(1);
    ship.controls = Controls::empty();
    if ship.is_alive() {
        respawn(entity);
    } else {
        entity.velocity = DVec2::ZERO;
    }
}

fn split_asteroid(asteroid: &Entity, rng: &mut GameRng, spawns: &mut Vec<Entity>) {
    let EntityKind::Asteroid(a) = &asteroid.kind else {
        return;
    };
    if a.size <= 1 {
        return;
    }
    for _ in 0..2 {
        let speed = asteroid.velocity.length().max(0.5) * rng.range(1.1, 1.6);
        spawns.push(Entity::new(
            asteroid.position,
            direction(rng.angle()) * speed,
            EntityKind::Asteroid(Asteroid {
                size: a.size - 1,
                angle: rng.angle(),
                spin: rng.range(-0.05, 0.05),
            }),
        ));
    }
}

/// Moves every entity one tick and resolves what happened to it.
pub fn step_entities(registry: &mut EntityRegistry, rng: &mut GameRng) {
    let mut spawns = Vec::new();
    let mut removals = Vec::new();

    let targets: Vec<DVec2> = registry
        .iter()
        .filter(|e| matches!(&e.kind, EntityKind::Ship(s) if s.is_alive()))
        .map(|e| e.position)
        .collect();

    for entity in registry.iter_mut() {
        advance_entity(entity, &targets, rng, &mut spawns, &mut removals);
    }

    apply_gravity(registry, &mut removals);
    resolve_collisions(registry, rng, &mut spawns, &mut removals);

    let mut removed = HashSet::new();
    for id in removals {
        if removed.insert(id) {
            registry.remove(id);
        }
    }
    for entity in spawns {
        registry.add(entity, false);
    }
}

fn advance_entity(
    entity: &mut Entity,
    targets: &[DVec2],
    rng: &mut GameRng,
    spawns: &mut Vec<Entity>,
    removals: &mut Vec<EntityId>,
) {
    let mut fire_heading = None;

    match &mut entity.kind {
        EntityKind::Ship(ship) => {
            if !ship.is_alive() {
                return;
            }
            if ship.controls.contains(Controls::LEFT) {
                ship.heading -= TURN_RATE;
            }
            if ship.controls.contains(Controls::RIGHT) {
                ship.heading += TURN_RATE;
            }
            if ship.controls.contains(Controls::THRUST) {
                entity.velocity += direction(ship.heading) * THRUST;
            }
            entity.velocity = (entity.velocity * DRAG).clamp_length_max(MAX_SHIP_SPEED);

            ship.cooldown = ship.cooldown.saturating_sub(1);
            ship.shield = ship.shield.saturating_sub(1);
            ship.rapid_fire = ship.rapid_fire.saturating_sub(1);
            if ship.controls.contains(Controls::FIRE) && ship.cooldown == 0 {
                ship.cooldown = if ship.rapid_fire > 0 {
                    RAPID_FIRE_COOLDOWN
                } else {
                    FIRE_COOLDOWN
                };
                fire_heading = Some(ship.heading);
            }
        }
        EntityKind::Asteroid(asteroid) => {
            asteroid.angle += asteroid.spin;
        }
        EntityKind::Alien(alien) => {
            alien.cooldown = alien.cooldown.saturating_sub(1);
            if alien.cooldown == 0 {
                alien.cooldown = ALIEN_FIRE_COOLDOWN;
                let from = entity.position;
                let nearest = targets
                    .iter()
                    .min_by(|a, b| a.distance_squared(from).total_cmp(&b.distance_squared(from)));
                if let Some(target) = nearest {
                    let offset = *target - from;
                    let aim = offset.y.atan2(offset.x);
                    fire_heading = Some(aim + rng.range(-ALIEN_AIM_SPREAD, ALIEN_AIM_SPREAD));
                }
            }
        }
        EntityKind::Station(station) => {
            station.heading += STATION_TURN_RATE;
            station.cooldown = station.cooldown.saturating_sub(1);
            if station.cooldown == 0 {
                station.cooldown = STATION_FIRE_COOLDOWN;
                fire_heading = Some(station.heading);
            }
        }
        EntityKind::Bonus(bonus) => {
            bonus.ttl = bonus.ttl.saturating_sub(1);
            if bonus.ttl == 0 {
                removals.push(entity.id);
            }
        }
        EntityKind::BlackHole(_) => {}
        EntityKind::Projectile(projectile) => match projectile.stage {
            ProjectileStage::Flying => {
                projectile.ttl = projectile.ttl.saturating_sub(1);
                if projectile.ttl == 0 {
                    projectile.explode();
                    entity.velocity = DVec2::ZERO;
                }
            }
            ProjectileStage::Exploding { remaining } => {
                if remaining <= 1 {
                    removals.push(entity.id);
                } else {
                    projectile.stage = ProjectileStage::Exploding {
                        remaining: remaining - 1,
                    };
                }
            }
        },
    }

    entity.position = wrap(entity.position + entity.velocity);
    if let Some(heading) = fire_heading {
        spawns.push(projectile_from(entity, heading));
    }
}

fn apply_gravity(registry: &mut EntityRegistry, removals: &mut Vec<EntityId>) {
    let holes: Vec<(DVec2, f64, f64)> = registry
        .iter()
        .filter_map(|e| match &e.kind {
            EntityKind::BlackHole(h) => Some((e.position, h.mass, h.radius)),
            _ => None,
        })
        .collect();
    if holes.is_empty() {
        return;
    }

    for entity in registry.iter_mut() {
        if matches!(
            &entity.kind,
            EntityKind::BlackHole(_) | EntityKind::Station(_)
        ) {
            continue;
        }
        if matches!(&entity.kind, EntityKind::Ship(s) if !s.is_alive()) {
            continue;
        }
        for &(center, mass, radius) in &holes {
            let offset = center - entity.position;
            let distance = offset.length();
            if distance < radius {
                if entity.as_ship().is_some() {
                    kill_ship(entity);
                } else {
                    removals.push(entity.id);
                }
                break;
            }
            let accel = (GRAVITY * mass / (distance * distance)).min(MAX_GRAVITY_ACCEL);
            entity.velocity += offset / distance * accel;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Body {
    id: EntityId,
    position: DVec2,
    radius: f64,
    role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    Projectile { owner: EntityId },
    Asteroid,
    Alien,
    Ship { vulnerable: bool },
    Bonus(BonusKind),
}

fn bodies(registry: &EntityRegistry) -> Vec<Body> {
    registry
        .iter()
        .filter_map(|e| {
            let role = match &e.kind {
                EntityKind::Projectile(p) if p.is_flying() => Role::Projectile { owner: p.owner },
                EntityKind::Asteroid(_) => Role::Asteroid,
                EntityKind::Alien(_) => Role::Alien,
                EntityKind::Ship(s) if s.is_alive() => Role::Ship {
                    vulnerable: s.shield == 0,
                },
                EntityKind::Bonus(b) => Role::Bonus(b.kind),
                _ => return None,
            };
            Some(Body {
                id: e.id,
                position: e.position,
                radius: e.radius(),
                role,
            })
        })
        .collect()
}

fn touching(a: &Body, b: &Body) -> bool {
    a.position.distance_squared(b.position) <= (a.radius + b.radius).powi(2)
}

fn resolve_collisions(
    registry: &mut EntityRegistry,
    rng: &mut GameRng,
    spawns: &mut Vec<Entity>,
    removals: &mut Vec<EntityId>,
) {
    let bodies = bodies(registry);
    let mut consumed: HashSet<EntityId> = removals.iter().copied().collect();

    for (i, a) in bodies.iter().enumerate() {
        for b in &bodies[i + 1..] {
            if consumed.contains(&a.id) || consumed.contains(&b.id) || !touching(a, b) {
                continue;
            }
            let (first, second) = match (a.role, b.role) {
                (Role::Projectile { .. }, _)
                | (Role::Ship { .. }, Role::Asteroid | Role::Bonus(_)) => (a, b),
                (_, Role::Projectile { .. })
                | (Role::Asteroid | Role::Bonus(_), Role::Ship { .. }) => (b, a),
                _ => continue,
            };
            collide(registry, rng, first, second, spawns, removals, &mut consumed);
        }
    }
}

fn collide(
    registry: &mut EntityRegistry,
    rng: &mut GameRng,
    first: &Body,
    second: &Body,
    spawns: &mut Vec<Entity>,
    removals: &mut Vec<EntityId>,
    consumed: &mut HashSet<EntityId>,
) {
    match (first.role, second.role) {
        (Role::Projectile { owner }, target) => {
            let score = match target {
                Role::Asteroid => ASTEROID_SCORE,
                Role::Alien => ALIEN_SCORE,
                Role::Ship { vulnerable: true } if owner != second.id => SHIP_SCORE,
                _ => return,
            };
            if let Some(entity) = registry.get_mut(first.id) {
                entity.velocity = DVec2::ZERO;
                if let EntityKind::Projectile(p) = &mut entity.kind {
                    p.explode();
                }
            }
            consumed.insert(first.id);
            consumed.insert(second.id);

            match target {
                Role::Asteroid => {
                    if let Some(asteroid) = registry.get(second.id) {
                        split_asteroid(asteroid, rng, spawns);
                    }
                    removals.push(second.id);
                }
                Role::Alien => removals.push(second.id),
                _ => {
                    if let Some(entity) = registry.get_mut(second.id) {
                        kill_ship(entity);
                    }
                }
            }
            if let Some(shooter) = registry.get_mut(owner).and_then(|e| e.as_ship_mut()) {
                shooter.score += score;
            }
        }
        (Role::Ship { vulnerable }, Role::Asteroid) => {
            if !vulnerable {
                return;
            }
            consumed.insert(first.id);
            consumed.insert(second.id);
            if let Some(asteroid) = registry.get(second.id) {
                split_asteroid(asteroid, rng, spawns);
            }
            removals.push(second.id);
            if let Some(entity) = registry.get_mut(first.id) {
                kill_ship(entity);
            }
        }
        (Role::Ship { .. }, Role::Bonus(kind)) => {
            consumed.insert(second.id);
            removals.push(second.id);
            if let Some(ship) = registry.get_mut(first.id).and_then(|e| e.as_ship_mut()) {
                match kind {
                    BonusKind::ExtraLife => ship.lives += 1,
                    BonusKind::Shield => ship.shield = ship.shield.max(BONUS_SHIELD_TICKS),
                    BonusKind::RapidFire => ship.rapid_fire = BONUS_RAPID_FIRE_TICKS,
                }
            }
        }
        _ => {}
    }
}
