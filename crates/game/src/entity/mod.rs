mod kind;
mod registry;

pub use kind::{
    Alien, Asteroid, BlackHole, Bonus, BonusKind, Controls, Entity, EntityId, EntityKind,
    EntityType, EntityView, Projectile, ProjectileStage, Ship, Station,
};
pub use registry::{EntityRegistry, HOSTED_ID_BASE, RegistryChange};
