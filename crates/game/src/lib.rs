pub mod action;
pub mod codec;
pub mod entity;
pub mod level;
pub mod net;
pub mod rng;
pub mod role;
pub mod simulation;

pub use action::{Action, ActionCode, ActionQueue, ApplyReport};
pub use codec::{DecodeError, Reader, Writer};
pub use entity::{Entity, EntityId, EntityKind, EntityRegistry, EntityType, EntityView};
pub use level::{Level, LevelType};
pub use net::{
    DEFAULT_PORT, DatagramChannel, MAX_PACKET_SIZE, Message, NetworkStats, PROTOCOL_VERSION,
    PacketHandler, PeerHandle,
};
pub use role::{HostConfig, HostEvent, HostRole, LevelChoice, PeerConfig, PeerRole, PeerStatus};
pub use simulation::{SaveError, SchedulerState, SimulationState, TickDriver, TickScheduler};
