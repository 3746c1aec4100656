mod config;
mod events;
mod host;
mod peer;

pub use config::{DEFAULT_INPUT_DELAY, HostConfig, LevelChoice, PeerConfig};
pub use events::{DisconnectReason, HostEvent};
pub use host::HostRole;
pub use peer::{PeerRole, PeerStatus};
