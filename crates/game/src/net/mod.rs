mod channel;
mod fragment;
mod peer;
mod protocol;
mod stats;

pub use channel::{ChannelConfig, DEFAULT_LIVENESS_INTERVAL, DatagramChannel, PacketHandler};
pub use fragment::{
    DEFAULT_FRAGMENT_TTL, FRAGMENT_HEADER_SIZE, FragmentAssembler, FragmentBuffer, FragmentError,
    FragmentHeader, MAX_FRAGMENTS, split_payload,
};
pub use peer::{DEFAULT_PEER_TIMEOUT, PeerHandle, PeerRegistry, RemotePeer};
pub use protocol::{
    DEFAULT_PORT, MAX_PACKET_SIZE, MIN_PROTOCOL_VERSION, Message, Opcode, PROTOCOL_VERSION, Packet,
};
pub use stats::NetworkStats;
