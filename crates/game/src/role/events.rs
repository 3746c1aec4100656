use std::net::SocketAddr;

use crate::entity::EntityId;

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    PeerConnecting {
        addr: SocketAddr,
        name: String,
    },
    PeerJoined {
        addr: SocketAddr,
        entity: EntityId,
        name: String,
    },
    PeerLeft {
        addr: SocketAddr,
        entity: EntityId,
        reason: DisconnectReason,
    },
    PeerRejected {
        addr: SocketAddr,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Quit,
    Timeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Quit => "quit",
            DisconnectReason::Timeout => "timed out",
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, DisconnectReason::Timeout)
    }
}
