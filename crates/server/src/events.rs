use orbital::HostEvent;

pub fn log_event(event: &HostEvent) {
    match event {
        HostEvent::PeerConnecting { addr, name } => {
            log::info!("Connection request from {} ({})", addr, name);
        }
        HostEvent::PeerJoined { addr, entity, name } => {
            log::info!("{} joined from {} (entity {})", name, addr, entity);
        }
        HostEvent::PeerLeft {
            addr,
            entity,
            reason,
        } => {
            log::info!("Peer {} (entity {}) {}", addr, entity, reason.as_str());
        }
        HostEvent::PeerRejected { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason);
        }
    }
}
