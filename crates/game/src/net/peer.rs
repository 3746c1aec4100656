use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::entity::EntityId;

pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(15);

/// A remote endpoint and when we last heard from it.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    addr: SocketAddr,
    last_seen: Instant,
    timeout: Duration,
}

impl PeerHandle {
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_timeout(addr, DEFAULT_PEER_TIMEOUT)
    }

    pub fn with_timeout(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
            timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn see(&mut self) {
        self.see_at(Instant::now());
    }

    pub fn see_at(&mut self, now: Instant) {
        self.last_seen = self.last_seen.max(now);
    }

    pub fn should_timeout(&self) -> bool {
        self.should_timeout_at(Instant::now())
    }

    pub fn should_timeout_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= self.timeout
    }
}

/// A registered participant as the host sees it.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    pub handle: PeerHandle,
    pub entity: EntityId,
    pub name: String,
}

/// The host's view of every registered peer, keyed by address.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: HashMap<SocketAddr, RemotePeer>,
    timeout: Duration,
    max_peers: usize,
}

impl PeerRegistry {
    pub fn new(timeout: Duration, max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            timeout,
            max_peers,
        }
    }

    pub fn register(&mut self, addr: SocketAddr, entity: EntityId, name: &str) -> Option<RemotePeer> {
        self.peers.insert(
            addr,
            RemotePeer {
                handle: PeerHandle::with_timeout(addr, self.timeout),
                entity,
                name: name.to_string(),
            },
        )
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&RemotePeer> {
        self.peers.get(addr)
    }

    pub fn entity_of(&self, addr: &SocketAddr) -> Option<EntityId> {
        self.peers.get(addr).map(|peer| peer.entity)
    }

    /// Refreshes the sender's handle. False when the sender is not registered.
    pub fn see(&mut self, addr: &SocketAddr) -> bool {
        match self.peers.get_mut(addr) {
            Some(peer) => {
                peer.handle.see();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<RemotePeer> {
        self.peers.remove(addr)
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_peers
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().collect()
    }

    pub fn addrs_except(&self, skip: SocketAddr) -> Vec<SocketAddr> {
        self.peers.keys().copied().filter(|&addr| addr != skip).collect()
    }

    pub fn evict_timed_out(&mut self) -> Vec<RemotePeer> {
        self.evict_timed_out_at(Instant::now())
    }

    pub fn evict_timed_out_at(&mut self, now: Instant) -> Vec<RemotePeer> {
        let stale: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.handle.should_timeout_at(now))
            .map(|(&addr, _)| addr)
            .collect();

        stale.iter().filter_map(|addr| self.peers.remove(addr)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn handle_times_out_at_threshold() {
        let mut handle = PeerHandle::new(addr(1));
        let seen = handle.last_seen();
        assert!(!handle.should_timeout_at(seen + Duration::from_secs(14)));
        assert!(handle.should_timeout_at(seen + Duration::from_secs(15)));
        assert!(handle.should_timeout_at(seen + Duration::from_secs(60)));

        handle.see_at(seen + Duration::from_secs(20));
        assert!(!handle.should_timeout_at(seen + Duration::from_secs(21)));
    }

    #[test]
    fn see_never_moves_backwards() {
        let mut handle = PeerHandle::new(addr(1));
        let seen = handle.last_seen();
        handle.see_at(seen + Duration::from_secs(10));
        handle.see_at(seen);
        assert_eq!(handle.last_seen(), seen + Duration::from_secs(10));
    }

    #[test]
    fn registry_evicts_only_stale_peers() {
        let mut registry = PeerRegistry::new(Duration::from_secs(15), 8);
        registry.register(addr(1), EntityId(1), "a");
        registry.register(addr(2), EntityId(2), "b");
        let start = Instant::now();

        let later = start + Duration::from_secs(16);
        if let Some(peer) = registry.peers.get_mut(&addr(2)) {
            peer.handle.see_at(later);
        }

        let evicted = registry.evict_timed_out_at(later);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].entity, EntityId(1));
        assert!(registry.contains(&addr(2)));
        assert!(!registry.contains(&addr(1)));
    }

    #[test]
    fn see_reports_unknown_senders() {
        let mut registry = PeerRegistry::new(DEFAULT_PEER_TIMEOUT, 2);
        assert!(!registry.see(&addr(5)));
        registry.register(addr(5), EntityId(9), "x");
        assert!(registry.see(&addr(5)));
        assert_eq!(registry.entity_of(&addr(5)), Some(EntityId(9)));
        assert_eq!(registry.addrs_except(addr(5)), Vec::<SocketAddr>::new());
        registry.register(addr(6), EntityId(10), "y");
        assert!(registry.is_full());
    }
}
