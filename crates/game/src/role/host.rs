use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::action::{Action, ActionCode};
use crate::entity::{Entity, EntityId, EntityView, RegistryChange};
use crate::net::{DatagramChannel, Message, NetworkStats, PacketHandler, PeerRegistry};
use crate::simulation::{SaveError, SimulationState, TickDriver};

use super::config::HostConfig;
use super::events::{DisconnectReason, HostEvent};

/// The authoritative participant: owns the game, admits peers and relays
/// their input.
pub struct HostRole {
    config: HostConfig,
    channel: Arc<DatagramChannel>,
    // Lock order: state before peers.
    state: Mutex<SimulationState>,
    peers: Mutex<PeerRegistry>,
    local_player: EntityId,
    events: Mutex<VecDeque<HostEvent>>,
}

impl HostRole {
    /// Binds the socket, creates a fresh game with the host's own ship and
    /// starts listening.
    pub fn host(config: HostConfig) -> io::Result<Arc<Self>> {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut state = SimulationState::new(config.level.build(seed));
        let local_player = state.spawn_ship(&config.name);
        log::info!(
            "New {:?} game with seed {}, host ship {}",
            state.level().level_type(),
            seed,
            local_player
        );
        Self::host_with_state(config, state, local_player)
    }

    /// Hosts a game restored from a save file.
    pub fn host_saved(config: HostConfig, path: impl AsRef<Path>) -> Result<Arc<Self>, SaveError> {
        let (state, local_player) = SimulationState::load_from_path(path)?;
        Ok(Self::host_with_state(config, state, local_player)?)
    }

    pub fn host_with_state(
        config: HostConfig,
        state: SimulationState,
        local_player: EntityId,
    ) -> io::Result<Arc<Self>> {
        let channel = DatagramChannel::bind(config.bind_addr(), config.channel_config())?;
        log::info!("Hosting on {}", channel.local_addr());

        let host = Arc::new(Self {
            peers: Mutex::new(PeerRegistry::new(config.peer_timeout(), config.max_peers)),
            config,
            channel: Arc::clone(&channel),
            state: Mutex::new(state),
            local_player,
            events: Mutex::new(VecDeque::new()),
        });
        channel.start(Arc::clone(&host))?;
        Ok(host)
    }

    fn state(&self) -> MutexGuard<'_, SimulationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peers(&self) -> MutexGuard<'_, PeerRegistry> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_event(&self, event: HostEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    pub fn drain_events(&self) -> Vec<HostEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn local_player(&self) -> EntityId {
        self.local_player
    }

    pub fn stats(&self) -> NetworkStats {
        self.channel.stats()
    }

    pub fn current_tick(&self) -> u64 {
        self.state().tick()
    }

    pub fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    pub fn peer_count(&self) -> usize {
        self.peers().len()
    }

    pub fn peer_entity(&self, addr: &SocketAddr) -> Option<EntityId> {
        self.peers().entity_of(addr)
    }

    /// Runs `f` against the live state under its lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&SimulationState) -> R) -> R {
        f(&self.state())
    }

    pub fn snapshot(&self) -> Vec<EntityView> {
        self.state().snapshot()
    }

    /// Input from the host's own player: scheduled locally and relayed to
    /// every peer.
    pub fn key_event(&self, code: ActionCode) {
        let action = {
            let state = self.state();
            let action = Action::delayed(self.local_player, code, state.tick(), self.config.input_delay);
            state.enqueue(action);
            action
        };
        let addrs = self.peers().addrs();
        self.channel.broadcast(&Message::Action(action), &addrs);
    }

    pub fn set_paused(&self, paused: bool) {
        self.state().set_paused(paused);
        log::info!("Game {}", if paused { "paused" } else { "resumed" });
        let addrs = self.peers().addrs();
        self.channel.broadcast(&Message::Pause { paused }, &addrs);
    }

    /// Adds an entity outside the deterministic step; peers learn about it
    /// after the next tick.
    pub fn spawn_entity(&self, entity: Entity) -> EntityId {
        self.state().registry_mut().add_hosted(entity, true)
    }

    /// Removes any entity, step-spawned ones included; peers are told after
    /// the next tick.
    pub fn despawn_entity(&self, id: EntityId) -> bool {
        self.state().registry_mut().remove_synced(id).is_some()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SaveError> {
        self.state().save_to_path(path, self.local_player)
    }

    /// Tells every peer the game is over and closes the socket.
    pub fn shutdown(&self) {
        let addrs = self.peers().addrs();
        log::info!("Shutting down, notifying {} peer(s)", addrs.len());
        self.channel.broadcast(&Message::HostQuitting, &addrs);
        self.channel.close();
    }

    fn handle_connect(&self, from: SocketAddr, version: i32, name: String) {
        self.push_event(HostEvent::PeerConnecting {
            addr: from,
            name: name.clone(),
        });

        if version < self.config.min_protocol_version {
            log::warn!(
                "Rejecting {} ({}): protocol {} below required {}",
                from,
                name,
                version,
                self.config.min_protocol_version
            );
            self.send(
                &Message::VersionRejected {
                    required_version: self.config.min_protocol_version,
                },
                from,
            );
            self.push_event(HostEvent::PeerRejected {
                addr: from,
                reason: format!("protocol version {}", version),
            });
            return;
        }

        let mut state = self.state();
        let mut peers = self.peers();

        // A repeated CONNECT means our FULL_SYNC was lost; resend it.
        if let Some(entity) = peers.entity_of(&from) {
            peers.see(&from);
            let full_sync = Message::FullSync {
                state: state.to_bytes(),
                assigned_id: entity,
            };
            drop(peers);
            drop(state);
            log::debug!("Resending full sync to {}", from);
            self.send(&full_sync, from);
            return;
        }

        if peers.is_full() {
            drop(peers);
            drop(state);
            log::warn!("Rejecting {} ({}): game is full", from, name);
            self.push_event(HostEvent::PeerRejected {
                addr: from,
                reason: "game is full".to_string(),
            });
            return;
        }

        let entity = state.spawn_ship(&name);
        let Some(joined) = state.registry().get(entity).cloned() else {
            return;
        };
        let full_sync = Message::FullSync {
            state: state.to_bytes(),
            assigned_id: entity,
        };
        let others = peers.addrs_except(from);
        peers.register(from, entity, &name);
        drop(peers);
        drop(state);

        log::info!("{} joined from {} as {}", name, from, entity);
        self.send(&full_sync, from);
        self.channel
            .broadcast(&Message::PlayerJoined { entity: joined }, &others);
        self.push_event(HostEvent::PeerJoined {
            addr: from,
            entity,
            name,
        });
    }

    fn handle_keystroke(&self, from: SocketAddr, code: ActionCode) {
        let (entity, others) = {
            let peers = self.peers();
            let Some(entity) = peers.entity_of(&from) else {
                log::debug!("Ignoring keystroke from unregistered {}", from);
                return;
            };
            (entity, peers.addrs_except(from))
        };

        let action = {
            let state = self.state();
            let action = Action::delayed(entity, code, state.tick(), self.config.input_delay);
            state.enqueue(action);
            action
        };
        self.channel.broadcast(&Message::Action(action), &others);
    }

    fn handle_quit(&self, from: SocketAddr) {
        let Some(peer) = self.peers().remove(&from) else {
            return;
        };
        self.depart(from, peer.entity, DisconnectReason::Quit);
    }

    fn depart(&self, addr: SocketAddr, entity: EntityId, reason: DisconnectReason) {
        self.state().registry_mut().remove(entity);
        log::info!("Peer {} ({}) {}", addr, entity, reason.as_str());
        let addrs = self.peers().addrs();
        self.channel.broadcast(
            &Message::PlayerQuit {
                timed_out: reason.timed_out(),
                id: entity,
            },
            &addrs,
        );
        self.push_event(HostEvent::PeerLeft {
            addr,
            entity,
            reason,
        });
    }

    fn send(&self, message: &Message, addr: SocketAddr) {
        if let Err(e) = self.channel.send_to(message, addr) {
            log::warn!("Failed to send {:?} to {}: {}", message.opcode(), addr, e);
        }
    }
}

impl PacketHandler for HostRole {
    fn on_message(&self, message: Message, from: SocketAddr) {
        if let Message::Connect { version, name } = message {
            self.handle_connect(from, version, name);
            return;
        }

        if !self.peers().see(&from) {
            log::debug!("Ignoring {:?} from unregistered {}", message.opcode(), from);
            return;
        }

        match message {
            Message::Keystroke { code } => self.handle_keystroke(from, code),
            Message::Quit => self.handle_quit(from),
            Message::KeepAlive => {}
            other => log::debug!("Ignoring host-bound {:?} from {}", other.opcode(), from),
        }
    }

    fn on_liveness_check(&self) {
        let evicted = self.peers().evict_timed_out();
        for peer in evicted {
            log::warn!("Evicting {} ({}): no contact", peer.handle.addr(), peer.name);
            self.depart(peer.handle.addr(), peer.entity, DisconnectReason::Timeout);
        }

        let addrs = self.peers().addrs();
        self.channel.broadcast(&Message::KeepAlive, &addrs);
    }
}

impl TickDriver for HostRole {
    fn tick(&self) {
        let (changes, positions) = {
            let mut state = self.state();
            let advanced = state.advance().is_some();
            // Host-side spawns and despawns still go out while paused.
            let changes = state.registry_mut().take_changes();

            let interval = self.config.position_sync_interval;
            let sync_due = advanced && interval > 0 && state.tick() % interval == 0;
            let positions: Vec<Message> = if sync_due {
                state
                    .registry()
                    .ships()
                    .map(|ship| Message::PositionUpdate {
                        id: ship.id,
                        position: ship.position,
                        velocity: ship.velocity,
                    })
                    .collect()
            } else {
                Vec::new()
            };
            (changes, positions)
        };

        let addrs = self.peers().addrs();
        if addrs.is_empty() {
            return;
        }
        for change in changes {
            let message = match change {
                RegistryChange::Created(entity) => Message::EntityCreated { entity },
                RegistryChange::Removed(id) => Message::EntityRemoved { id },
            };
            self.channel.broadcast(&message, &addrs);
        }
        for message in &positions {
            self.channel.broadcast(message, &addrs);
        }
    }
}
