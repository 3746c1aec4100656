use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::action::{Action, ActionCode};
use crate::entity::{EntityId, EntityView};
use crate::net::{DatagramChannel, Message, NetworkStats, PacketHandler, PeerHandle};
use crate::simulation::{SaveError, SimulationState, TickDriver};

use super::config::PeerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Connecting,
    Rejected { required_version: i32 },
    InGame,
    HostQuit,
}

#[derive(Debug)]
struct Session {
    state: SimulationState,
    player: EntityId,
}

/// A connecting participant: mirrors the host's game from a full sync plus
/// incremental updates and sends its own input upstream.
pub struct PeerRole {
    config: PeerConfig,
    channel: Arc<DatagramChannel>,
    host: Mutex<PeerHandle>,
    session: Mutex<Option<Session>>,
    status: Mutex<PeerStatus>,
}

impl PeerRole {
    /// Binds an ephemeral socket, starts listening and sends CONNECT.
    pub fn connect(config: PeerConfig, host: SocketAddr) -> io::Result<Arc<Self>> {
        let channel = DatagramChannel::bind(format!("{}:0", config.bind), config.channel_config())?;
        log::info!("Connecting to {} from {}", host, channel.local_addr());

        let peer = Arc::new(Self {
            host: Mutex::new(PeerHandle::with_timeout(host, config.host_timeout())),
            config,
            channel: Arc::clone(&channel),
            session: Mutex::new(None),
            status: Mutex::new(PeerStatus::Connecting),
        });
        channel.start(Arc::clone(&peer))?;
        peer.send_connect()?;
        Ok(peer)
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: PeerStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn status(&self) -> PeerStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn host_addr(&self) -> SocketAddr {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .addr()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn stats(&self) -> NetworkStats {
        self.channel.stats()
    }

    /// Our own ship, once the host has assigned one.
    pub fn player(&self) -> Option<EntityId> {
        self.session().as_ref().map(|s| s.player)
    }

    pub fn current_tick(&self) -> Option<u64> {
        self.session().as_ref().map(|s| s.state.tick())
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&SimulationState) -> R) -> Option<R> {
        self.session().as_ref().map(|s| f(&s.state))
    }

    pub fn snapshot(&self) -> Option<Vec<EntityView>> {
        self.session().as_mut().map(|s| s.state.snapshot())
    }

    /// True once the host has been silent for longer than the timeout.
    pub fn server_timeout(&self) -> bool {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_timeout()
    }

    /// Schedules local input with the delay margin and sends it to the host.
    /// Returns false before the first full sync.
    pub fn key_event(&self, code: ActionCode) -> bool {
        {
            let session = self.session();
            let Some(session) = session.as_ref() else {
                return false;
            };
            session.state.enqueue(Action::delayed(
                session.player,
                code,
                session.state.tick(),
                self.config.input_delay,
            ));
        }
        self.send(&Message::Keystroke { code });
        true
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SaveError> {
        match self.session().as_ref() {
            Some(session) => session.state.save_to_path(path, session.player),
            None => Err(SaveError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no game to save",
            ))),
        }
    }

    /// Leaves the game and closes the socket.
    pub fn quit(&self) {
        self.send(&Message::Quit);
        self.channel.close();
    }

    fn send_connect(&self) -> io::Result<usize> {
        self.channel.send_to(
            &Message::Connect {
                version: self.config.protocol_version,
                name: self.config.name.clone(),
            },
            self.host_addr(),
        )
    }

    fn send(&self, message: &Message) {
        let host = self.host_addr();
        if let Err(e) = self.channel.send_to(message, host) {
            log::warn!("Failed to send {:?} to host {}: {}", message.opcode(), host, e);
        }
    }

    fn apply_update(&self, message: Message) {
        let mut session = self.session();
        let Some(session) = session.as_mut() else {
            log::debug!("Ignoring {:?} before full sync", message.opcode());
            return;
        };
        let state = &mut session.state;

        match message {
            Message::Pause { paused } => state.set_paused(paused),
            Message::PlayerJoined { entity } => {
                log::info!("{} joined", entity.id);
                state.registry_mut().add(entity, false);
            }
            Message::EntityCreated { entity } => {
                state.registry_mut().add(entity, false);
            }
            Message::PlayerQuit { timed_out, id } => {
                log::info!("{} {}", id, if timed_out { "timed out" } else { "left" });
                state.registry_mut().remove(id);
            }
            Message::EntityRemoved { id } => {
                state.registry_mut().remove(id);
            }
            Message::PositionUpdate {
                id,
                position,
                velocity,
            } => {
                state.registry_mut().set_motion(id, position, velocity);
            }
            Message::Action(action) => {
                if action.actor == session.player {
                    log::debug!("Ignoring echo of our own action {:?}", action.code);
                } else {
                    state.enqueue(action);
                }
            }
            other => log::debug!("Ignoring peer-bound {:?}", other.opcode()),
        }
    }
}

impl PacketHandler for PeerRole {
    fn on_message(&self, message: Message, from: SocketAddr) {
        {
            let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
            if from != host.addr() {
                log::debug!("Ignoring {:?} from stranger {}", message.opcode(), from);
                return;
            }
            host.see();
        }

        match message {
            Message::VersionRejected { required_version } => {
                log::error!(
                    "Host requires protocol version {} (we speak {}), please upgrade",
                    required_version,
                    self.config.protocol_version
                );
                self.set_status(PeerStatus::Rejected { required_version });
            }
            Message::FullSync { state, assigned_id } => match SimulationState::from_bytes(&state) {
                Ok(state) => {
                    log::info!("Full sync at tick {}, playing as {}", state.tick(), assigned_id);
                    *self.session() = Some(Session {
                        state,
                        player: assigned_id,
                    });
                    self.set_status(PeerStatus::InGame);
                }
                Err(e) => log::warn!("Discarding undecodable full sync: {}", e),
            },
            Message::HostQuitting => {
                log::info!("Host has ended the game");
                self.set_status(PeerStatus::HostQuit);
            }
            Message::KeepAlive => {}
            other => self.apply_update(other),
        }
    }

    fn on_liveness_check(&self) {
        match self.status() {
            PeerStatus::Connecting => {
                log::info!("No answer from {} yet, retrying", self.host_addr());
                if let Err(e) = self.send_connect() {
                    log::warn!("Failed to resend connect: {}", e);
                }
            }
            PeerStatus::InGame => self.send(&Message::KeepAlive),
            PeerStatus::Rejected { .. } | PeerStatus::HostQuit => {}
        }
        if self.server_timeout() {
            log::warn!("Host {} unresponsive", self.host_addr());
        }
    }
}

impl TickDriver for PeerRole {
    fn waiting_on_peer(&self) -> bool {
        self.server_timeout()
    }

    fn tick(&self) {
        if let Some(session) = self.session().as_mut() {
            session.state.advance();
        }
    }
}
