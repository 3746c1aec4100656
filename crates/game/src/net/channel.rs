use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::fragment::{DEFAULT_FRAGMENT_TTL, FragmentBuffer, split_payload};
use super::protocol::{MAX_PACKET_SIZE, Message, Packet};
use super::stats::{NetworkStats, StatsCounters};

pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5);
/// How long a blocked receive waits before re-checking the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_DATAGRAM: usize = 65_536;

/// Receives what a channel decodes. Implemented by the host and peer roles.
pub trait PacketHandler: Send + Sync + 'static {
    fn on_message(&self, message: Message, from: SocketAddr);

    /// Called from the liveness thread every liveness interval.
    fn on_liveness_check(&self) {}
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub max_packet_size: usize,
    pub liveness_interval: Duration,
    pub fragment_ttl: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            fragment_ttl: DEFAULT_FRAGMENT_TTL,
        }
    }
}

/// One UDP socket plus its receive and liveness loops.
pub struct DatagramChannel {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: ChannelConfig,
    fragments: Mutex<FragmentBuffer>,
    next_series: AtomicI32,
    stats: StatsCounters,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DatagramChannel {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: ChannelConfig) -> io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;

        Ok(Arc::new(Self {
            socket,
            local_addr,
            fragments: Mutex::new(FragmentBuffer::new(config.fragment_ttl)),
            config,
            next_series: AtomicI32::new(1),
            stats: StatsCounters::default(),
            running: AtomicBool::new(true),
            threads: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sends one message, fragmenting it when it exceeds the packet limit.
    /// Returns the number of bytes put on the wire.
    pub fn send_to(&self, message: &Message, addr: SocketAddr) -> io::Result<usize> {
        self.send_payload(&message.encode(), addr)
    }

    pub fn send_payload(&self, payload: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if payload.len() <= self.config.max_packet_size {
            return self.send_raw(payload, addr);
        }

        let series_id = self.next_series.fetch_add(1, Ordering::Relaxed);
        let packets = split_payload(series_id, payload, self.config.max_packet_size)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        log::debug!(
            "Fragmenting {} bytes into {} packets (series {}) for {}",
            payload.len(),
            packets.len(),
            series_id,
            addr
        );

        let mut total = 0;
        for packet in &packets {
            total += self.send_raw(packet, addr)?;
            self.stats.fragment_sent();
        }
        Ok(total)
    }

    pub fn send_raw(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let sent = self.socket.send_to(bytes, addr)?;
        self.stats.sent(sent);
        Ok(sent)
    }

    /// Fire-and-forget send to several recipients; failures are only logged.
    pub fn broadcast(&self, message: &Message, addrs: &[SocketAddr]) {
        if addrs.is_empty() {
            return;
        }
        let payload = message.encode();
        for &addr in addrs {
            if let Err(e) = self.send_payload(&payload, addr) {
                log::warn!("Failed to send {:?} to {}: {}", message.opcode(), addr, e);
            }
        }
    }

    /// Waits up to the poll interval for one datagram. Returns `Ok(None)` on
    /// timeout, for malformed packets and for fragments of unfinished series.
    pub fn receive(&self) -> io::Result<Option<(Message, SocketAddr)>> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buffer) {
            Ok((size, from)) => {
                self.stats.received(size);
                Ok(self.process(&buffer[..size], from).map(|message| (message, from)))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn process(&self, bytes: &[u8], from: SocketAddr) -> Option<Message> {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed();
                log::warn!("Discarding malformed packet from {}: {}", from, e);
                return None;
            }
        };

        match packet {
            Packet::Message(message) => Some(message),
            Packet::Fragment { header, data } => {
                let merged = self
                    .fragments
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .accept(from, header, data);
                match merged {
                    Ok(Some(payload)) => {
                        self.stats.reassembled();
                        match Message::decode(&payload) {
                            Ok(message) => Some(message),
                            Err(e) => {
                                self.stats.malformed();
                                log::warn!(
                                    "Discarding malformed reassembled message from {}: {}",
                                    from,
                                    e
                                );
                                None
                            }
                        }
                    }
                    Ok(None) => None,
                    Err(e) => {
                        self.stats.malformed();
                        log::warn!("Discarding bad fragment from {}: {}", from, e);
                        None
                    }
                }
            }
        }
    }

    pub fn pending_series(&self) -> usize {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn collect_garbage(&self) -> usize {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .collect_garbage()
    }

    /// Spawns the receive and liveness threads, both dispatching to `handler`.
    pub fn start<H: PacketHandler>(self: &Arc<Self>, handler: Arc<H>) -> io::Result<()> {
        let receiver = {
            let channel = Arc::clone(self);
            let handler = Arc::clone(&handler);
            thread::Builder::new()
                .name(format!("recv-{}", self.local_addr.port()))
                .spawn(move || channel.receive_loop(handler.as_ref()))?
        };
        let liveness = {
            let channel = Arc::clone(self);
            thread::Builder::new()
                .name(format!("liveness-{}", self.local_addr.port()))
                .spawn(move || channel.liveness_loop(handler.as_ref()))?
        };

        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        threads.push(receiver);
        threads.push(liveness);
        Ok(())
    }

    fn receive_loop<H: PacketHandler>(&self, handler: &H) {
        log::debug!("Receive loop started on {}", self.local_addr);
        while self.is_running() {
            match self.receive() {
                Ok(Some((message, from))) => handler.on_message(message, from),
                Ok(None) => {}
                Err(e) => {
                    if self.is_running() {
                        log::warn!("Receive error on {}: {}", self.local_addr, e);
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        }
        log::debug!("Receive loop on {} stopped", self.local_addr);
    }

    fn liveness_loop<H: PacketHandler>(&self, handler: &H) {
        let mut next = Instant::now() + self.config.liveness_interval;
        while self.is_running() {
            thread::sleep(POLL_INTERVAL.min(self.config.liveness_interval));
            if Instant::now() < next || !self.is_running() {
                continue;
            }
            next += self.config.liveness_interval;
            let dropped = self.collect_garbage();
            if dropped > 0 {
                log::debug!("Dropped {} stale fragment series", dropped);
            }
            handler.on_liveness_check();
        }
    }

    /// Stops both loops and waits for them. Safe to call from a handler.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let threads: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("Channel thread on {} panicked", self.local_addr);
            }
        }
        log::info!("Channel on {} closed", self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionCode;

    fn loopback() -> Arc<DatagramChannel> {
        DatagramChannel::bind("127.0.0.1:0", ChannelConfig::default()).unwrap()
    }

    fn receive_one(channel: &DatagramChannel) -> (Message, SocketAddr) {
        for _ in 0..40 {
            if let Some(received) = channel.receive().unwrap() {
                return received;
            }
        }
        panic!("nothing received on {}", channel.local_addr());
    }

    #[test]
    fn small_message_goes_out_whole() {
        let a = loopback();
        let b = loopback();
        let message = Message::Keystroke {
            code: ActionCode::FireDown,
        };
        let sent = a.send_to(&message, b.local_addr()).unwrap();
        assert_eq!(sent, 8);

        let (received, from) = receive_one(&b);
        assert_eq!(received, message);
        assert_eq!(from, a.local_addr());
        assert_eq!(a.stats().fragments_sent, 0);
    }

    #[test]
    fn large_message_is_fragmented_and_reassembled() {
        let a = loopback();
        let b = loopback();
        let message = Message::FullSync {
            state: (0..5000u32).map(|i| (i % 251) as u8).collect(),
            assigned_id: crate::entity::EntityId(3),
        };
        a.send_to(&message, b.local_addr()).unwrap();
        assert_eq!(a.stats().fragments_sent, 5);

        let (received, _) = receive_one(&b);
        assert_eq!(received, message);
        assert_eq!(b.stats().messages_reassembled, 1);
        assert_eq!(b.pending_series(), 0);
    }

    #[test]
    fn malformed_datagram_is_counted_and_skipped() {
        let a = loopback();
        let b = loopback();
        a.send_raw(&[0, 0, 0, 99, 1], b.local_addr()).unwrap();
        a.send_to(&Message::Quit, b.local_addr()).unwrap();

        let (received, _) = receive_one(&b);
        assert_eq!(received, Message::Quit);
        assert_eq!(b.stats().malformed_packets, 1);
    }

    #[test]
    fn receive_times_out_quietly() {
        let a = loopback();
        assert!(a.receive().unwrap().is_none());
    }
}
