use std::time::Duration;

use serde::Deserialize;

use crate::level::Level;
use crate::net::{ChannelConfig, DEFAULT_PORT, MAX_PACKET_SIZE, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};

pub const DEFAULT_INPUT_DELAY: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelChoice {
    Skirmish,
    Waves,
}

impl LevelChoice {
    pub fn build(self, seed: u64) -> Level {
        match self {
            Self::Skirmish => Level::skirmish(seed),
            Self::Waves => Level::waves(seed),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub bind: String,
    pub port: u16,
    pub name: String,
    pub max_peers: usize,
    pub min_protocol_version: i32,
    /// Ticks between an input event and the tick it takes effect.
    pub input_delay: u64,
    pub tick_period_ms: u64,
    pub peer_timeout_ms: u64,
    pub liveness_interval_ms: u64,
    pub fragment_ttl_ms: u64,
    pub max_packet_size: usize,
    /// Ticks between ship position broadcasts; zero disables them.
    pub position_sync_interval: u64,
    pub level: LevelChoice,
    pub seed: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            name: "host".to_string(),
            max_peers: 8,
            min_protocol_version: MIN_PROTOCOL_VERSION,
            input_delay: DEFAULT_INPUT_DELAY,
            tick_period_ms: 10,
            peer_timeout_ms: 15_000,
            liveness_interval_ms: 5_000,
            fragment_ttl_ms: 10_000,
            max_packet_size: MAX_PACKET_SIZE,
            position_sync_interval: 100,
            level: LevelChoice::Skirmish,
            seed: None,
        }
    }
}

impl HostConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_packet_size: self.max_packet_size,
            liveness_interval: Duration::from_millis(self.liveness_interval_ms),
            fragment_ttl: Duration::from_millis(self.fragment_ttl_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub bind: String,
    pub name: String,
    pub protocol_version: i32,
    pub input_delay: u64,
    pub tick_period_ms: u64,
    pub host_timeout_ms: u64,
    pub liveness_interval_ms: u64,
    pub fragment_ttl_ms: u64,
    pub max_packet_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            name: "player".to_string(),
            protocol_version: PROTOCOL_VERSION,
            input_delay: DEFAULT_INPUT_DELAY,
            tick_period_ms: 10,
            host_timeout_ms: 15_000,
            liveness_interval_ms: 5_000,
            fragment_ttl_ms: 10_000,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl PeerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_millis(self.host_timeout_ms)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_packet_size: self.max_packet_size,
            liveness_interval: Duration::from_millis(self.liveness_interval_ms),
            fragment_ttl: Duration::from_millis(self.fragment_ttl_ms),
        }
    }
}
