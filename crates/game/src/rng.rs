//! Random streams.
//!
//! Gameplay randomness is re-derived every tick from the level seed and the
//! tick number, so two peers holding the same seed draw the same values no
//! matter when they joined. Cosmetic randomness comes from an unrelated stream
//! and must never feed simulation state.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

const TICK_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone)]
pub struct GameRng {
    inner: Pcg32,
}

impl GameRng {
    pub fn for_tick(seed: u64, tick: u64) -> Self {
        let mixed = seed ^ tick.wrapping_add(1).wrapping_mul(TICK_MIX);
        Self {
            inner: Pcg32::seed_from_u64(mixed),
        }
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.inner.random::<f64>()
    }

    pub fn range(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.unit()
    }

    pub fn angle(&mut self) -> f64 {
        self.range(0.0, std::f64::consts::TAU)
    }

    pub fn below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.inner.random_range(0..bound)
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.unit() < probability
    }
}

/// Visual-only stream; seeded from OS entropy so it differs per process.
#[derive(Debug, Clone)]
pub struct CosmeticRng {
    inner: Pcg32,
}

impl Default for CosmeticRng {
    fn default() -> Self {
        Self::new()
    }
}

impl CosmeticRng {
    pub fn new() -> Self {
        Self {
            inner: Pcg32::from_rng(&mut rand::rng()),
        }
    }

    pub fn jitter(&mut self, amplitude: f64) -> f64 {
        self.inner.random_range(-1.0..=1.0) * amplitude
    }
}
