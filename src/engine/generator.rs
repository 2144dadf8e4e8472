//! Geometric Brownian price generator
//!
//! One step of the walk:
//!
//! ```text
//! base ← base · exp((μ − σ²/2)·dt + σ·ε·√dt),  ε ~ N(0, 1)
//! ```
//!
//! The generator is single-producer: the tick loop is the only caller, so no
//! locking is needed and the PRNG never leaves it.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// Drift coefficient
const MU: f64 = 2e-4;
/// Volatility coefficient
const SIGMA: f64 = 1e-2;
/// Time step per tick
const DT: f64 = 0.1;

/// Seeded geometric Brownian walk over a single price
pub struct GbmGenerator {
    base_price: f64,
    rng: ChaCha8Rng,
}

impl GbmGenerator {
    /// Create a generator with a fixed seed; the produced sequence is fully
    /// determined by `(base_price, seed)`
    pub fn new(base_price: f64, seed: u64) -> Self {
        Self {
            base_price,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Create a generator seeded from OS entropy
    pub fn from_entropy(base_price: f64) -> Self {
        Self {
            base_price,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Last generated price (or the initial base price)
    pub fn current(&self) -> f64 {
        self.base_price
    }

    /// Advance the walk one step and return the new price
    pub fn step(&mut self) -> f64 {
        let epsilon: f64 = self.rng.sample(StandardNormal);
        let exponent = (MU - 0.5 * SIGMA * SIGMA) * DT + SIGMA * epsilon * DT.sqrt();
        self.base_price *= exponent.exp();
        self.base_price
    }
}
