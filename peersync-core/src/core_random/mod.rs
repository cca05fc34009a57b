/*!
    Deterministic random number generation

    A linear congruential generator whose output depends only on its seed.
    Every peer that reconstructs `DeterministicRandom::new(seed)` observes
    the same sequence, so random outcomes of an action never have to be sent
    over the wire, only the seed.

    Constants are the classic Numerical Recipes parameters (m = 2^32).
    All arithmetic is integer until the final division, which keeps results
    bit-identical across platforms.
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MODULUS: u64 = 1 << 32;
const MULTIPLIER: u64 = 1_664_525;
const INCREMENT: u64 = 1_013_904_223;

/// Seed used for the setup routine, identical on every peer
pub const SETUP_SEED: u64 = 12_345;

/// Result type for random helpers
pub type RandomResult<T> = Result<T, RandomError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RandomError {
    #[error("Cannot choose from an empty sequence")]
    EmptyChoice,
}

/// Seeded pseudo-random generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRandom {
    seed: u64,
    state: u64,
}

impl DeterministicRandom {
    pub fn new(seed: u64) -> Self {
        Self { seed, state: seed % MODULUS }
    }

    /// The seed this generator was built from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Next float in [0, 1)
    pub fn next(&mut self) -> f64 {
        self.state = (MULTIPLIER * self.state + INCREMENT) % MODULUS;
        self.state as f64 / MODULUS as f64
    }

    /// Integer in [min, max). Returns `min` when the range is empty.
    pub fn range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = (max - min) as f64;
        min + (self.next() * span).floor() as i64
    }

    /// Float in [min, max)
    pub fn float(&mut self, min: f64, max: f64) -> f64 {
        min + self.next() * (max - min)
    }

    /// Uniformly pick one element
    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> RandomResult<&'a T> {
        if items.is_empty() {
            return Err(RandomError::EmptyChoice);
        }
        let index = (self.next() * items.len() as f64).floor() as usize;
        Ok(&items[index.min(items.len() - 1)])
    }

    /// Fisher-Yates shuffle into a new vector; `items` is left untouched
    pub fn shuffle<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        let mut out = items.to_vec();
        for i in (1..out.len()).rev() {
            let j = (self.next() * (i + 1) as f64).floor() as usize;
            out.swap(i, j.min(i));
        }
        out
    }

    /// `true` with probability `p`
    pub fn boolean(&mut self, p: f64) -> bool {
        self.next() < p
    }
}
