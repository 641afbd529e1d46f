//! Deterministic xorshift32 RNG. Never use `rand` inside a tick: this is
//! the only legal source of randomness for simulation code, so two peers
//! that seed and draw identically always agree.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Rng {
        Rng {
            state: if seed == 0 { 0x9E3779B9 } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Draws a [`Fixed`] in `[0, 1)`.
    pub fn next_fixed(&mut self) -> Fixed {
        let raw = (self.next_u32() >> 16) as i32;
        Fixed::from_raw(raw)
    }

    /// Draws a [`Fixed`] uniformly in `[lo, hi)`.
    pub fn next_fixed_range(&mut self, lo: Fixed, hi: Fixed) -> Fixed {
        let span = hi - lo;
        lo + self.next_fixed().mul(span)
    }

    /// Draws an index in `[0, n)`, used for reliability-weighted sampling.
    pub fn next_index(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.next_u32() as usize) % n
    }

    pub fn save(&self) -> u32 {
        self.state
    }

    pub fn load(&mut self, state: u32) {
        self.state = if state == 0 { 0x9E3779B9 } else { state };
    }
}

/// Seeds a partition-assignment RNG from `(frame, partition_id)` as spec'd
/// by the partition assigner: deterministic given identical inputs on
/// every peer.
pub fn seed_from_frame_partition(frame: u32, partition_id: u32) -> u32 {
    let mut h = frame ^ partition_id.wrapping_mul(0x85EBCA6B);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EBCA6B);
    h ^= h >> 13;
    h = h.wrapping_mul(0xC2B2AE35);
    h ^= h >> 16;
    h
}
