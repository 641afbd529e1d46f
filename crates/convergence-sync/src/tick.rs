//! The tick loop: applies lifecycle and game inputs, runs the scheduler's
//! ordered phases under the determinism guard, and records the resulting
//! state hash.
//!
//! Sim-time is derived from the tick counter rather than accumulated, to
//! avoid float drift across thousands of ticks, and per-tick diagnostics
//! are collected alongside it. Lifecycle inputs apply before game inputs
//! each tick, ahead of the ordered phase run.

use std::collections::BTreeMap;
use std::time::Instant;

use convergence_ecs::entity::EntityId;
use convergence_ecs::scheduler::{Phase, Scheduler};
pub use convergence_ecs::scheduler::TickContext;
use convergence_ecs::world::World;
use convergence_math::{Fixed, Rng};
use convergence_snapshot::hash::state_hash;

use crate::error::SyncError;
use crate::guard::DeterminismGuard;
use crate::input_log::{LifecycleKind, Payload};

/// Per-tick timing diagnostics, collected for external interpolation/
/// debugging.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    pub frame: u32,
    pub lifecycle_events_applied: usize,
    pub game_inputs_applied: usize,
    /// Wall-clock time spent running the tick, for ops dashboards only.
    /// Measured outside the `is_simulating` window, never read by any
    /// system, and never folded into `World` state or the tick's hash.
    pub wall_clock: std::time::Duration,
}

pub struct TickLoop {
    pub world: World,
    pub scheduler: Scheduler,
    pub rng: Rng,
    pub guard: DeterminismGuard,
    fixed_dt: Fixed,
    tick_counter: u32,
    is_server: bool,
    current_inputs: BTreeMap<String, serde_json::Value>,
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    pub fn new(is_server: bool, fixed_dt: Fixed, rng_seed: u32) -> TickLoop {
        TickLoop {
            world: World::new(),
            scheduler: Scheduler::new(is_server),
            rng: Rng::new(rng_seed),
            guard: DeterminismGuard::new(),
            fixed_dt,
            tick_counter: 0,
            is_server,
            current_inputs: BTreeMap::new(),
            last_diagnostics: TickDiagnostics::default(),
        }
    }

    /// `sim_time = tick_count * fixed_dt`, never accumulated, so it can
    /// never drift even after a huge number of ticks.
    pub fn sim_time(&self) -> Fixed {
        Fixed::to_fixed(self.tick_counter as f64).mul(self.fixed_dt)
    }

    pub fn tick_counter(&self) -> u32 {
        self.tick_counter
    }

    pub fn current_input(&self, client_id: &str) -> Option<&serde_json::Value> {
        self.current_inputs.get(client_id)
    }

    /// Runs a full tick for `frame`: lifecycle inputs, game inputs, the
    /// ordered phases, and (client-only) render. Returns the post-tick
    /// state hash.
    pub fn tick(
        &mut self,
        frame: u32,
        inputs: &BTreeMap<String, Payload>,
        mut on_lifecycle: impl FnMut(&mut World, &str, &LifecycleKind),
    ) -> Result<u32, SyncError> {
        let started_at = Instant::now();
        let mut diagnostics = TickDiagnostics {
            frame,
            ..Default::default()
        };

        // Step 1: lifecycle inputs, ascending client_id (BTreeMap order).
        for (client_id, payload) in inputs {
            if let Payload::Lifecycle { kind, .. } = payload {
                on_lifecycle(&mut self.world, client_id, kind);
                diagnostics.lifecycle_events_applied += 1;
            }
        }

        // Step 2: game inputs into the registry systems read from.
        self.current_inputs.clear();
        for (client_id, payload) in inputs {
            if let Payload::Command(value) = payload {
                self.current_inputs.insert(client_id.clone(), value.clone());
                diagnostics.game_inputs_applied += 1;
            }
        }

        // Step 3: run phases under the determinism guard.
        self.guard.enter_simulation();
        let mut ctx = TickContext {
            frame,
            rng: &mut self.rng,
            sim_time: Fixed::to_fixed(self.tick_counter as f64).mul(self.fixed_dt),
            dt: self.fixed_dt,
            current_inputs: &self.current_inputs,
        };
        let result = self
            .scheduler
            .run_all_phases(&mut self.world, &mut ctx, false)
            .map_err(SyncError::from);
        self.guard.exit_simulation();
        result?;

        // Step 4: client-only render.
        if !self.is_server {
            let render_sim_time = self.sim_time();
            let mut ctx = TickContext {
                frame,
                rng: &mut self.rng,
                sim_time: render_sim_time,
                dt: self.fixed_dt,
                current_inputs: &self.current_inputs,
            };
            self.scheduler
                .run_phase(Phase::Render, &mut self.world, &mut ctx)
                .map_err(SyncError::from)?;
        }

        // Wall-clock duration is read for ops telemetry only, after
        // `exit_simulation`, so this never touches the host clock while a
        // tick is in flight. `guard_wall_clock` is a no-op whenever
        // `is_simulating()` is false, which is always true at this point;
        // it only ever warns if a future refactor moves this read earlier.
        diagnostics.wall_clock = started_at.elapsed();
        self.guard.guard_wall_clock();

        self.tick_counter += 1;
        self.current_inputs.clear();
        self.last_diagnostics = diagnostics;
        Ok(state_hash(&self.world))
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    pub fn set_input_cache(&mut self, id: EntityId, value: i32) {
        self.world.set_input_cache(id, value);
    }
}
