//! Phase-ordered system scheduler.
//!
//! Deterministic execution order, no hidden state between systems:
//! a closed phase set, with systems inside a phase ordered by
//! `(order, registration_id)` rather than a dependency graph.

use std::collections::BTreeMap;

use crate::error::EcsError;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Input,
    Update,
    PrePhysics,
    Physics,
    PostPhysics,
    Render,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Input,
        Phase::Update,
        Phase::PrePhysics,
        Phase::Physics,
        Phase::PostPhysics,
        Phase::Render,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Input => "input",
            Phase::Update => "update",
            Phase::PrePhysics => "prePhysics",
            Phase::Physics => "physics",
            Phase::PostPhysics => "postPhysics",
            Phase::Render => "render",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Client,
    Server,
    Both,
}

impl Scope {
    fn runs_on(self, is_server: bool) -> bool {
        match self {
            Scope::Both => true,
            Scope::Client => !is_server,
            Scope::Server => is_server,
        }
    }
}

/// Context passed to every system: the only legal door to
/// determinism-sensitive primitives (random draws, derived tick time), and
/// the per-tick game-input values this phase's systems should consume
/// (keyed by client id, cleared again once the tick finishes).
pub struct TickContext<'a> {
    pub frame: u32,
    pub rng: &'a mut convergence_math::Rng,
    pub sim_time: convergence_math::Fixed,
    pub dt: convergence_math::Fixed,
    pub current_inputs: &'a BTreeMap<String, serde_json::Value>,
}

pub type SystemFn = Box<dyn FnMut(&mut World, &mut TickContext) -> Result<(), EcsError>>;

struct RegisteredSystem {
    name: String,
    phase: Phase,
    order: i32,
    registration_id: u64,
    scope: Scope,
    func: SystemFn,
}

pub struct Scheduler {
    systems: Vec<RegisteredSystem>,
    next_registration_id: u64,
    is_server: bool,
}

impl Scheduler {
    pub fn new(is_server: bool) -> Scheduler {
        Scheduler {
            systems: Vec::new(),
            next_registration_id: 0,
            is_server,
        }
    }

    pub fn add_system<F>(&mut self, name: &str, phase: Phase, order: i32, scope: Scope, func: F)
    where
        F: FnMut(&mut World, &mut TickContext) -> Result<(), EcsError> + 'static,
    {
        debug_assert!(
            !(self.is_server && phase == Phase::Render),
            "render systems must not be registered server-side"
        );
        let registration_id = self.next_registration_id;
        self.next_registration_id += 1;
        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            phase,
            order,
            registration_id,
            scope,
            func: Box::new(func),
        });
    }

    /// Indices into `self.systems` matching `phase`, sorted by
    /// `(order, registration_id)`. Indices rather than references, so call
    /// sites can re-borrow `self.systems[i]` mutably one at a time without
    /// holding an immutable borrow of `self` across the call.
    fn systems_for_phase(&self, phase: Phase) -> Vec<usize> {
        let mut matched: Vec<usize> = self
            .systems
            .iter()
            .enumerate()
            .filter(|(_, s)| s.phase == phase && s.scope.runs_on(self.is_server))
            .map(|(i, _)| i)
            .collect();
        matched.sort_by_key(|&i| (self.systems[i].order, self.systems[i].registration_id));
        matched
    }

    /// Runs a single phase. Returns `Err` and aborts remaining phases of
    /// the tick on the first system error.
    pub fn run_phase(
        &mut self,
        phase: Phase,
        world: &mut World,
        ctx: &mut TickContext,
    ) -> Result<(), EcsError> {
        if phase == Phase::Render && self.is_server {
            return Ok(());
        }
        for i in self.systems_for_phase(phase) {
            let system = &mut self.systems[i];
            (system.func)(world, ctx).map_err(|e| {
                tracing::error!(system = %system.name, phase = phase.name(), error = %e, "system failed, aborting tick");
                e
            })?;
        }
        Ok(())
    }

    pub fn run_all_phases(
        &mut self,
        world: &mut World,
        ctx: &mut TickContext,
        include_render: bool,
    ) -> Result<(), EcsError> {
        for phase in Phase::ALL {
            if phase == Phase::Render && !include_render {
                continue;
            }
            self.run_phase(phase, world, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static ORDER_LOG: AtomicU32 = AtomicU32::new(0);

    fn record_1(_: &mut World, _: &mut TickContext) -> Result<(), EcsError> {
        ORDER_LOG.store(ORDER_LOG.load(Ordering::SeqCst) * 10 + 1, Ordering::SeqCst);
        Ok(())
    }
    fn record_2(_: &mut World, _: &mut TickContext) -> Result<(), EcsError> {
        ORDER_LOG.store(ORDER_LOG.load(Ordering::SeqCst) * 10 + 2, Ordering::SeqCst);
        Ok(())
    }
    fn failing(_: &mut World, _: &mut TickContext) -> Result<(), EcsError> {
        Err(EcsError::AsyncSystemDetected { phase: "update".into() })
    }

    fn ctx<'a>(rng: &'a mut convergence_math::Rng, inputs: &'a BTreeMap<String, serde_json::Value>) -> TickContext<'a> {
        TickContext {
            frame: 0,
            rng,
            sim_time: convergence_math::Fixed::ZERO,
            dt: convergence_math::Fixed::ZERO,
            current_inputs: inputs,
        }
    }

    #[test]
    fn systems_run_in_order_then_registration_id_within_a_phase() {
        ORDER_LOG.store(0, Ordering::SeqCst);
        let mut scheduler = Scheduler::new(false);
        scheduler.add_system("b", Phase::Update, 1, Scope::Both, record_2);
        scheduler.add_system("a", Phase::Update, 0, Scope::Both, record_1);
        let mut world = World::new();
        let mut rng = convergence_math::Rng::new(1);
        let inputs = BTreeMap::new();
        scheduler.run_phase(Phase::Update, &mut world, &mut ctx(&mut rng, &inputs)).unwrap();
        assert_eq!(ORDER_LOG.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn equal_order_breaks_tie_by_registration_id() {
        ORDER_LOG.store(0, Ordering::SeqCst);
        let mut scheduler = Scheduler::new(false);
        scheduler.add_system("first", Phase::Update, 0, Scope::Both, record_1);
        scheduler.add_system("second", Phase::Update, 0, Scope::Both, record_2);
        let mut world = World::new();
        let mut rng = convergence_math::Rng::new(1);
        let inputs = BTreeMap::new();
        scheduler.run_phase(Phase::Update, &mut world, &mut ctx(&mut rng, &inputs)).unwrap();
        assert_eq!(ORDER_LOG.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn failing_system_aborts_remaining_phases() {
        let mut scheduler = Scheduler::new(false);
        scheduler.add_system("boom", Phase::Update, 0, Scope::Both, failing);
        let mut world = World::new();
        let mut rng = convergence_math::Rng::new(1);
        let inputs = BTreeMap::new();
        let result = scheduler.run_all_phases(&mut world, &mut ctx(&mut rng, &inputs), false);
        assert!(result.is_err());
    }

    #[test]
    fn server_scope_systems_are_skipped_in_client_mode_scheduler() {
        ORDER_LOG.store(0, Ordering::SeqCst);
        let mut scheduler = Scheduler::new(false);
        scheduler.add_system("server-only", Phase::Update, 0, Scope::Server, record_1);
        let mut world = World::new();
        let mut rng = convergence_math::Rng::new(1);
        let inputs = BTreeMap::new();
        scheduler.run_phase(Phase::Update, &mut world, &mut ctx(&mut rng, &inputs)).unwrap();
        assert_eq!(ORDER_LOG.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn render_phase_never_runs_on_server() {
        ORDER_LOG.store(0, Ordering::SeqCst);
        let mut scheduler = Scheduler::new(true);
        let mut world = World::new();
        let mut rng = convergence_math::Rng::new(1);
        let inputs = BTreeMap::new();
        scheduler.run_phase(Phase::Render, &mut world, &mut ctx(&mut rng, &inputs)).unwrap();
        assert_eq!(ORDER_LOG.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_system_can_read_current_inputs_mid_phase() {
        static SEEN: AtomicU32 = AtomicU32::new(0);
        SEEN.store(0, Ordering::SeqCst);
        let mut scheduler = Scheduler::new(true);
        scheduler.add_system("reads-input", Phase::Input, 0, Scope::Both, |_, ctx| {
            if let Some(value) = ctx.current_inputs.get("alice").and_then(|v| v.as_u64()) {
                SEEN.store(value as u32, Ordering::SeqCst);
            }
            Ok(())
        });
        let mut world = World::new();
        let mut rng = convergence_math::Rng::new(1);
        let mut inputs = BTreeMap::new();
        inputs.insert("alice".to_string(), serde_json::json!(7));
        scheduler.run_phase(Phase::Input, &mut world, &mut ctx(&mut rng, &inputs)).unwrap();
        assert_eq!(SEEN.load(Ordering::SeqCst), 7);
    }
}
