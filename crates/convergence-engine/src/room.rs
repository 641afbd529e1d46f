//! `Room`: the top-level type wiring the ECS, snapshot, sync, and physics
//! layers together behind one crate.

use std::cell::RefCell;
use std::rc::Rc;

use convergence_ecs::entity::EntityId;
use convergence_ecs::error::EcsError;
use convergence_ecs::registry::EntityDefinition;
use convergence_ecs::scheduler::{Phase, Scope, TickContext};
use convergence_ecs::world::World;
use convergence_math::Fixed;
use convergence_physics::prelude::{
    register as register_physics, wake_on_restore, CollisionCallback, PhysicsStepper, BODY_COMPONENT, TRANSFORM_COMPONENT,
};
use convergence_sync::prelude::{Broker, BrokerEvent, InputRecord, Orchestrator, SyncError};

pub const PLAYER_TYPE: &str = "player";
pub const PROP_TYPE: &str = "prop";

/// `Orchestrator::with_room_create_hook` callback: registers the physics
/// components and the entity types this engine spawns. Idempotent, so it
/// is safe to call both eagerly (to prime a freshly constructed `Room`)
/// and again whenever the first-joiner connect path clears the world.
fn register_room_schema(world: &mut World) {
    register_physics(world).expect("physics component registration is idempotent");
    world.register_definition(EntityDefinition {
        type_name: PLAYER_TYPE.to_string(),
        components: vec![TRANSFORM_COMPONENT.to_string(), BODY_COMPONENT.to_string()],
        sync_fields: None,
        on_restore: Some(wake_on_restore),
    });
    world.register_definition(EntityDefinition {
        type_name: PROP_TYPE.to_string(),
        components: vec![TRANSFORM_COMPONENT.to_string(), BODY_COMPONENT.to_string()],
        sync_fields: None,
        on_restore: Some(wake_on_restore),
    });
}

/// `Phase::Input` system: reads each client's buffered command (a JSON
/// object with `vx`/`vy` in world units per second) off `ctx.current_inputs`
/// and writes it onto that client's player body, so `Phase::Physics`
/// integrates movement the client actually asked for this tick. Clients
/// with no buffered command, or no player entity yet, are left untouched.
fn apply_player_movement_input(world: &mut World, ctx: &mut TickContext) -> Result<(), EcsError> {
    for (client_id, value) in ctx.current_inputs.iter() {
        let Some(id) = world.entity_of_client(client_id) else {
            continue;
        };
        let Some(store) = world.components.store_by_name_mut(BODY_COMPONENT) else {
            continue;
        };
        if !store.has(id.index()) {
            continue;
        }
        if let Some(vx) = value.get("vx").and_then(|v| v.as_f64()) {
            store.set_fixed("vx", id.index(), Fixed::to_fixed(vx));
        }
        if let Some(vy) = value.get("vy").and_then(|v| v.as_f64()) {
            store.set_fixed("vy", id.index(), Fixed::to_fixed(vy));
        }
    }
    Ok(())
}

/// A single game room: an `Orchestrator` over transport `B`. Movement and
/// collision resolution are registered into the `Physics` phase as a
/// closure capturing `physics`, so they run on every tick path the
/// orchestrator drives — live ticks, catchup, and resync replay alike —
/// rather than only the ones a host remembers to wrap. `physics` is the
/// same stepper the scheduled system steps, shared through an
/// `Rc<RefCell<_>>` so callbacks registered through [`Self::on_collision`]
/// actually fire on the scheduled path rather than on a throwaway stepper.
pub struct Room<B: Broker> {
    pub orchestrator: Orchestrator<B>,
    physics: Rc<RefCell<PhysicsStepper>>,
}

impl<B: Broker> Room<B> {
    pub fn new(room_id: &str, is_server: bool, fixed_dt: Fixed, rng_seed: u32, broker: B) -> Room<B> {
        let mut orchestrator =
            Orchestrator::new(room_id, is_server, fixed_dt, rng_seed, broker).with_room_create_hook(register_room_schema);
        register_room_schema(&mut orchestrator.tick_loop.world);
        orchestrator.tick_loop.scheduler.add_system(
            "apply_player_movement_input",
            Phase::Input,
            0,
            Scope::Both,
            apply_player_movement_input,
        );
        let physics = Rc::new(RefCell::new(PhysicsStepper::new()));
        let physics_for_system = Rc::clone(&physics);
        orchestrator.tick_loop.scheduler.add_system("physics_step", Phase::Physics, 0, Scope::Both, move |world, ctx| {
            physics_for_system.borrow().step(world, ctx.dt);
            Ok(())
        });
        Room { orchestrator, physics }
    }

    /// Registers a collision callback for an unordered entity-type pair on
    /// the stepper the scheduler actually runs.
    pub fn on_collision(&mut self, type_a: &str, type_b: &str, callback: CollisionCallback) {
        self.physics.borrow_mut().on_collision(type_a, type_b, callback);
    }

    pub fn connect(&mut self, local_client_id: Option<String>) -> Result<(), SyncError> {
        self.orchestrator.connect(local_client_id)
    }

    pub fn world(&self) -> &World {
        &self.orchestrator.tick_loop.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.orchestrator.tick_loop.world
    }

    /// Spawns a client-bound player entity at rest at the origin.
    pub fn spawn_player(&mut self, client_id: &str) -> Result<EntityId, EcsError> {
        self.world_mut().spawn(PLAYER_TYPE, Some(client_id.to_string()), false, &[])
    }

    /// Spawns an un-bound physics prop, used for synthetic background load
    /// in delta-size tests.
    pub fn spawn_prop(&mut self) -> Result<EntityId, EcsError> {
        self.world_mut().spawn(PROP_TYPE, None, false, &[])
    }

    /// Runs one server tick. Physics runs inside this call as part of the
    /// scheduler's `Physics` phase, so it is already reflected in the world
    /// by the time the orchestrator computes and broadcasts `frame`'s state
    /// hash.
    pub fn tick_server(&mut self, frame: u32, inputs: Vec<InputRecord>, majority_hash: Option<u32>) -> Result<(), SyncError> {
        self.orchestrator.process_server_tick(frame, inputs, majority_hash)
    }

    /// Dispatches a broker event, routing `OnTick` through [`Self::tick_server`].
    pub fn handle_event(&mut self, event: BrokerEvent) -> Result<(), SyncError> {
        if let BrokerEvent::OnTick { frame, inputs, majority_hash } = event {
            return self.tick_server(frame, inputs, majority_hash);
        }
        self.orchestrator.handle_event(event)
    }
}
