//! Fixed-point broad-phase + impulse-resolution stepper.
//!
//! Step first, then read sorted results, with collision pairs ordered by
//! ascending entity id for deterministic resolution order. The solver is
//! written from scratch in fixed point rather than wrapping an existing
//! f32-internal physics engine, since f32 rounding diverges across CPUs
//! and would break cross-peer hash agreement. Collision pairs are detected
//! with a quadratic AABB broad-phase, which is fine at the entity counts
//! this illustrative module targets; a binned/sorted broad-phase would be
//! the first thing to swap in for a larger scene.
//!
//! `PhysicsStepper::step` is the library entry point for direct, synchronous
//! use and for registration as a scheduler system: `step` takes `&self`, so
//! a `PhysicsStepper` shared behind an `Rc<RefCell<_>>` can be captured by a
//! boxed closure registered for `Phase::Physics`, keeping one callback table
//! alive across every deterministic tick path (live ticks, catchup, and
//! resync replay alike) instead of a fresh, empty one per tick.

use std::collections::HashMap;

use convergence_ecs::entity::EntityId;
use convergence_ecs::query::Query;
use convergence_ecs::world::World;
use convergence_math::Fixed;

use crate::components::{
    BODY_COMPONENT, BODY_KIND_DYNAMIC, SHAPE_BOX, SHAPE_CIRCLE, TRANSFORM_COMPONENT,
};

/// A collision detected during a single `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionPair {
    pub entity_a: EntityId,
    pub entity_b: EntityId,
}

/// Dispatched for a collision between an entity of `type_a` and one of
/// `type_b` (order-independent: registered once, matched either way).
pub type CollisionCallback = fn(&mut World, EntityId, EntityId);

#[derive(Debug, Clone, Copy)]
struct BodyState {
    id: EntityId,
    pos: (Fixed, Fixed),
    vel: (Fixed, Fixed),
    kind: u8,
    shape: u8,
    shape_a: Fixed,
    shape_b: Fixed,
    restitution: Fixed,
    is_sensor: bool,
}

impl BodyState {
    fn half_extents(&self) -> (Fixed, Fixed) {
        match self.shape {
            SHAPE_CIRCLE => (self.shape_a, self.shape_a),
            _ => (self.shape_a, self.shape_b),
        }
    }

    fn inv_mass(&self) -> Fixed {
        if self.kind == BODY_KIND_DYNAMIC {
            Fixed::ONE
        } else {
            Fixed::ZERO
        }
    }
}

/// Holds only the collision-callback table: there is no per-entity state
/// to carry across ticks, so `reset`ting on a world clear is a no-op — see
/// `components::wake_on_restore` for why bodies need no external mirror at
/// all.
#[derive(Default)]
pub struct PhysicsStepper {
    callbacks: HashMap<(String, String), CollisionCallback>,
}

impl PhysicsStepper {
    pub fn new() -> PhysicsStepper {
        PhysicsStepper::default()
    }

    fn callback_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Registers a collision callback for an unordered entity-type pair.
    pub fn on_collision(&mut self, type_a: &str, type_b: &str, callback: CollisionCallback) {
        self.callbacks.insert(Self::callback_key(type_a, type_b), callback);
    }

    fn load_bodies(world: &World) -> Vec<BodyState> {
        let query = Query::with_components(world, &[TRANSFORM_COMPONENT, BODY_COMPONENT]);
        let transforms = world.components.store_by_name(TRANSFORM_COMPONENT).unwrap();
        let bodies = world.components.store_by_name(BODY_COMPONENT).unwrap();
        query
            .iter(world)
            .filter(|&id| !bodies.get_bool("asleep", id.index()).unwrap_or(false))
            .map(|id| BodyState {
                id,
                pos: (
                    transforms.get_fixed("x", id.index()).unwrap_or(Fixed::ZERO),
                    transforms.get_fixed("y", id.index()).unwrap_or(Fixed::ZERO),
                ),
                vel: (
                    bodies.get_fixed("vx", id.index()).unwrap_or(Fixed::ZERO),
                    bodies.get_fixed("vy", id.index()).unwrap_or(Fixed::ZERO),
                ),
                kind: bodies.get_u8("kind", id.index()).unwrap_or(BODY_KIND_DYNAMIC),
                shape: bodies.get_u8("shape", id.index()).unwrap_or(SHAPE_CIRCLE),
                shape_a: bodies.get_fixed("shape_a", id.index()).unwrap_or(Fixed::ONE),
                shape_b: bodies.get_fixed("shape_b", id.index()).unwrap_or(Fixed::ONE),
                restitution: bodies.get_fixed("restitution", id.index()).unwrap_or(Fixed::ZERO),
                is_sensor: bodies.get_bool("is_sensor", id.index()).unwrap_or(false),
            })
            .collect()
    }

    /// Integrates dynamic bodies by `dt`, resolves overlapping pairs, and
    /// invokes any registered collision callbacks. Returns the collisions
    /// detected this step, sorted ascending `(entity_a, entity_b)`.
    ///
    /// Iteration is always ascending entity id (query order), and the
    /// pairwise scan visits `(i, j)` with `i < j`, so results are identical
    /// across any conformant platform given identical component state.
    pub fn step(&self, world: &mut World, dt: Fixed) -> Vec<CollisionPair> {
        let mut states = Self::load_bodies(world);

        for body in states.iter_mut() {
            if body.kind == BODY_KIND_DYNAMIC {
                body.pos.0 = body.pos.0 + body.vel.0.mul(dt);
                body.pos.1 = body.pos.1 + body.vel.1.mul(dt);
            }
        }

        let mut collisions = Vec::new();
        for i in 0..states.len() {
            for j in (i + 1)..states.len() {
                if let Some((nx, ny, depth)) = overlap(&states[i], &states[j]) {
                    collisions.push(CollisionPair {
                        entity_a: states[i].id,
                        entity_b: states[j].id,
                    });
                    if !states[i].is_sensor && !states[j].is_sensor {
                        resolve(&mut states, i, j, nx, ny, depth);
                    }
                }
            }
        }

        let transforms = world.components.store_by_name_mut(TRANSFORM_COMPONENT).unwrap();
        for body in &states {
            transforms.set_fixed("x", body.id.index(), body.pos.0);
            transforms.set_fixed("y", body.id.index(), body.pos.1);
        }
        let bodies = world.components.store_by_name_mut(BODY_COMPONENT).unwrap();
        for body in &states {
            bodies.set_fixed("vx", body.id.index(), body.vel.0);
            bodies.set_fixed("vy", body.id.index(), body.vel.1);
        }

        collisions.sort_by_key(|c| (c.entity_a.raw(), c.entity_b.raw()));
        self.dispatch_callbacks(world, &collisions);
        collisions
    }

    fn dispatch_callbacks(&self, world: &mut World, collisions: &[CollisionPair]) {
        if self.callbacks.is_empty() {
            return;
        }
        let typed: Vec<(EntityId, EntityId, (String, String))> = collisions
            .iter()
            .filter_map(|c| {
                let ta = world.type_of(c.entity_a)?.to_string();
                let tb = world.type_of(c.entity_b)?.to_string();
                Some((c.entity_a, c.entity_b, Self::callback_key(&ta, &tb)))
            })
            .collect();
        for (a, b, key) in typed {
            if let Some(callback) = self.callbacks.get(&key) {
                callback(world, a, b);
            }
        }
    }
}

/// AABB-versus-shape overlap test. Returns the separation normal (pointing
/// from `a` to `b`) and penetration depth when the pair overlaps.
fn overlap(a: &BodyState, b: &BodyState) -> Option<(Fixed, Fixed, Fixed)> {
    match (a.shape, b.shape) {
        (SHAPE_CIRCLE, SHAPE_CIRCLE) => circle_circle(a, b),
        (SHAPE_BOX, SHAPE_BOX) => box_box(a, b),
        (SHAPE_CIRCLE, SHAPE_BOX) => circle_box(a, b),
        (SHAPE_BOX, SHAPE_CIRCLE) => circle_box(b, a).map(|(nx, ny, d)| (-nx, -ny, d)),
        _ => None,
    }
}

fn circle_circle(a: &BodyState, b: &BodyState) -> Option<(Fixed, Fixed, Fixed)> {
    let dx = b.pos.0 - a.pos.0;
    let dy = b.pos.1 - a.pos.1;
    let dist2 = dx.mul(dx) + dy.mul(dy);
    let radius_sum = a.shape_a + b.shape_a;
    if dist2 >= radius_sum.mul(radius_sum) {
        return None;
    }
    let dist = dist2.sqrt();
    let depth = radius_sum - dist;
    if dist == Fixed::ZERO {
        return Some((Fixed::ONE, Fixed::ZERO, depth));
    }
    Some((dx.div(dist), dy.div(dist), depth))
}

fn box_box(a: &BodyState, b: &BodyState) -> Option<(Fixed, Fixed, Fixed)> {
    let (ahw, ahh) = a.half_extents();
    let (bhw, bhh) = b.half_extents();
    let dx = b.pos.0 - a.pos.0;
    let dy = b.pos.1 - a.pos.1;
    let overlap_x = (ahw + bhw) - dx.abs();
    let overlap_y = (ahh + bhh) - dy.abs();
    if overlap_x <= Fixed::ZERO || overlap_y <= Fixed::ZERO {
        return None;
    }
    if overlap_x < overlap_y {
        Some((Fixed::from_int(dx.sign()), Fixed::ZERO, overlap_x))
    } else {
        Some((Fixed::ZERO, Fixed::from_int(dy.sign()), overlap_y))
    }
}

fn circle_box(circle: &BodyState, rect: &BodyState) -> Option<(Fixed, Fixed, Fixed)> {
    let (hw, hh) = rect.half_extents();
    let dx = circle.pos.0 - rect.pos.0;
    let dy = circle.pos.1 - rect.pos.1;
    let closest_x = dx.clamp(-hw, hw);
    let closest_y = dy.clamp(-hh, hh);
    let diff_x = dx - closest_x;
    let diff_y = dy - closest_y;
    let dist2 = diff_x.mul(diff_x) + diff_y.mul(diff_y);
    let radius = circle.shape_a;
    if dist2 >= radius.mul(radius) {
        return None;
    }
    let dist = dist2.sqrt();
    let depth = radius - dist;
    if dist == Fixed::ZERO {
        return Some((Fixed::ONE, Fixed::ZERO, depth));
    }
    Some((diff_x.div(dist), diff_y.div(dist), depth))
}

/// Applies a restitution-weighted impulse along `(nx, ny)` plus positional
/// correction proportional to each body's inverse mass share.
fn resolve(states: &mut [BodyState], i: usize, j: usize, nx: Fixed, ny: Fixed, depth: Fixed) {
    let inv_mass_a = states[i].inv_mass();
    let inv_mass_b = states[j].inv_mass();
    let total_inv_mass = inv_mass_a + inv_mass_b;
    if total_inv_mass == Fixed::ZERO {
        return;
    }

    let rel_vx = states[j].vel.0 - states[i].vel.0;
    let rel_vy = states[j].vel.1 - states[i].vel.1;
    let rel_along_normal = rel_vx.mul(nx) + rel_vy.mul(ny);
    if rel_along_normal > Fixed::ZERO {
        // Already separating.
    } else {
        let restitution = states[i].restitution.min(states[j].restitution);
        let j_scalar = -(Fixed::ONE + restitution).mul(rel_along_normal).div(total_inv_mass);
        let impulse_x = nx.mul(j_scalar);
        let impulse_y = ny.mul(j_scalar);
        states[i].vel.0 = states[i].vel.0 - impulse_x.mul(inv_mass_a);
        states[i].vel.1 = states[i].vel.1 - impulse_y.mul(inv_mass_a);
        states[j].vel.0 = states[j].vel.0 + impulse_x.mul(inv_mass_b);
        states[j].vel.1 = states[j].vel.1 + impulse_y.mul(inv_mass_b);
    }

    let correction = depth.div(total_inv_mass).mul(Fixed::to_fixed(0.8));
    let push_x = nx.mul(correction);
    let push_y = ny.mul(correction);
    states[i].pos.0 = states[i].pos.0 - push_x.mul(inv_mass_a);
    states[i].pos.1 = states[i].pos.1 - push_y.mul(inv_mass_a);
    states[j].pos.0 = states[j].pos.0 + push_x.mul(inv_mass_b);
    states[j].pos.1 = states[j].pos.1 + push_y.mul(inv_mass_b);
}
