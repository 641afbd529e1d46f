//! `Transform2D`/`Body2D` component schemas.
//!
//! These fields live directly in the same schema-driven SoA storage every
//! other synced component uses; there is no external physics-engine mirror
//! to keep in sync, so there is nothing to "register" or "unregister" with
//! a third-party solver. A body is simply any entity carrying both
//! components.

use convergence_ecs::component::{ComponentSchema, FieldDefault, FieldSchema, FieldType};
use convergence_ecs::entity::EntityId;
use convergence_ecs::error::EcsError;
use convergence_ecs::world::World;
use convergence_math::Fixed;

pub const TRANSFORM_COMPONENT: &str = "transform2d";
pub const BODY_COMPONENT: &str = "body2d";

/// `body2d.kind` values.
pub const BODY_KIND_DYNAMIC: u8 = 0;
pub const BODY_KIND_KINEMATIC: u8 = 1;
pub const BODY_KIND_STATIC: u8 = 2;

/// `body2d.shape` values.
pub const SHAPE_CIRCLE: u8 = 0;
pub const SHAPE_BOX: u8 = 1;

pub fn transform_schema() -> ComponentSchema {
    ComponentSchema {
        name: TRANSFORM_COMPONENT.to_string(),
        fields: vec![
            FieldSchema { name: "x".into(), ty: FieldType::I32, default: FieldDefault::I32(0) },
            FieldSchema { name: "y".into(), ty: FieldType::I32, default: FieldDefault::I32(0) },
        ],
        sync: true,
    }
}

/// `shape_a` is a circle's radius or a box's half-width; `shape_b` is a
/// box's half-height (unused for circles).
pub fn body_schema() -> ComponentSchema {
    ComponentSchema {
        name: BODY_COMPONENT.to_string(),
        fields: vec![
            FieldSchema { name: "vx".into(), ty: FieldType::I32, default: FieldDefault::I32(0) },
            FieldSchema { name: "vy".into(), ty: FieldType::I32, default: FieldDefault::I32(0) },
            FieldSchema { name: "kind".into(), ty: FieldType::U8, default: FieldDefault::U8(BODY_KIND_DYNAMIC) },
            FieldSchema { name: "shape".into(), ty: FieldType::U8, default: FieldDefault::U8(SHAPE_CIRCLE) },
            FieldSchema { name: "shape_a".into(), ty: FieldType::I32, default: FieldDefault::I32(Fixed::ONE.raw()) },
            FieldSchema { name: "shape_b".into(), ty: FieldType::I32, default: FieldDefault::I32(Fixed::ONE.raw()) },
            FieldSchema { name: "restitution".into(), ty: FieldType::I32, default: FieldDefault::I32(0) },
            FieldSchema { name: "is_sensor".into(), ty: FieldType::Bool, default: FieldDefault::Bool(false) },
            FieldSchema { name: "asleep".into(), ty: FieldType::Bool, default: FieldDefault::Bool(false) },
        ],
        sync: true,
    }
}

/// Registers both components on `world`. Idempotent, like every other
/// registry call in this workspace.
pub fn register(world: &mut World) -> Result<(), EcsError> {
    world.register_component(transform_schema())?;
    world.register_component(body_schema())?;
    Ok(())
}

/// `EntityDefinition::on_restore` hook: wakes a body after it has been
/// written back in from a snapshot. Bodies never carry external state, so
/// "waking" is exactly clearing the `asleep` flag this crate itself owns.
pub fn wake_on_restore(world: &mut World, id: EntityId) {
    if let Some(store) = world.components.store_by_name_mut(BODY_COMPONENT) {
        if store.has(id.index()) {
            store.set_bool("asleep", id.index(), false);
        }
    }
}
