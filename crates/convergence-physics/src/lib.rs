//! Illustrative fixed-point 2D rigid-body stepper.
//!
//! A minimal consumer of `convergence-ecs`/`convergence-math`, showing what
//! a "real" gameplay system built on this kernel looks like: it only ever
//! touches entities through `Transform2D`/`Body2D` components and the
//! public `World`/`Query` surface, the same access every other system has.

pub mod components;
pub mod stepper;

pub mod prelude {
    pub use crate::components::{
        body_schema, register, transform_schema, wake_on_restore, BODY_COMPONENT,
        BODY_KIND_DYNAMIC, BODY_KIND_KINEMATIC, BODY_KIND_STATIC, SHAPE_BOX, SHAPE_CIRCLE,
        TRANSFORM_COMPONENT,
    };
    pub use crate::stepper::{CollisionCallback, CollisionPair, PhysicsStepper};
}
