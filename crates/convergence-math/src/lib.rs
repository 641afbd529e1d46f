//! Fixed-point arithmetic, trigonometry, and deterministic RNG shared by
//! every other crate in the workspace. Nothing here ever calls a host
//! transcendental function at simulation time.

mod fixed;
mod rng;
mod trig;
mod vec2;

pub use fixed::{Fixed, FRAC_BITS, ONE};
pub use rng::{seed_from_frame_partition, Rng};
pub use vec2::{Quat, Vec2};
