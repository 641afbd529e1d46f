//! Top-level wiring crate: a `Room` binding the ECS, snapshot, sync, and
//! physics crates into the one type a game host actually holds.

pub mod room;

pub mod prelude {
    pub use crate::room::{Room, PLAYER_TYPE, PROP_TYPE};
}
