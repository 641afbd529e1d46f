//! The sync half of the kernel: tick loop, determinism guard, input log,
//! rollback buffer, transport contract, and the orchestrator that ties
//! them to `convergence-ecs` and `convergence-snapshot`.

pub mod broker;
pub mod error;
pub mod guard;
pub mod input_log;
pub mod orchestrator;
pub mod rollback;
pub mod tick;

pub mod prelude {
    pub use crate::broker::{
        decode_state_hash, encode_state_hash, Broker, BrokerEvent, ConnectAck, ConnectOpts, InputRecord,
        WIRE_STATE_HASH_TAG,
    };
    pub use crate::error::SyncError;
    pub use crate::guard::DeterminismGuard;
    pub use crate::input_log::{FrameInputs, InputLog, LifecycleKind, Payload};
    pub use crate::orchestrator::{Orchestrator, MAX_CATCHUP_FRAMES};
    pub use crate::rollback::RollbackBuffer;
    pub use crate::tick::{TickDiagnostics, TickLoop};
}
