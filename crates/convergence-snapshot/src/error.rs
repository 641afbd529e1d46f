use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot decode failed: {reason}")]
    DecodeFailed { reason: String },

    #[error("loaded snapshot hash {actual:#x} does not match expected {expected:#x}")]
    HashMismatchAfterLoad { expected: u32, actual: u32 },

    #[error(transparent)]
    Ecs(#[from] convergence_ecs::error::EcsError),
}
