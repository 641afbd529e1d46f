use thiserror::Error;

/// Error taxonomy for the sync half of the kernel. `Desync`
/// deliberately has no variant here: it is reported through
/// `Orchestrator::is_desynced` plus the resync flow, never as a `Result::Err`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("allocator or rollback ring exhausted its capacity")]
    CapacityExceeded,

    #[error(transparent)]
    Ecs(#[from] convergence_ecs::error::EcsError),

    #[error(transparent)]
    Snapshot(#[from] convergence_snapshot::error::SnapshotError),

    #[error("a system returned a suspending value; ticks may not suspend")]
    AsyncSystemDetected,

    #[error("snapshot or delta decode failed: {reason}")]
    DecodeFailed { reason: String },

    #[error("transport error: {reason}")]
    NetworkError { reason: String },
}
