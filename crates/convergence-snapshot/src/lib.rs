//! Snapshot codec, state hash, delta engine, and partition assigner — the
//! wire-facing half of the kernel, consumed by the sync orchestrator.

pub mod codec;
pub mod delta;
pub mod error;
pub mod hash;
pub mod partition;

pub mod prelude {
    pub use crate::codec::{content_digest, decode, encode, DecodeOutcome, FORMAT_TAG};
    pub use crate::delta::{
        compute_delta, decode_delta, encode_delta, get_partition, networked_eids, CreatedEntity, Delta,
    };
    pub use crate::error::SnapshotError;
    pub use crate::hash::{state_hash, HashHistory};
    pub use crate::partition::{assign, degradation_tier, partition_count, DegradationTier};
}
