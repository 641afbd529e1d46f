//! Transport contract ("the broker").
//!
//! Kept deliberately thin and out of the kernel: the orchestrator only
//! ever talks to a `dyn Broker`, never a concrete socket/channel type, so
//! tests can swap in [`test_support::InMemoryBroker`] and run a multi-peer
//! room without real networking.

use std::collections::BTreeMap;

use crate::error::SyncError;
use crate::input_log::Payload;

/// `type` byte for the 9-byte state-hash wire message
/// (`[tag][u32 frame LE][u32 hash LE]`). Fixed for this protocol version.
pub const WIRE_STATE_HASH_TAG: u8 = 0x01;

pub fn encode_state_hash(frame: u32, hash: u32) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[0] = WIRE_STATE_HASH_TAG;
    out[1..5].copy_from_slice(&frame.to_le_bytes());
    out[5..9].copy_from_slice(&hash.to_le_bytes());
    out
}

pub fn decode_state_hash(bytes: &[u8]) -> Result<(u32, u32), SyncError> {
    if bytes.len() != 9 || bytes[0] != WIRE_STATE_HASH_TAG {
        return Err(SyncError::DecodeFailed {
            reason: "malformed state-hash frame".to_string(),
        });
    }
    let frame = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    let hash = u32::from_le_bytes(bytes[5..9].try_into().unwrap());
    Ok((frame, hash))
}

/// One input record as it appears on the wire: `{seq, clientId, data,
/// frame?}`. `frame` is absent for inputs the server hasn't yet pinned to a
/// tick; those are skipped during catch-up and delivered normally later.
#[derive(Debug, Clone)]
pub struct InputRecord {
    pub seq: u32,
    pub client_id: String,
    pub frame: Option<u32>,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub struct ConnectOpts {
    pub local_client_id: Option<String>,
}

/// What `connect` yields on success: `(snapshot_or_empty, pending_inputs,
/// server_frame, fps, client_id)`.
#[derive(Debug, Clone)]
pub struct ConnectAck {
    pub snapshot: Option<Vec<u8>>,
    pub pending_inputs: Vec<InputRecord>,
    pub server_frame: u32,
    pub fps: u32,
    pub client_id: String,
}

/// Inbound events the host feeds into `Orchestrator::handle_event`.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    OnTick {
        frame: u32,
        inputs: Vec<InputRecord>,
        majority_hash: Option<u32>,
    },
    OnBinarySnapshot {
        bytes: Vec<u8>,
    },
    OnMajorityHash {
        frame: u32,
        hash: u32,
    },
    OnResyncSnapshot {
        bytes: Vec<u8>,
        frame: u32,
        inputs: Vec<InputRecord>,
    },
    OnReliabilityUpdate {
        scores: BTreeMap<String, f32>,
        version: u32,
    },
}

/// Object-safe transport contract, one method per wire operation a room
/// needs to send or receive.
pub trait Broker {
    fn connect(&mut self, room_id: &str, opts: ConnectOpts) -> Result<ConnectAck, SyncError>;
    fn send(&mut self, bytes: &[u8]) -> Result<(), SyncError>;
    fn send_snapshot(&mut self, bytes: &[u8], hash: u32, seq: u64, frame: u32) -> Result<(), SyncError>;
    fn send_state_hash(&mut self, frame: u32, hash: u32) -> Result<(), SyncError>;
    fn send_partition_data(&mut self, frame: u32, partition_id: u32, bytes: &[u8]) -> Result<(), SyncError>;
    fn request_resync(&mut self) -> Result<(), SyncError>;
}

/// In-process test double. Records every outbound call so a test can
/// inspect what a room tried to send, and queues `BrokerEvent`s a test
/// drives in manually — no sockets, no threads.
pub mod test_support {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct SentSnapshot {
        pub bytes: Vec<u8>,
        pub hash: u32,
        pub seq: u64,
        pub frame: u32,
    }

    #[derive(Debug, Clone)]
    pub struct SentPartition {
        pub frame: u32,
        pub partition_id: u32,
        pub bytes: Vec<u8>,
    }

    #[derive(Debug, Default)]
    pub struct InMemoryBroker {
        pub connect_ack: Option<ConnectAck>,
        pub sent_inputs: Vec<Vec<u8>>,
        pub sent_snapshots: Vec<SentSnapshot>,
        pub sent_hashes: Vec<(u32, u32)>,
        pub sent_partitions: Vec<SentPartition>,
        pub resync_requests: u32,
    }

    impl InMemoryBroker {
        pub fn new() -> InMemoryBroker {
            InMemoryBroker::default()
        }

        pub fn with_connect_ack(mut self, ack: ConnectAck) -> InMemoryBroker {
            self.connect_ack = Some(ack);
            self
        }
    }

    impl Broker for InMemoryBroker {
        fn connect(&mut self, _room_id: &str, opts: ConnectOpts) -> Result<ConnectAck, SyncError> {
            self.connect_ack.clone().ok_or_else(|| SyncError::NetworkError {
                reason: format!(
                    "no connect ack staged for {:?}",
                    opts.local_client_id.unwrap_or_default()
                ),
            })
        }

        fn send(&mut self, bytes: &[u8]) -> Result<(), SyncError> {
            self.sent_inputs.push(bytes.to_vec());
            Ok(())
        }

        fn send_snapshot(&mut self, bytes: &[u8], hash: u32, seq: u64, frame: u32) -> Result<(), SyncError> {
            self.sent_snapshots.push(SentSnapshot {
                bytes: bytes.to_vec(),
                hash,
                seq,
                frame,
            });
            Ok(())
        }

        fn send_state_hash(&mut self, frame: u32, hash: u32) -> Result<(), SyncError> {
            self.sent_hashes.push((frame, hash));
            Ok(())
        }

        fn send_partition_data(&mut self, frame: u32, partition_id: u32, bytes: &[u8]) -> Result<(), SyncError> {
            self.sent_partitions.push(SentPartition {
                frame,
                partition_id,
                bytes: bytes.to_vec(),
            });
            Ok(())
        }

        fn request_resync(&mut self) -> Result<(), SyncError> {
            self.resync_requests += 1;
            Ok(())
        }
    }
}
