//! The sync orchestrator: the hard core that keeps a swarm of peers
//! converged on a single authoritative state.
//!
//! Holds exactly the state fields the contract names and exposes one
//! method per named flow (authority election, connect, per-server-tick,
//! hash consensus, resync, continuous sync, local input/prediction).
//! Transport is a type parameter over [`Broker`] rather than a concrete
//! socket, so tests drive everything through
//! [`crate::broker::test_support::InMemoryBroker`].

use std::collections::{BTreeMap, HashMap};

use convergence_ecs::entity::EntityId;
use convergence_ecs::interner::Namespace;
use convergence_ecs::world::World;
use convergence_snapshot::delta::{compute_delta, encode_delta, get_partition, networked_eids};
use convergence_snapshot::hash::{state_hash, HashHistory};
use convergence_snapshot::partition::{assign, partition_count};

use crate::broker::{Broker, BrokerEvent, ConnectOpts, InputRecord};
use crate::error::SyncError;
use crate::input_log::{InputLog, LifecycleKind, Payload};
use crate::rollback::RollbackBuffer;
use crate::tick::TickLoop;

/// Catch-up above this many frames is abandoned in favor of a resync.
pub const MAX_CATCHUP_FRAMES: u32 = 200;

/// Default partition granularity (`K` in `partition_count = ceil(n/K)`).
const DEFAULT_PARTITION_K: usize = 64;

fn apply_lifecycle_event(
    world: &mut World,
    client_id: &str,
    kind: &LifecycleKind,
    active_clients: &mut Vec<String>,
    join_order: &mut Vec<String>,
    authority: &mut Option<String>,
) {
    match kind {
        LifecycleKind::Join | LifecycleKind::Reconnect => {
            world.interner.intern(Namespace::CLIENT, client_id);
            if !active_clients.iter().any(|c| c == client_id) {
                active_clients.push(client_id.to_owned());
                active_clients.sort();
            }
            if !join_order.iter().any(|c| c == client_id) {
                join_order.push(client_id.to_owned());
            }
            if authority.is_none() {
                *authority = Some(client_id.to_owned());
            }
        }
        LifecycleKind::Leave | LifecycleKind::Disconnect => {
            active_clients.retain(|c| c != client_id);
            if authority.as_deref() == Some(client_id) {
                *authority = join_order.iter().find(|c| active_clients.contains(c)).cloned();
            }
        }
        LifecycleKind::ResyncRequest => {}
    }
}

pub struct Orchestrator<B: Broker> {
    pub tick_loop: TickLoop,
    broker: B,
    room_id: String,
    on_room_create: Option<fn(&mut World)>,

    authority_client_id: Option<String>,
    active_clients: Vec<String>,
    join_order: Vec<String>,
    local_client_id: Option<String>,
    last_processed_frame: u32,
    has_processed: bool,
    last_input_seq: u64,
    prev_eids: Option<Vec<u32>>,
    hash_history: HashHistory,
    rollback_buffer: RollbackBuffer,
    is_desynced: bool,
    desync_frame: Option<u32>,
    resync_pending: bool,
    reliability: HashMap<String, f64>,
    reliability_version: u32,
    last_good_snapshot: Option<u32>,
    hash_consensus_passed: u32,
    hash_consensus_failed: u32,
    snapshot_seq: u64,
    partition_k: usize,
    input_log: InputLog,
}

impl<B: Broker> Orchestrator<B> {
    pub fn new(room_id: &str, is_server: bool, fixed_dt: convergence_math::Fixed, rng_seed: u32, broker: B) -> Orchestrator<B> {
        Orchestrator {
            tick_loop: TickLoop::new(is_server, fixed_dt, rng_seed),
            broker,
            room_id: room_id.to_owned(),
            on_room_create: None,
            authority_client_id: None,
            active_clients: Vec::new(),
            join_order: Vec::new(),
            local_client_id: None,
            last_processed_frame: 0,
            has_processed: false,
            last_input_seq: 0,
            prev_eids: None,
            hash_history: HashHistory::new(300),
            rollback_buffer: RollbackBuffer::new(60),
            is_desynced: false,
            desync_frame: None,
            resync_pending: false,
            reliability: HashMap::new(),
            reliability_version: 0,
            last_good_snapshot: None,
            hash_consensus_passed: 0,
            hash_consensus_failed: 0,
            snapshot_seq: 0,
            partition_k: DEFAULT_PARTITION_K,
            input_log: InputLog::new(),
        }
    }

    pub fn with_room_create_hook(mut self, hook: fn(&mut World)) -> Orchestrator<B> {
        self.on_room_create = Some(hook);
        self
    }

    pub fn with_partition_k(mut self, k: usize) -> Orchestrator<B> {
        self.partition_k = k.max(1);
        self
    }

    // -- accessors -------------------------------------------------------

    pub fn authority_client_id(&self) -> Option<&str> {
        self.authority_client_id.as_deref()
    }

    pub fn is_authority(&self) -> bool {
        self.authority_client_id.is_some() && self.authority_client_id.as_deref() == self.local_client_id.as_deref()
    }

    pub fn active_clients(&self) -> &[String] {
        &self.active_clients
    }

    pub fn local_client_id(&self) -> Option<&str> {
        self.local_client_id.as_deref()
    }

    pub fn is_desynced(&self) -> bool {
        self.is_desynced
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    pub fn desync_frame(&self) -> Option<u32> {
        self.desync_frame
    }

    pub fn last_processed_frame(&self) -> u32 {
        self.last_processed_frame
    }

    pub fn last_good_snapshot(&self) -> Option<u32> {
        self.last_good_snapshot
    }

    pub fn hash_consensus_counts(&self) -> (u32, u32) {
        (self.hash_consensus_passed, self.hash_consensus_failed)
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    // -- connect -----------------------------------------------------------

    /// Drives `broker.connect`, then either the late-joiner or first-joiner
    /// path depending on whether a snapshot came back.
    pub fn connect(&mut self, local_client_id: Option<String>) -> Result<(), SyncError> {
        let ack = self.broker.connect(
            &self.room_id,
            ConnectOpts {
                local_client_id: local_client_id.clone(),
            },
        )?;
        self.local_client_id = Some(ack.client_id.clone());
        let pending = ack.pending_inputs.clone();
        let server_frame = ack.server_frame;
        match ack.snapshot.clone() {
            Some(bytes) => self.connect_late_joiner(&bytes, &pending, server_frame),
            None => self.connect_first_joiner(&pending, server_frame),
        }
    }

    /// Loads the authority's snapshot, replays any follow-up inputs that
    /// landed between the snapshot and the live server frame, and
    /// requests a resync instead when the gap is too wide to replay.
    fn connect_late_joiner(&mut self, bytes: &[u8], pending: &[InputRecord], server_frame: u32) -> Result<(), SyncError> {
        let outcome = convergence_snapshot::codec::decode(bytes, &mut self.tick_loop.world, &mut self.tick_loop.rng)?;
        self.last_processed_frame = outcome.frame;
        self.has_processed = true;
        self.prev_eids = Some(networked_eids(&self.tick_loop.world));
        self.hash_history.clear();
        self.hash_history.record(outcome.frame, state_hash(&self.tick_loop.world));
        self.last_good_snapshot = Some(outcome.frame);

        let mut filtered: Vec<InputRecord> = pending
            .iter()
            .filter(|r| {
                (r.seq as u64) > outcome.seq
                    && r.frame
                        .map(|f| f >= outcome.frame.wrapping_add(1) && f <= server_frame)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        filtered.sort_by_key(|r| (r.frame.unwrap_or(0), r.seq));

        let gap = server_frame.saturating_sub(outcome.frame);
        if gap > MAX_CATCHUP_FRAMES {
            for rec in pending.iter() {
                if matches!(rec.payload, Payload::Lifecycle { .. }) {
                    self.apply_lifecycle_record(rec);
                }
            }
            self.resync_pending = true;
            return self.broker.request_resync();
        }

        self.catchup(outcome.frame.wrapping_add(1), server_frame, &filtered)
    }

    /// The local-first path: the room ran locally before `connect`, so the
    /// world is hard-reset and rebuilt from the server-provided sequence,
    /// which always yields at least one recorded hash.
    fn connect_first_joiner(&mut self, pending: &[InputRecord], server_frame: u32) -> Result<(), SyncError> {
        self.tick_loop.world.clear_entities();
        if let Some(hook) = self.on_room_create {
            hook(&mut self.tick_loop.world);
        }
        let mut sorted = pending.to_vec();
        sorted.sort_by_key(|r| (r.frame.unwrap_or(0), r.seq));
        self.prev_eids = Some(networked_eids(&self.tick_loop.world));
        self.catchup(0, server_frame, &sorted)
    }

    fn apply_lifecycle_record(&mut self, rec: &InputRecord) {
        if let Payload::Lifecycle { kind, client_id } = &rec.payload {
            let mut active_clients = std::mem::take(&mut self.active_clients);
            let mut join_order = std::mem::take(&mut self.join_order);
            let mut authority = self.authority_client_id.take();
            apply_lifecycle_event(
                &mut self.tick_loop.world,
                client_id,
                kind,
                &mut active_clients,
                &mut join_order,
                &mut authority,
            );
            self.active_clients = active_clients;
            self.join_order = join_order;
            self.authority_client_id = authority;
        }
    }

    /// Ticks `start..=end`, grouping `inputs` by pinned frame and applying
    /// each frame's subset in ascending `seq` order. Inputs without a
    /// pinned frame are skipped; they arrive normally via a later tick.
    fn catchup(&mut self, start: u32, end: u32, inputs: &[InputRecord]) -> Result<(), SyncError> {
        let mut by_frame: BTreeMap<u32, Vec<InputRecord>> = BTreeMap::new();
        for rec in inputs {
            if let Some(frame) = rec.frame {
                if frame >= start && frame <= end {
                    by_frame.entry(frame).or_default().push(rec.clone());
                }
            }
        }
        for frame in start..=end {
            let mut frame_inputs = BTreeMap::new();
            if let Some(records) = by_frame.get_mut(&frame) {
                records.sort_by_key(|r| r.seq);
                for rec in records.iter() {
                    frame_inputs.insert(rec.client_id.clone(), rec.payload.clone());
                }
            }
            self.run_tick(frame, &frame_inputs)?;
        }
        Ok(())
    }

    fn run_tick(&mut self, frame: u32, frame_inputs: &BTreeMap<String, Payload>) -> Result<u32, SyncError> {
        let mut active_clients = std::mem::take(&mut self.active_clients);
        let mut join_order = std::mem::take(&mut self.join_order);
        let mut authority = self.authority_client_id.take();
        let hash = self.tick_loop.tick(frame, frame_inputs, |world, client_id, kind| {
            apply_lifecycle_event(world, client_id, kind, &mut active_clients, &mut join_order, &mut authority);
        })?;
        self.active_clients = active_clients;
        self.join_order = join_order;
        self.authority_client_id = authority;
        self.hash_history.record(frame, hash);
        self.last_processed_frame = frame;
        self.has_processed = true;
        Ok(hash)
    }

    // -- per-server-tick ---------------------------------------------------

    /// Rejects stale frames, runs the tick, reports the hash, and performs
    /// continuous partitioned sync. `majority_hash`, if present, is for
    /// `frame - 1` (it piggybacks on `on_tick` per the transport contract).
    pub fn process_server_tick(
        &mut self,
        frame: u32,
        inputs: Vec<InputRecord>,
        majority_hash: Option<u32>,
    ) -> Result<(), SyncError> {
        if self.has_processed && frame <= self.last_processed_frame {
            return Ok(());
        }
        let mut frame_inputs = BTreeMap::new();
        for rec in &inputs {
            frame_inputs.insert(rec.client_id.clone(), rec.payload.clone());
        }
        let hash = self.run_tick(frame, &frame_inputs)?;
        self.broker.send_state_hash(frame, hash)?;

        if let Some(majority) = majority_hash {
            self.handle_majority_hash(frame.wrapping_sub(1), majority)?;
        }
        self.continuous_sync(frame)
    }

    // -- hash consensus ------------------------------------------------

    /// Compares `majority_hash` for `frame` against the locally recorded
    /// hash. Silently ignored if the frame fell out of the retention
    /// window or arrived before the first tick.
    pub fn handle_majority_hash(&mut self, frame: u32, majority_hash: u32) -> Result<(), SyncError> {
        let Some(local_hash) = self.hash_history.get(frame) else {
            return Ok(());
        };
        if local_hash == majority_hash {
            self.hash_consensus_passed += 1;
            if self.is_desynced && !self.resync_pending {
                self.is_desynced = false;
            }
            Ok(())
        } else {
            self.hash_consensus_failed += 1;
            self.is_desynced = true;
            self.desync_frame = Some(frame);
            self.resync_pending = true;
            tracing::warn!(frame, local_hash, majority_hash, "state hash desync detected");
            self.broker.request_resync()
        }
    }

    // -- resync --------------------------------------------------------

    /// Hard-replaces local state with the authority's snapshot, optionally
    /// catches up to `server_frame`, and re-arms hash tracking.
    pub fn handle_resync_snapshot(
        &mut self,
        bytes: &[u8],
        server_frame: u32,
        follow_up_inputs: Vec<InputRecord>,
    ) -> Result<(), SyncError> {
        let before_hash = state_hash(&self.tick_loop.world);
        let outcome = convergence_snapshot::codec::decode(bytes, &mut self.tick_loop.world, &mut self.tick_loop.rng)?;

        tracing::warn!(
            frame = outcome.frame,
            local_hash_before_resync = before_hash,
            last_good_snapshot = ?self.last_good_snapshot,
            recent_inputs = self.input_log.get_range(outcome.frame.saturating_sub(20), outcome.frame).len(),
            "resync: hard-replacing local state with authority snapshot"
        );

        self.last_processed_frame = outcome.frame;
        self.has_processed = true;

        if !follow_up_inputs.is_empty() {
            self.catchup(outcome.frame.wrapping_add(1), server_frame, &follow_up_inputs)?;
        }

        if let Some((expected, actual)) = outcome.hash_mismatch {
            tracing::warn!(expected, actual, "resync snapshot hash mismatch after load");
        }

        self.is_desynced = false;
        self.resync_pending = false;
        self.desync_frame = None;
        self.prev_eids = Some(networked_eids(&self.tick_loop.world));
        self.hash_history.clear();
        let post_hash = state_hash(&self.tick_loop.world);
        self.hash_history.record(self.last_processed_frame, post_hash);
        self.last_good_snapshot = Some(self.last_processed_frame);
        Ok(())
    }

    // -- continuous sync -------------------------------------------------

    /// After every multi-peer tick, diffs against the cached previous
    /// entity set and sends only the partitions this client owns.
    fn continuous_sync(&mut self, frame: u32) -> Result<(), SyncError> {
        let curr_eids = networked_eids(&self.tick_loop.world);
        if self.active_clients.len() <= 1 {
            self.prev_eids = Some(curr_eids);
            return Ok(());
        }
        let Some(prev) = self.prev_eids.take() else {
            self.prev_eids = Some(curr_eids);
            return Ok(());
        };
        let base_hash = self.hash_history.get(frame.wrapping_sub(1)).unwrap_or(0);
        let delta = compute_delta(&prev, &self.tick_loop.world, frame, base_hash);
        self.prev_eids = Some(curr_eids);
        if delta.is_empty() {
            return Ok(());
        }

        let entity_count = self.tick_loop.world.active_ids_ascending().len();
        let pc = partition_count(entity_count, self.partition_k);
        let assignment = assign(frame, pc, &self.active_clients, &self.reliability);
        let Some(local) = self.local_client_id.clone() else {
            return Ok(());
        };
        for (partition_id, owner) in assignment.iter().enumerate() {
            if owner.as_deref() != Some(local.as_str()) {
                continue;
            }
            let partition = get_partition(&delta, partition_id as u32, pc);
            if partition.is_empty() {
                continue;
            }
            let bytes = encode_delta(&partition);
            self.broker.send_partition_data(frame, partition_id as u32, &bytes)?;
        }
        Ok(())
    }

    // -- authority snapshot upload -----------------------------------------

    /// Produces and uploads a full snapshot if this client currently holds
    /// authority. A no-op otherwise, so callers may invoke it
    /// unconditionally on join/leave/resync_request.
    pub fn upload_snapshot_if_authority(&mut self) -> Result<(), SyncError> {
        if !self.is_authority() {
            return Ok(());
        }
        self.snapshot_seq += 1;
        let bytes = convergence_snapshot::codec::encode(
            &self.tick_loop.world,
            &self.tick_loop.rng,
            self.last_processed_frame,
            self.snapshot_seq,
        );
        let hash = state_hash(&self.tick_loop.world);
        self.broker
            .send_snapshot(&bytes, hash, self.snapshot_seq, self.last_processed_frame)
    }

    // -- local input / prediction -----------------------------------------

    /// Writes into the entity's input cache immediately and records the
    /// input keyed by `(current_frame, local_client_id)`, for later
    /// rollback replay.
    pub fn handle_local_input(&mut self, entity: EntityId, cache_value: i32, command: serde_json::Value) {
        self.tick_loop.set_input_cache(entity, cache_value);
        self.last_input_seq += 1;
        if let Some(local) = self.local_client_id.clone() {
            self.input_log
                .set(self.tick_loop.tick_counter(), &local, Payload::Command(command));
        }
    }

    /// Replays from the stored rollback snapshot at `from_frame` forward
    /// through the confirmed input log, returning the recomputed hash so
    /// the caller can detect misprediction.
    pub fn rollback_replay(&mut self, from_frame: u32) -> Result<u32, SyncError> {
        let bytes = self
            .rollback_buffer
            .get(from_frame)
            .map(|b| b.to_vec())
            .ok_or_else(|| SyncError::DecodeFailed {
                reason: format!("no rollback snapshot at frame {from_frame}"),
            })?;
        convergence_snapshot::codec::decode(&bytes, &mut self.tick_loop.world, &mut self.tick_loop.rng)?;
        let confirmed: Vec<(u32, BTreeMap<String, Payload>)> = self
            .input_log
            .get_range(from_frame, self.last_processed_frame)
            .into_iter()
            .map(|(frame, frame_inputs)| (frame, frame_inputs.inputs.clone()))
            .collect();
        for (frame, frame_inputs) in confirmed {
            self.run_tick(frame, &frame_inputs)?;
        }
        Ok(state_hash(&self.tick_loop.world))
    }

    pub fn save_rollback_snapshot(&mut self, frame: u32) {
        let bytes = convergence_snapshot::codec::encode(&self.tick_loop.world, &self.tick_loop.rng, frame, self.snapshot_seq);
        self.rollback_buffer.save(frame, bytes);
    }

    // -- reliability / degradation -----------------------------------------

    fn apply_reliability_update(&mut self, scores: BTreeMap<String, f32>, version: u32) {
        if version < self.reliability_version {
            return;
        }
        self.reliability_version = version;
        self.reliability = scores.into_iter().map(|(k, v)| (k, v as f64)).collect();
    }

    // -- event dispatch ------------------------------------------------

    pub fn handle_event(&mut self, event: BrokerEvent) -> Result<(), SyncError> {
        match event {
            BrokerEvent::OnTick {
                frame,
                inputs,
                majority_hash,
            } => self.process_server_tick(frame, inputs, majority_hash),
            BrokerEvent::OnMajorityHash { frame, hash } => self.handle_majority_hash(frame, hash),
            BrokerEvent::OnResyncSnapshot { bytes, frame, inputs } => self.handle_resync_snapshot(&bytes, frame, inputs),
            BrokerEvent::OnBinarySnapshot { bytes } => {
                tracing::debug!(len = bytes.len(), "received drift-probe snapshot (not applied)");
                Ok(())
            }
            BrokerEvent::OnReliabilityUpdate { scores, version } => {
                self.apply_reliability_update(scores, version);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::test_support::InMemoryBroker;
    use crate::broker::ConnectAck;
    use convergence_ecs::component::{ComponentSchema, FieldDefault, FieldSchema, FieldType};
    use convergence_ecs::registry::EntityDefinition;

    fn register_coin(world: &mut World) {
        world
            .register_component(ComponentSchema {
                name: "transform".into(),
                fields: vec![FieldSchema {
                    name: "x".into(),
                    ty: FieldType::I32,
                    default: FieldDefault::I32(0),
                }],
                sync: true,
            })
            .unwrap();
        world.register_definition(EntityDefinition {
            type_name: "coin".into(),
            components: vec!["transform".into()],
            sync_fields: None,
            on_restore: None,
        });
    }

    fn orchestrator() -> Orchestrator<InMemoryBroker> {
        let mut o = Orchestrator::new("room", true, convergence_math::Fixed::to_fixed(1.0 / 60.0), 1, InMemoryBroker::new());
        register_coin(&mut o.tick_loop.world);
        o
    }

    #[test]
    fn first_joiner_connect_runs_at_least_one_tick() {
        let mut o = orchestrator();
        o.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![],
            server_frame: 0,
            fps: 60,
            client_id: "alice".into(),
        });
        o.connect(Some("alice".into())).unwrap();
        assert_eq!(o.local_client_id(), Some("alice"));
        assert_eq!(o.hash_consensus_counts(), (0, 0));
    }

    #[test]
    fn join_lifecycle_input_elects_first_peer_as_authority() {
        let mut o = orchestrator();
        o.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![InputRecord {
                seq: 1,
                client_id: "alice".into(),
                frame: Some(0),
                payload: Payload::Lifecycle {
                    kind: LifecycleKind::Join,
                    client_id: "alice".into(),
                },
            }],
            server_frame: 0,
            fps: 60,
            client_id: "alice".into(),
        });
        o.connect(Some("alice".into())).unwrap();
        assert_eq!(o.authority_client_id(), Some("alice"));
        assert!(o.is_authority());
        assert_eq!(o.active_clients(), &["alice".to_string()]);
        assert_eq!(o.tick_loop.world.interner.get_id(Namespace::CLIENT, "alice"), Some(1));
    }

    #[test]
    fn authority_handoff_picks_earliest_remaining_joiner() {
        let mut o = orchestrator();
        let join = |client: &str, frame: u32, seq: u32| InputRecord {
            seq,
            client_id: client.into(),
            frame: Some(frame),
            payload: Payload::Lifecycle {
                kind: LifecycleKind::Join,
                client_id: client.into(),
            },
        };
        o.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![join("alice", 0, 1), join("bob", 0, 2)],
            server_frame: 0,
            fps: 60,
            client_id: "alice".into(),
        });
        o.connect(Some("alice".into())).unwrap();
        assert_eq!(o.authority_client_id(), Some("alice"));

        let leave = InputRecord {
            seq: 3,
            client_id: "alice".into(),
            frame: Some(1),
            payload: Payload::Lifecycle {
                kind: LifecycleKind::Leave,
                client_id: "alice".into(),
            },
        };
        o.process_server_tick(1, vec![leave], None).unwrap();
        assert_eq!(o.authority_client_id(), Some("bob"));
    }

    #[test]
    fn majority_hash_mismatch_sets_desync_and_requests_resync() {
        let mut o = orchestrator();
        o.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![],
            server_frame: 0,
            fps: 60,
            client_id: "alice".into(),
        });
        o.connect(Some("alice".into())).unwrap();
        o.process_server_tick(1, vec![], None).unwrap();
        o.handle_majority_hash(1, 0xdeadbeef).unwrap();
        assert!(o.is_desynced());
        assert!(o.resync_pending());
        assert_eq!(o.broker().resync_requests, 1);
    }

    #[test]
    fn majority_hash_match_does_not_flag_desync() {
        let mut o = orchestrator();
        o.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![],
            server_frame: 0,
            fps: 60,
            client_id: "alice".into(),
        });
        o.connect(Some("alice".into())).unwrap();
        o.process_server_tick(1, vec![], None).unwrap();
        let local_hash = o.hash_history.get(1).unwrap();
        o.handle_majority_hash(1, local_hash).unwrap();
        assert!(!o.is_desynced());
        assert_eq!(o.broker().resync_requests, 0);
    }

    #[test]
    fn resync_snapshot_clears_desync_and_reseeds_hash_history() {
        let mut authority = orchestrator();
        authority.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![],
            server_frame: 0,
            fps: 60,
            client_id: "authority".into(),
        });
        authority.connect(Some("authority".into())).unwrap();
        authority.tick_loop.world.spawn("coin", None, false, &[]).unwrap();
        authority.process_server_tick(1, vec![], None).unwrap();
        let snapshot_bytes = convergence_snapshot::codec::encode(&authority.tick_loop.world, &authority.tick_loop.rng, 1, 1);

        let mut peer = orchestrator();
        peer.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![],
            server_frame: 0,
            fps: 60,
            client_id: "peer".into(),
        });
        peer.connect(Some("peer".into())).unwrap();
        peer.is_desynced = true;
        peer.resync_pending = true;

        peer.handle_resync_snapshot(&snapshot_bytes, 1, vec![]).unwrap();
        assert!(!peer.is_desynced());
        assert!(!peer.resync_pending());
        assert_eq!(peer.last_processed_frame(), 1);
        assert_eq!(peer.tick_loop.world.active_ids_ascending().len(), 1);
    }

    #[test]
    fn gap_beyond_max_catchup_requests_resync_instead_of_replaying() {
        let mut o = orchestrator();
        let bytes = convergence_snapshot::codec::encode(&o.tick_loop.world, &o.tick_loop.rng, 0, 1);
        o.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: Some(bytes),
            pending_inputs: vec![],
            server_frame: MAX_CATCHUP_FRAMES + 50,
            fps: 60,
            client_id: "late".into(),
        });
        o.connect(Some("late".into())).unwrap();
        assert!(o.resync_pending());
        assert_eq!(o.broker().resync_requests, 1);
    }

    #[test]
    fn single_active_client_skips_continuous_sync_sends() {
        let mut o = orchestrator();
        o.broker_mut().connect_ack = Some(ConnectAck {
            snapshot: None,
            pending_inputs: vec![],
            server_frame: 0,
            fps: 60,
            client_id: "solo".into(),
        });
        o.connect(Some("solo".into())).unwrap();
        o.tick_loop.world.spawn("coin", None, false, &[]).unwrap();
        o.process_server_tick(1, vec![], None).unwrap();
        assert!(o.broker().sent_partitions.is_empty());
    }
}
