//! Structural-diff delta engine.
//!
//! Deltas carry only *structural* divergence (entities created or
//! destroyed) between two world states — field mutations are never
//! carried, because a deterministic simulation means every peer already
//! computed the same new values from the same inputs. `created`/`deleted`
//! are always sorted ascending by eid.

use serde::{Deserialize, Serialize};

use convergence_ecs::world::World;

use crate::hash::state_hash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEntity {
    pub eid: u32,
    pub type_name: String,
    pub client_id: Option<String>,
    /// `(component_name, field_name, raw_word)` triples, in the same
    /// registration-order / name-sorted order the snapshot codec uses.
    pub fields: Vec<(String, String, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub frame: u32,
    pub base_hash: u32,
    pub result_hash: u32,
    pub created: Vec<CreatedEntity>,
    pub deleted: Vec<u32>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

/// Ascending eids of every non-local-only entity — the set a delta/partition
/// computation diffs against. Exposed so callers (the orchestrator) can
/// cache "the eids as of the last tick" without re-deriving the filter.
pub fn networked_eids(world: &World) -> Vec<u32> {
    world
        .active_ids_ascending()
        .into_iter()
        .filter(|id| !id.is_local_only())
        .map(|id| id.raw())
        .collect()
}

fn snapshot_created_entity(world: &World, eid: u32) -> Option<CreatedEntity> {
    let id = convergence_ecs::entity::EntityId(eid);
    let type_name = world.type_of(id)?.to_owned();
    let def = world.definitions.get(&type_name)?;
    let mut fields = Vec::new();
    for component_name in &def.components {
        if let Some(store) = world.components.store_by_name(component_name) {
            if !store.schema.sync || !store.has(id.index()) {
                continue;
            }
            for field in store.schema.sorted_sync_field_names() {
                fields.push((
                    component_name.clone(),
                    field.to_string(),
                    store.field_hash_word(field, id.index()),
                ));
            }
        }
    }
    Some(CreatedEntity {
        eid,
        type_name,
        client_id: world.client_of(id).cloned(),
        fields,
    })
}

/// Computes `{frame, base_hash, result_hash, created, deleted}` between
/// `prev` and `curr`, where `prev` is the world state as of the previous
/// tick (tracked externally, e.g. via a cached entity-id set plus full
/// component snapshot) and `curr` is the current tick's world.
pub fn compute_delta(prev_eids: &[u32], curr: &World, frame: u32, base_hash: u32) -> Delta {
    let curr_eids = networked_eids(curr);
    let prev_set: std::collections::BTreeSet<u32> = prev_eids.iter().copied().collect();
    let curr_set: std::collections::BTreeSet<u32> = curr_eids.iter().copied().collect();

    let created: Vec<CreatedEntity> = curr_set
        .difference(&prev_set)
        .copied()
        .filter_map(|eid| snapshot_created_entity(curr, eid))
        .collect();
    let deleted: Vec<u32> = prev_set.difference(&curr_set).copied().collect();

    Delta {
        frame,
        base_hash,
        result_hash: state_hash(curr),
        created,
        deleted,
    }
}

/// The subset of `delta` owned by partition `p` of `n`, per `eid mod n ==
/// p`. Serialized independently so a peer only has to transmit the
/// partitions it owns.
pub fn get_partition(delta: &Delta, p: u32, n: u32) -> Delta {
    let n = n.max(1);
    Delta {
        frame: delta.frame,
        base_hash: delta.base_hash,
        result_hash: delta.result_hash,
        created: delta
            .created
            .iter()
            .filter(|e| e.eid % n == p)
            .cloned()
            .collect(),
        deleted: delta.deleted.iter().filter(|&&eid| eid % n == p).copied().collect(),
    }
}

pub fn encode_delta(delta: &Delta) -> Vec<u8> {
    bincode::serde::encode_to_vec(delta, bincode::config::standard())
        .expect("delta serialization is infallible for in-memory structures")
}

pub fn decode_delta(bytes: &[u8]) -> Result<Delta, crate::error::SnapshotError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(d, _)| d)
        .map_err(|e| crate::error::SnapshotError::DecodeFailed {
            reason: format!("delta decode: {e}"),
        })
}
