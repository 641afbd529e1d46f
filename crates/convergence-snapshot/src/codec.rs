//! Sparse, type-indexed snapshot codec.
//!
//! Binary framing: `u32 metaLen | metaBytes | u32 maskLen | maskBytes |
//! componentBytes*`, little-endian throughout. `meta` carries everything
//! except the bulk numeric field data, which is packed as one contiguous
//! little-endian buffer of 32-bit words (`componentBytes`), visited in the
//! same ascending-eid / registration-order / name-sorted-field order the
//! state hash uses. `maskBytes` is a bincode-encoded `Vec<u64>` bitset, one
//! bit per entity index, set exactly for the indices `meta.entities` lists
//! — a cheap redundant cross-check `decode` validates before trusting the
//! meta section.

use convergence_ecs::entity::{AllocatorSnapshot, EntityId};
use convergence_ecs::interner::InternerSnapshot;
use convergence_ecs::world::World;
use convergence_math::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::hash::state_hash;

pub const FORMAT_TAG: u8 = 5;

/// Full-content digest of an encoded snapshot, for replay-log and
/// diagnostic correlation. Distinct from `state_hash`'s 32-bit wire hash:
/// this is a 256-bit `blake3` hex digest over the *entire* encoded buffer
/// (meta, mask, and component bytes alike), never transmitted as part of
/// the consensus protocol.
pub fn content_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityMetaWire {
    eid: u32,
    type_index: u32,
    client_index: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TypeSchemaWire {
    type_name: String,
    /// `(component_name, fields_to_sync)` pairs in the order the type's
    /// definition declares its components.
    components: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotMeta {
    frame: u32,
    seq: u64,
    types: Vec<TypeSchemaWire>,
    entities: Vec<EntityMetaWire>,
    allocator: AllocatorSnapshot,
    interner: InternerSnapshot,
    rng_state: u32,
    client_id_map: Vec<String>,
    hash: Option<u32>,
}

/// Outcome of a decode: the snapshot that was loaded plus whether its
/// declared hash (if any) matched the freshly computed one. A mismatch is
/// logged, not fatal — the loaded state is kept either way.
pub struct DecodeOutcome {
    pub frame: u32,
    pub seq: u64,
    pub hash_mismatch: Option<(u32, u32)>,
}

/// Builds a one-bit-per-entity-index bitmask, set for every index `indices`
/// yields.
fn entity_bitmask(indices: impl Iterator<Item = u32>) -> Vec<u64> {
    let mut words = Vec::new();
    for index in indices {
        let index = index as usize;
        let word = index / 64;
        if words.len() <= word {
            words.resize(word + 1, 0u64);
        }
        words[word] |= 1u64 << (index % 64);
    }
    words
}

/// Encodes the sparse snapshot of every networked entity in `world`.
/// Entities whose definition has `sync_fields = []` (syncNone) are
/// skipped entirely, and local-only entities never appear.
pub fn encode(world: &World, rng: &Rng, frame: u32, seq: u64) -> Vec<u8> {
    let ids: Vec<EntityId> = world
        .active_ids_ascending()
        .into_iter()
        .filter(|id| !id.is_local_only())
        .filter(|id| {
            world
                .type_of(*id)
                .and_then(|t| world.definitions.get(t))
                .map(|d| !d.is_sync_none())
                .unwrap_or(false)
        })
        .collect();

    let mut types: Vec<TypeSchemaWire> = Vec::new();
    let mut type_index_of: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut client_ids: Vec<String> = Vec::new();
    let mut client_index_of: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut entities = Vec::with_capacity(ids.len());
    let mut component_bytes = Vec::new();

    for id in &ids {
        let type_name = world.type_of(*id).unwrap().to_owned();
        let type_index = *type_index_of.entry(type_name.clone()).or_insert_with(|| {
            let def = world.definitions.get(&type_name).unwrap();
            let components = def
                .components
                .iter()
                .map(|name| {
                    let fields = match &def.sync_fields {
                        Some(whitelist) => whitelist
                            .iter()
                            .filter(|(c, _)| c == name)
                            .map(|(_, f)| f.clone())
                            .collect(),
                        None => world
                            .components
                            .store_by_name(name)
                            .map(|s| s.schema.sorted_sync_field_names().iter().map(|s| s.to_string()).collect())
                            .unwrap_or_default(),
                    };
                    (name.clone(), fields)
                })
                .collect();
            types.push(TypeSchemaWire {
                type_name: type_name.clone(),
                components,
            });
            (types.len() - 1) as u32
        });

        let client_index = world.client_of(*id).map(|c| {
            *client_index_of.entry(c.clone()).or_insert_with(|| {
                client_ids.push(c.clone());
                (client_ids.len() - 1) as u32
            })
        });

        entities.push(EntityMetaWire {
            eid: id.raw(),
            type_index,
            client_index,
        });

        let schema = &types[type_index as usize];
        for (component_name, fields) in &schema.components {
            if let Some(store) = world.components.store_by_name(component_name) {
                for field in fields {
                    let word = store.field_hash_word(field, id.index());
                    component_bytes.extend_from_slice(&word.to_le_bytes());
                }
            }
        }
    }

    let meta = SnapshotMeta {
        frame,
        seq,
        types,
        entities,
        allocator: world.allocator.snapshot_state(),
        interner: world.interner.snapshot(),
        rng_state: rng.save(),
        client_id_map: client_ids,
        hash: Some(state_hash(world)),
    };

    let meta_bytes = bincode::serde::encode_to_vec(&meta, bincode::config::standard())
        .expect("snapshot meta serialization is infallible for in-memory structures");
    let mask_bytes: Vec<u8> = {
        let words = entity_bitmask(ids.iter().map(|id| id.index()));
        bincode::serde::encode_to_vec(&words, bincode::config::standard())
            .expect("mask serialization is infallible")
    };

    let mut out = Vec::with_capacity(8 + meta_bytes.len() + mask_bytes.len() + component_bytes.len());
    out.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&meta_bytes);
    out.extend_from_slice(&(mask_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&mask_bytes);
    out.extend_from_slice(&component_bytes);
    out
}

/// Decodes `bytes` into `world`, clearing existing entities first but
/// retaining registered component/entity definitions. Invokes each
/// restored entity's `on_restore` hook after field data has been written.
pub fn decode(bytes: &[u8], world: &mut World, rng: &mut Rng) -> Result<DecodeOutcome, SnapshotError> {
    if bytes.len() < 4 {
        return Err(SnapshotError::DecodeFailed {
            reason: "buffer shorter than the meta-length header".into(),
        });
    }
    let meta_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let meta_start = 4;
    let meta_end = meta_start + meta_len;
    if bytes.len() < meta_end + 4 {
        return Err(SnapshotError::DecodeFailed {
            reason: "buffer truncated before mask-length header".into(),
        });
    }
    let (meta, _): (SnapshotMeta, usize) =
        bincode::serde::decode_from_slice(&bytes[meta_start..meta_end], bincode::config::standard())
            .map_err(|e| SnapshotError::DecodeFailed {
                reason: format!("meta decode: {e}"),
            })?;

    let mask_len = u32::from_le_bytes(bytes[meta_end..meta_end + 4].try_into().unwrap()) as usize;
    let mask_start = meta_end + 4;
    let mask_end = mask_start + mask_len;
    if bytes.len() < mask_end {
        return Err(SnapshotError::DecodeFailed {
            reason: "buffer truncated before mask body".into(),
        });
    }
    let (mask_words, _): (Vec<u64>, usize) =
        bincode::serde::decode_from_slice(&bytes[mask_start..mask_end], bincode::config::standard())
            .map_err(|e| SnapshotError::DecodeFailed {
                reason: format!("mask decode: {e}"),
            })?;
    let expected_mask = entity_bitmask(meta.entities.iter().map(|e| EntityId(e.eid).index()));
    if mask_words != expected_mask {
        return Err(SnapshotError::DecodeFailed {
            reason: "entity bitmask does not match the entities listed in meta".into(),
        });
    }
    if meta.entities.iter().any(|e| e.type_index as usize >= meta.types.len()) {
        return Err(SnapshotError::DecodeFailed {
            reason: "entity type_index out of range of the decoded type table".into(),
        });
    }
    let component_bytes = &bytes[mask_end..];

    world.clear_entities();
    world.allocator.restore_from_snapshot(&meta.allocator);
    world.interner.restore(&meta.interner);
    rng.load(meta.rng_state);

    let mut cursor = 0usize;
    let mut restored_ids = Vec::with_capacity(meta.entities.len());
    for entity in &meta.entities {
        let id = EntityId(entity.eid);
        let client = entity
            .client_index
            .and_then(|idx| meta.client_id_map.get(idx as usize).cloned());
        let type_schema = &meta.types[entity.type_index as usize];
        world
            .spawn_with_id(id, &type_schema.type_name, client)
            .map_err(SnapshotError::from)?;
        for (component_name, fields) in &type_schema.components {
            for field in fields {
                if cursor + 4 > component_bytes.len() {
                    return Err(SnapshotError::DecodeFailed {
                        reason: "component byte buffer underrun".into(),
                    });
                }
                let word = u32::from_le_bytes(component_bytes[cursor..cursor + 4].try_into().unwrap());
                cursor += 4;
                if let Some(store) = world.components.store_by_name_mut(component_name) {
                    store.set_i32(field, id.index(), word as i32);
                }
            }
        }
        restored_ids.push(id);
    }

    for id in &restored_ids {
        if let Some(type_name) = world.type_of(*id).map(|s| s.to_owned()) {
            if let Some(hook) = world.definitions.get(&type_name).and_then(|d| d.on_restore) {
                hook(world, *id);
            }
        }
    }

    let actual = state_hash(world);
    let hash_mismatch = match meta.hash {
        Some(expected) if expected != actual => {
            tracing::warn!(
                expected,
                actual,
                content_digest = %content_digest(bytes),
                "loaded snapshot hash mismatch; proceeding with loaded state"
            );
            Some((expected, actual))
        }
        _ => None,
    };

    Ok(DecodeOutcome {
        frame: meta.frame,
        seq: meta.seq,
        hash_mismatch,
    })
}
