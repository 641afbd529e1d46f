//! Stable 32-bit consensus state hash.
//!
//! Visits, in ascending eid order, each entity's components in
//! registration order and each component's synced fields in name-sorted
//! order, mixing every field's raw 32-bit word through an xxhash32-style
//! avalanche finalizer. Local-only entities are excluded entirely.

use std::collections::BTreeMap;

use convergence_ecs::world::World;

const PRIME_1: u32 = 0x9E3779B1;
const PRIME_2: u32 = 0x85EBCA77;
const PRIME_3: u32 = 0xC2B2AE3D;
const PRIME_5: u32 = 0x165667B1;

/// xxhash32-style avalanche finalizer: folds one more 32-bit word into the
/// running accumulator.
fn mix32(acc: u32, word: u32) -> u32 {
    let mut h = acc ^ word.wrapping_mul(PRIME_2);
    h = h.rotate_left(13);
    h = h.wrapping_mul(PRIME_1);
    h
}

fn avalanche(mut h: u32) -> u32 {
    h ^= h >> 15;
    h = h.wrapping_mul(PRIME_2);
    h ^= h >> 13;
    h = h.wrapping_mul(PRIME_3);
    h ^= h >> 16;
    h
}

/// Computes the consensus state hash over every synced, non-local-only
/// entity currently active in `world`.
pub fn state_hash(world: &World) -> u32 {
    let mut acc = PRIME_5;
    for id in world.active_ids_ascending() {
        if id.is_local_only() {
            continue;
        }
        let Some(type_name) = world.type_of(id) else {
            continue;
        };
        let Some(def) = world.definitions.get(type_name) else {
            continue;
        };
        if def.is_sync_none() {
            continue;
        }
        acc = mix32(acc, id.raw());
        for component_name in &def.components {
            let Some(store) = world.components.store_by_name(component_name) else {
                continue;
            };
            if !store.schema.sync || !store.has(id.index()) {
                continue;
            }
            for field in store.schema.sorted_sync_field_names() {
                acc = mix32(acc, store.field_hash_word(field, id.index()));
            }
        }
    }
    avalanche(acc)
}

/// Bounded `frame -> hash` history with retention window `W`; oldest
/// frames are evicted once the window is exceeded.
#[derive(Debug, Clone, Default)]
pub struct HashHistory {
    window: usize,
    entries: BTreeMap<u32, u32>,
}

impl HashHistory {
    pub fn new(window: usize) -> HashHistory {
        HashHistory {
            window,
            entries: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, frame: u32, hash: u32) {
        self.entries.insert(frame, hash);
        while self.entries.len() > self.window {
            if let Some(&oldest) = self.entries.keys().next() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, frame: u32) -> Option<u32> {
        self.entries.get(&frame).copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence_ecs::component::{ComponentSchema, FieldDefault, FieldSchema, FieldType};
    use convergence_ecs::registry::EntityDefinition;

    fn setup() -> World {
        let mut world = World::new();
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
        world
    }

    #[test]
    fn identical_worlds_produce_identical_hashes() {
        let mut a = setup();
        let mut b = setup();
        a.spawn("coin", None, false, &[]).unwrap();
        b.spawn("coin", None, false, &[]).unwrap();
        assert_eq!(state_hash(&a), state_hash(&b));
    }

    #[test]
    fn differing_field_value_changes_the_hash() {
        let mut world = setup();
        let id = world.spawn("coin", None, false, &[]).unwrap();
        let before = state_hash(&world);
        world
            .components
            .store_by_name_mut("transform")
            .unwrap()
            .set_i32("x", id.index(), 42);
        let after = state_hash(&world);
        assert_ne!(before, after);
    }

    #[test]
    fn local_only_entities_are_excluded_from_the_hash() {
        let mut world = setup();
        world.spawn("coin", None, false, &[]).unwrap();
        let with_networked = state_hash(&world);
        world.spawn("coin", None, true, &[]).unwrap();
        let with_local_only_added = state_hash(&world);
        assert_eq!(with_networked, with_local_only_added);
    }

    #[test]
    fn hash_history_evicts_frames_outside_the_retention_window() {
        let mut history = HashHistory::new(3);
        for frame in 0..5 {
            history.record(frame, frame * 10);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.get(0), None);
        assert_eq!(history.get(4), Some(40));
    }

    #[test]
    fn entity_set_change_affects_the_hash_even_with_identical_field_values() {
        let mut a = setup();
        let mut b = setup();
        a.spawn("coin", None, false, &[]).unwrap();
        a.spawn("coin", None, false, &[]).unwrap();
        b.spawn("coin", None, false, &[]).unwrap();
        assert_ne!(state_hash(&a), state_hash(&b));
    }
}
