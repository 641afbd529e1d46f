//! Deterministic query engine over type and component indices.
//!
//! A [`Query`] snapshots its matching entity ids at construction time: any
//! entity destroyed afterward is filtered out during iteration, and any
//! entity created afterward is never visited.

use crate::component::BitSet;
use crate::entity::EntityId;
use crate::world::World;

pub struct Query {
    ids: Vec<EntityId>,
}

impl Query {
    /// Entities matching every named component, ascending by eid. Starts
    /// intersection from the smallest participating mask.
    pub fn with_components(world: &World, component_names: &[&str]) -> Query {
        let mut masks: Vec<&BitSet> = Vec::with_capacity(component_names.len());
        for name in component_names {
            if let Some(store) = world.components.store_by_name(name) {
                masks.push(&store.mask);
            } else {
                return Query { ids: Vec::new() };
            }
        }
        if masks.is_empty() {
            return Query {
                ids: world.active_ids_ascending(),
            };
        }
        masks.sort_by_key(|m| m.count());
        let mut acc: Vec<usize> = masks[0].iter_ascending().collect();
        for mask in &masks[1..] {
            let mut next = Vec::new();
            for &idx in &acc {
                if mask.get(idx) {
                    next.push(idx);
                }
            }
            acc = next;
        }
        acc.sort_unstable();
        let ids = acc
            .into_iter()
            .filter(|&idx| world.active_bits().get(idx))
            .map(|idx| world.reconstruct_id(idx))
            .collect();
        Query { ids }
    }

    pub fn with_type(world: &World, type_name: &str) -> Query {
        let ids = match world.type_bits(type_name) {
            Some(bits) => bits
                .iter_ascending()
                .filter(|&idx| world.active_bits().get(idx))
                .map(|idx| world.reconstruct_id(idx))
                .collect(),
            None => Vec::new(),
        };
        Query { ids }
    }

    /// Iterates the snapshot, skipping any entity destroyed since the
    /// query was constructed.
    pub fn iter<'a>(&'a self, world: &'a World) -> impl Iterator<Item = EntityId> + 'a {
        self.ids.iter().copied().filter(move |&id| world.is_alive(id))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
