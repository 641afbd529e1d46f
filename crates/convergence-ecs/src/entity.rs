//! Entity identifiers and the generational slot allocator.
//!
//! The bit layout follows the wire-format contract: a reserved top bit, a
//! local-only tag, a generation field, and a slot index. The generation
//! and local-only fields share a width budget originally meant for
//! generation alone, so the generation counter here wraps modulo
//! [`EntityId::GENERATION_MODULUS`] (1024, i.e. 10 bits) rather than the
//! full 12 bits — entities have reassigned that headroom to the
//! local-only tag. See `DESIGN.md` for the full resolution of this
//! naming conflict.

use std::collections::HashMap;

use crate::error::EcsError;

/// Maximum number of live entity slots: `2^20`.
pub const MAX_ENTITIES: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl EntityId {
    pub const RESERVED_BIT: u32 = 1 << 31;
    pub const LOCAL_ONLY_BIT: u32 = 1 << 30;
    pub const GENERATION_BITS: u32 = 10;
    pub const GENERATION_SHIFT: u32 = 20;
    pub const GENERATION_MASK: u32 = ((1 << Self::GENERATION_BITS) - 1) << Self::GENERATION_SHIFT;
    pub const INDEX_BITS: u32 = 20;
    pub const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;
    pub const GENERATION_MODULUS: u32 = 1 << Self::GENERATION_BITS;

    pub fn new(index: u32, generation: u32, local_only: bool) -> EntityId {
        debug_assert!(index < MAX_ENTITIES);
        let gen = (generation % Self::GENERATION_MODULUS) << Self::GENERATION_SHIFT;
        let local = if local_only { Self::LOCAL_ONLY_BIT } else { 0 };
        EntityId(gen | local | (index & Self::INDEX_MASK))
    }

    pub fn index(self) -> u32 {
        self.0 & Self::INDEX_MASK
    }

    pub fn generation(self) -> u32 {
        (self.0 & Self::GENERATION_MASK) >> Self::GENERATION_SHIFT
    }

    pub fn is_local_only(self) -> bool {
        self.0 & Self::LOCAL_ONLY_BIT != 0
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

use serde::{Deserialize, Serialize};

/// Generational slot allocator. The free list is kept sorted ascending so
/// that `allocate` always reuses the smallest free index first — the
/// mandatory tie-break for cross-peer determinism.
#[derive(Debug, Clone)]
pub struct EntityAllocator {
    next_index: u32,
    free_list: Vec<u32>,
    generations: Vec<u32>,
    alive: Vec<bool>,
}

impl Default for EntityAllocator {
    fn default() -> EntityAllocator {
        EntityAllocator::new()
    }
}

impl EntityAllocator {
    pub fn new() -> EntityAllocator {
        EntityAllocator {
            next_index: 0,
            free_list: Vec::new(),
            generations: Vec::new(),
            alive: Vec::new(),
        }
    }

    fn ensure_slot(&mut self, index: u32) {
        let needed = index as usize + 1;
        if self.generations.len() < needed {
            self.generations.resize(needed, 0);
            self.alive.resize(needed, false);
        }
    }

    pub fn allocate(&mut self, local_only: bool) -> Result<EntityId, EcsError> {
        let index = if let Some(pos) = self.free_list.first().copied() {
            self.free_list.remove(0);
            pos
        } else {
            if self.next_index >= MAX_ENTITIES {
                return Err(EcsError::CapacityExceeded {
                    max_entities: MAX_ENTITIES,
                });
            }
            let idx = self.next_index;
            self.next_index += 1;
            idx
        };
        self.ensure_slot(index);
        self.alive[index as usize] = true;
        let generation = self.generations[index as usize];
        Ok(EntityId::new(index, generation, local_only))
    }

    pub fn free(&mut self, id: EntityId) -> Result<(), EcsError> {
        let index = id.index();
        if !self.is_alive(id) {
            return Err(EcsError::StaleEntity { entity: id.raw() });
        }
        self.alive[index as usize] = false;
        self.generations[index as usize] =
            (self.generations[index as usize] + 1) % EntityId::GENERATION_MODULUS;
        self.insert_sorted(index);
        Ok(())
    }

    fn insert_sorted(&mut self, index: u32) {
        let pos = self.free_list.partition_point(|&x| x < index);
        self.free_list.insert(pos, index);
    }

    /// Restores a specific id from a snapshot, extending `next_index` and
    /// the generation table as required.
    pub fn allocate_specific(&mut self, id: EntityId) -> Result<(), EcsError> {
        let index = id.index();
        if index >= MAX_ENTITIES {
            return Err(EcsError::CapacityExceeded {
                max_entities: MAX_ENTITIES,
            });
        }
        self.ensure_slot(index);
        if index >= self.next_index {
            // any indices strictly between old next_index and this one
            // become free slots, preserving allocator invariants.
            for gap in self.next_index..index {
                self.insert_sorted(gap);
            }
            self.next_index = index + 1;
        } else {
            self.free_list.retain(|&x| x != index);
        }
        self.alive[index as usize] = true;
        self.generations[index as usize] = id.generation();
        Ok(())
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        let index = id.index() as usize;
        index < self.alive.len()
            && self.alive[index]
            && self.generations[index] == id.generation()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn generations(&self) -> &[u32] {
        &self.generations
    }

    pub fn free_list(&self) -> &[u32] {
        &self.free_list
    }

    /// A wire-stable snapshot of allocator state, carried in the world
    /// snapshot's allocator-state field.
    pub fn snapshot_state(&self) -> AllocatorSnapshot {
        AllocatorSnapshot {
            next_index: self.next_index,
            free_list: self.free_list.clone(),
            generations: self.generations.clone(),
        }
    }

    pub fn restore_from_snapshot(&mut self, snap: &AllocatorSnapshot) {
        self.next_index = snap.next_index;
        self.free_list = snap.free_list.clone();
        self.generations = snap.generations.clone();
        self.alive = vec![false; self.generations.len()];
        let free: std::collections::HashSet<u32> = self.free_list.iter().copied().collect();
        for idx in 0..self.next_index {
            if !free.contains(&idx) {
                if (idx as usize) < self.alive.len() {
                    self.alive[idx as usize] = true;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    pub next_index: u32,
    pub free_list: Vec<u32>,
    pub generations: Vec<u32>,
}

/// Accepts either generation wire shape on decode (dense array, or sparse
/// `index -> generation` map) and always produces
/// the dense array — the single canonical form this implementation emits.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GenerationsWire {
    Array(Vec<u32>),
    Sparse(HashMap<u32, u32>),
}

impl GenerationsWire {
    pub fn into_dense(self, len_hint: usize) -> Vec<u32> {
        match self {
            GenerationsWire::Array(v) => v,
            GenerationsWire::Sparse(map) => {
                let max_index = map.keys().copied().max().map(|m| m as usize + 1).unwrap_or(0);
                let mut dense = vec![0u32; max_index.max(len_hint)];
                for (idx, gen) in map {
                    dense[idx as usize] = gen;
                }
                dense
            }
        }
    }
}
