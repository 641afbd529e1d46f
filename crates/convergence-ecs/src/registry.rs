//! Component type registry and entity-definition registry.
//!
//! Name-indexed, append-only, dedups by name. There is no
//! `TypeId`-keyed dynamic-dispatch path: every component here is
//! schema-declared, so there is no "same Rust type, different wire
//! component" case to disambiguate.

use std::collections::HashMap;

use crate::component::{ComponentSchema, ComponentStore};
use crate::error::EcsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u32);

#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_name: HashMap<String, ComponentTypeId>,
    /// Registration order is the order the state hash visits a given
    /// entity's components in.
    order: Vec<String>,
    stores: Vec<ComponentStore>,
}

impl ComponentRegistry {
    pub fn new() -> ComponentRegistry {
        ComponentRegistry::default()
    }

    pub fn register(&mut self, schema: ComponentSchema) -> Result<ComponentTypeId, EcsError> {
        if let Some(&id) = self.by_name.get(&schema.name) {
            return Ok(id); // idempotent re-registration
        }
        let store = ComponentStore::new(schema.clone())?;
        let id = ComponentTypeId(self.stores.len() as u32);
        self.by_name.insert(schema.name.clone(), id);
        self.order.push(schema.name);
        self.stores.push(store);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn registered_names(&self) -> &[String] {
        &self.order
    }

    pub fn store(&self, id: ComponentTypeId) -> &ComponentStore {
        &self.stores[id.0 as usize]
    }

    pub fn store_mut(&mut self, id: ComponentTypeId) -> &mut ComponentStore {
        &mut self.stores[id.0 as usize]
    }

    pub fn store_by_name(&self, name: &str) -> Option<&ComponentStore> {
        self.lookup(name).map(|id| self.store(id))
    }

    pub fn store_by_name_mut(&mut self, name: &str) -> Option<&mut ComponentStore> {
        let id = self.lookup(name)?;
        Some(self.store_mut(id))
    }

    pub fn iter_in_registration_order(&self) -> impl Iterator<Item = (ComponentTypeId, &ComponentStore)> {
        self.stores
            .iter()
            .enumerate()
            .map(|(i, s)| (ComponentTypeId(i as u32), s))
    }
}

/// An on-restore reconstruction hook: rebuilds non-synced state after
/// component arrays have been written by the snapshot decoder.
pub type OnRestoreHook = fn(&mut crate::world::World, crate::entity::EntityId);

#[derive(Clone)]
pub struct EntityDefinition {
    pub type_name: String,
    pub components: Vec<String>,
    /// `None` means "all synced fields of every attached component";
    /// `Some(empty)` marks the definition syncNone (never serialized).
    pub sync_fields: Option<Vec<(String, String)>>,
    pub on_restore: Option<OnRestoreHook>,
}

impl EntityDefinition {
    pub fn is_sync_none(&self) -> bool {
        matches!(&self.sync_fields, Some(v) if v.is_empty())
    }
}

#[derive(Default)]
pub struct EntityDefinitionRegistry {
    definitions: HashMap<String, EntityDefinition>,
    order: Vec<String>,
}

impl EntityDefinitionRegistry {
    pub fn new() -> EntityDefinitionRegistry {
        EntityDefinitionRegistry::default()
    }

    /// Idempotent: re-registering the same type name is a no-op, the first
    /// registration's data wins.
    pub fn register(&mut self, def: EntityDefinition) {
        if self.definitions.contains_key(&def.type_name) {
            return;
        }
        self.order.push(def.type_name.clone());
        self.definitions.insert(def.type_name.clone(), def);
    }

    pub fn get(&self, type_name: &str) -> Option<&EntityDefinition> {
        self.definitions.get(type_name)
    }

    pub fn type_names_in_first_appearance_order(&self) -> &[String] {
        &self.order
    }
}
