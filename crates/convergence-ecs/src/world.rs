//! The entity table: per-entity metadata plus the spawn/destroy lifecycle.
//!
//! A flat table over the SoA [`ComponentRegistry`], not an archetype table:
//! entities never move storage location on insert/remove, components are
//! just mask bits.

use std::collections::HashMap;

use crate::component::{BitSet, ComponentSchema, FieldDefault};
use crate::entity::{EntityAllocator, EntityId};
use crate::error::EcsError;
use crate::interner::{Interner, Namespace};
use crate::registry::{ComponentRegistry, EntityDefinition, EntityDefinitionRegistry};

pub type ClientId = String;

#[derive(Debug, Clone, Default)]
pub struct EntityMeta {
    pub type_name: Option<String>,
    pub client_id: Option<ClientId>,
    /// One word of per-entity scratch space systems may use for buffered
    /// input (e.g. the physics stepper's last-applied movement command).
    pub input_cache: i32,
    /// Mirrors the `local_only` bit baked into this entity's id at spawn
    /// time; the allocator's generation table doesn't carry it, so it has
    /// to live here for every later id reconstruction to see it.
    pub local_only: bool,
}

pub struct World {
    pub allocator: EntityAllocator,
    pub components: ComponentRegistry,
    pub definitions: EntityDefinitionRegistry,
    /// Interns component/entity-type names at registration time and
    /// client ids at join time, so the snapshot codec has real,
    /// non-empty interner state to carry across peers rather than an
    /// always-empty table.
    pub interner: Interner,
    active: BitSet,
    meta: Vec<EntityMeta>,
    client_to_entity: HashMap<ClientId, EntityId>,
    type_index: HashMap<String, BitSet>,
}

impl Default for World {
    fn default() -> World {
        World::new()
    }
}

impl World {
    pub fn new() -> World {
        World {
            allocator: EntityAllocator::new(),
            components: ComponentRegistry::new(),
            definitions: EntityDefinitionRegistry::new(),
            interner: Interner::new(),
            active: BitSet::new(),
            meta: Vec::new(),
            client_to_entity: HashMap::new(),
            type_index: HashMap::new(),
        }
    }

    pub fn register_component(&mut self, schema: ComponentSchema) -> Result<(), EcsError> {
        self.interner.intern(Namespace::COMPONENT, &schema.name);
        self.components.register(schema)?;
        Ok(())
    }

    pub fn register_definition(&mut self, def: EntityDefinition) {
        self.interner.intern(Namespace::ENTITY_TYPE, &def.type_name);
        self.definitions.register(def);
    }

    fn ensure_meta(&mut self, index: usize) {
        if self.meta.len() <= index {
            self.meta.resize(index + 1, EntityMeta::default());
        }
    }

    /// Spawns a new entity of `type_name`, allocating the next id, marking
    /// its definition's components present with their defaults, then
    /// applying `props` as overrides: each `(field_name, value)` pair is
    /// routed to the first of the definition's components (in declaration
    /// order) that owns a field by that name. A name matching no field on
    /// any attached component is silently ignored.
    pub fn spawn(
        &mut self,
        type_name: &str,
        client_id: Option<ClientId>,
        local_only: bool,
        props: &[(&str, FieldDefault)],
    ) -> Result<EntityId, EcsError> {
        let id = self.allocator.allocate(local_only)?;
        self.attach(id, type_name, client_id)?;
        self.apply_props(id, type_name, props);
        Ok(id)
    }

    fn apply_props(&mut self, id: EntityId, type_name: &str, props: &[(&str, FieldDefault)]) {
        if props.is_empty() {
            return;
        }
        let Some(components) = self.definitions.get(type_name).map(|d| d.components.clone()) else {
            return;
        };
        let index = id.index();
        for &(field_name, value) in props {
            for component_name in &components {
                let Some(store) = self.components.store_by_name_mut(component_name) else {
                    continue;
                };
                if store.field_index(field_name).is_none() {
                    continue;
                }
                match value {
                    FieldDefault::I32(v) => store.set_i32(field_name, index, v),
                    FieldDefault::U8(v) => store.set_u8(field_name, index, v),
                    FieldDefault::Bool(v) => store.set_bool(field_name, index, v),
                    FieldDefault::F32(v) => store.set_f32(field_name, index, v),
                }
                break;
            }
        }
    }

    /// Spawns with a caller-specified id, used exclusively by the
    /// snapshot decoder when restoring entities at their original ids.
    pub fn spawn_with_id(
        &mut self,
        id: EntityId,
        type_name: &str,
        client_id: Option<ClientId>,
    ) -> Result<(), EcsError> {
        self.allocator.allocate_specific(id)?;
        self.attach(id, type_name, client_id)
    }

    fn attach(
        &mut self,
        id: EntityId,
        type_name: &str,
        client_id: Option<ClientId>,
    ) -> Result<(), EcsError> {
        let def = self
            .definitions
            .get(type_name)
            .ok_or_else(|| EcsError::UnknownEntityType {
                type_name: type_name.to_owned(),
            })?
            .clone();
        let index = id.index();
        self.ensure_meta(index as usize);
        self.active.set(index as usize, true);
        self.meta[index as usize] = EntityMeta {
            type_name: Some(type_name.to_owned()),
            client_id: client_id.clone(),
            input_cache: 0,
            local_only: id.is_local_only(),
        };
        self.type_index
            .entry(type_name.to_owned())
            .or_default()
            .set(index as usize, true);
        if let Some(client) = client_id {
            self.client_to_entity.insert(client, id);
        }
        for component_name in &def.components {
            if let Some(store) = self.components.store_by_name_mut(component_name) {
                store.add(index);
            }
        }
        Ok(())
    }

    pub fn destroy(&mut self, id: EntityId) -> Result<(), EcsError> {
        if !self.is_alive(id) {
            return Err(EcsError::StaleEntity { entity: id.raw() });
        }
        let index = id.index();
        if let Some(type_name) = self.meta[index as usize].type_name.clone() {
            if let Some(bits) = self.type_index.get_mut(&type_name) {
                bits.set(index as usize, false);
            }
            if let Some(def) = self.definitions.get(&type_name) {
                for component_name in def.components.clone() {
                    if let Some(store) = self.components.store_by_name_mut(&component_name) {
                        store.remove(index);
                    }
                }
            }
        }
        if let Some(client) = self.meta[index as usize].client_id.take() {
            self.client_to_entity.remove(&client);
        }
        self.active.set(index as usize, false);
        self.allocator.free(id)?;
        Ok(())
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.allocator.is_alive(id) && self.active.get(id.index() as usize)
    }

    pub fn type_of(&self, id: EntityId) -> Option<&str> {
        self.meta
            .get(id.index() as usize)
            .and_then(|m| m.type_name.as_deref())
    }

    pub fn client_of(&self, id: EntityId) -> Option<&ClientId> {
        self.meta.get(id.index() as usize).and_then(|m| m.client_id.as_ref())
    }

    pub fn entity_of_client(&self, client: &str) -> Option<EntityId> {
        self.client_to_entity.get(client).copied()
    }

    pub fn input_cache(&self, id: EntityId) -> i32 {
        self.meta
            .get(id.index() as usize)
            .map(|m| m.input_cache)
            .unwrap_or(0)
    }

    pub fn set_input_cache(&mut self, id: EntityId, value: i32) {
        let index = id.index() as usize;
        self.ensure_meta(index);
        self.meta[index].input_cache = value;
    }

    pub fn active_bits(&self) -> &BitSet {
        &self.active
    }

    pub fn type_bits(&self, type_name: &str) -> Option<&BitSet> {
        self.type_index.get(type_name)
    }

    /// Ascending active entity ids, reconstructing [`EntityId`]s from the
    /// allocator's current generation table.
    pub fn active_ids_ascending(&self) -> Vec<EntityId> {
        self.active.iter_ascending().map(|index| self.reconstruct_id(index)).collect()
    }

    /// Rebuilds the [`EntityId`] for a live table `index`, restoring the
    /// `local_only` bit from [`EntityMeta`] since the allocator's
    /// generation table doesn't carry it.
    pub fn reconstruct_id(&self, index: usize) -> EntityId {
        let gen = self.allocator.generations()[index];
        let local_only = self.meta.get(index).map(|m| m.local_only).unwrap_or(false);
        EntityId::new(index as u32, gen, local_only)
    }

    /// Clears all entities and components but retains registered
    /// definitions/component schemas, so a decoded snapshot can restore
    /// into a world that already knows its entity types.
    pub fn clear_entities(&mut self) {
        self.allocator = EntityAllocator::new();
        self.active = BitSet::new();
        self.meta.clear();
        self.client_to_entity.clear();
        self.type_index.clear();
        let names: Vec<String> = self.components.registered_names().to_vec();
        for name in names {
            if let Some(store) = self.components.store_by_name_mut(&name) {
                store.mask = BitSet::new();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentSchema, FieldDefault, FieldSchema, FieldType};

    fn setup() -> World {
        let mut world = World::new();
        world
            .register_component(ComponentSchema {
                name: "health".into(),
                fields: vec![FieldSchema {
                    name: "hp".into(),
                    ty: FieldType::I32,
                    default: FieldDefault::I32(10),
                }],
                sync: true,
            })
            .unwrap();
        world.register_definition(EntityDefinition {
            type_name: "player".into(),
            components: vec!["health".into()],
            sync_fields: None,
            on_restore: None,
        });
        world
    }

    #[test]
    fn spawn_unknown_type_is_an_error() {
        let mut world = World::new();
        assert!(matches!(
            world.spawn("ghost", None, false, &[]),
            Err(EcsError::UnknownEntityType { .. })
        ));
    }

    #[test]
    fn spawn_attaches_definition_components_with_defaults() {
        let mut world = setup();
        let id = world.spawn("player", None, false, &[]).unwrap();
        assert!(world.components.store_by_name("health").unwrap().has(id.index()));
        assert_eq!(
            world.components.store_by_name("health").unwrap().get_i32("hp", id.index()),
            Some(10)
        );
    }

    #[test]
    fn spawn_props_override_default_and_route_to_owning_component() {
        let mut world = setup();
        let id = world.spawn("player", None, false, &[("hp", FieldDefault::I32(42))]).unwrap();
        assert_eq!(world.components.store_by_name("health").unwrap().get_i32("hp", id.index()), Some(42));
    }

    #[test]
    fn spawn_props_with_unknown_field_name_are_ignored() {
        let mut world = setup();
        let id = world.spawn("player", None, false, &[("no_such_field", FieldDefault::I32(1))]).unwrap();
        assert_eq!(world.components.store_by_name("health").unwrap().get_i32("hp", id.index()), Some(10));
    }

    #[test]
    fn destroy_removes_components_and_frees_id() {
        let mut world = setup();
        let id = world.spawn("player", None, false, &[]).unwrap();
        world.destroy(id).unwrap();
        assert!(!world.is_alive(id));
        assert!(!world.components.store_by_name("health").unwrap().has(id.index()));
    }

    #[test]
    fn client_binding_roundtrips_through_entity_of_client() {
        let mut world = setup();
        let id = world.spawn("player", Some("alice".into()), false, &[]).unwrap();
        assert_eq!(world.entity_of_client("alice"), Some(id));
        world.destroy(id).unwrap();
        assert_eq!(world.entity_of_client("alice"), None);
    }

    #[test]
    fn active_ids_ascending_reflects_spawn_order_by_index() {
        let mut world = setup();
        let a = world.spawn("player", None, false, &[]).unwrap();
        let b = world.spawn("player", None, false, &[]).unwrap();
        assert_eq!(world.active_ids_ascending(), vec![a, b]);
    }

    #[test]
    fn active_ids_ascending_preserves_the_local_only_bit() {
        let mut world = setup();
        let networked = world.spawn("player", None, false, &[]).unwrap();
        let local = world.spawn("player", None, true, &[]).unwrap();
        assert!(local.is_local_only());
        let ids = world.active_ids_ascending();
        assert_eq!(ids, vec![networked, local]);
        assert!(!ids[0].is_local_only());
        assert!(ids[1].is_local_only());
    }

    #[test]
    fn clear_entities_retains_registered_definitions() {
        let mut world = setup();
        world.spawn("player", None, false, &[]).unwrap();
        world.clear_entities();
        assert_eq!(world.active_ids_ascending().len(), 0);
        assert!(world.definitions.get("player").is_some());
    }
}
