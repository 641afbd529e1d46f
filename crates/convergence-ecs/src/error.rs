use thiserror::Error;

/// Error taxonomy for the simulation kernel, covering the ECS half;
/// sync/network errors live in `convergence-sync::error`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EcsError {
    #[error("entity {entity} is stale: generation has advanced or index was never allocated")]
    StaleEntity { entity: u32 },

    #[error("allocator exhausted: capacity is {max_entities} entities")]
    CapacityExceeded { max_entities: u32 },

    #[error("spawn of undefined entity type {type_name:?}")]
    UnknownEntityType { type_name: String },

    #[error("unknown component {name:?}; registered components are {registered:?}")]
    UnknownComponent {
        name: String,
        registered: Vec<String>,
    },

    #[error("component {component:?} declared a synced f32 field {field:?}, which is forbidden")]
    SyncedFloat { component: String, field: String },

    #[error("a system returned a suspending value during phase {phase:?}; ticks may not suspend")]
    AsyncSystemDetected { phase: String },

    #[error("scheduler dependency cycle detected starting at system {system:?}")]
    DependencyCycle { system: String },
}
