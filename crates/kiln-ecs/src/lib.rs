//! Kiln ECS -- the entity registry behind Kiln scenes.
//!
//! Entities are generational handles into a sparse-set component store. On
//! top of raw storage the registry keeps a UUID identity per entity, names,
//! tags, a parent/child hierarchy stored as intrusive sibling lists,
//! component access by registered name, script lifecycle events and a
//! frame-deferred destroy queue. Scenes round-trip through a generic
//! [`Node`](serialize::Node) tree.
//!
//! # Quick Start
//!
//! ```
//! use kiln_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health(u32);
//!
//! EntityRegistry::register_component::<Health>("Health");
//!
//! let mut registry = EntityRegistry::new();
//! let player = registry.create_named("Player");
//! let sword = registry.create_named("Sword");
//! registry.set_parent(sword, player);
//! registry.emplace(player, Health(100)).unwrap();
//!
//! assert_eq!(registry.get_child(player, 0), Some(sword));
//! assert_eq!(registry.try_get::<Health>(player), Some(&Health(100)));
//!
//! registry.destroy(player, true);
//! registry.destroy_queued();
//! assert!(registry.is_empty());
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod destroy;
pub mod entity;
pub mod hierarchy;
pub mod identity;
pub mod registry;
pub mod script;
pub mod serialize;
pub mod storage;
pub mod types;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::Entity },

    /// A component name was used that has not been registered.
    #[error("component '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// A UUID is already bound to a live entity.
    #[error("identity {id} is already bound to a live entity")]
    IdentityCollision { id: uuid::Uuid },

    /// The nil UUID cannot identify an entity.
    #[error("the nil UUID cannot identify an entity")]
    NilIdentity,

    /// A serialized entity lists the same component twice.
    #[error("entity '{entity}' lists component '{component}' more than once")]
    DuplicateComponent { entity: String, component: String },

    /// Serializing or deserializing a component value failed.
    #[error("failed to (de)serialize component '{component}': {details}")]
    ComponentDeserialization { component: String, details: String },

    /// A generic mutator was used on a component the registry maintains
    /// itself (tags, hierarchy links).
    #[error("component '{component}' is maintained by the registry")]
    ManagedComponent { component: &'static str },

    /// Hierarchy or index bookkeeping is inconsistent.
    #[error("registry invariant violated: {0}")]
    InvariantViolation(String),

    /// A configuration document could not be parsed.
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),
}

/// Log `err` and abort the current operation by panicking.
#[track_caller]
pub fn fatal(err: RegistryError) -> ! {
    tracing::error!(error = %err, "fatal registry error");
    panic!("{err}");
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{
        Component, ComponentValue, DirtyComponent, EnabledComponent, NameComponent,
        RenderableComponent, TagComponent, TransformComponent,
    };
    pub use crate::config::{InvariantPolicy, RegistryConfig};
    pub use crate::destroy::DestroyReport;
    pub use crate::entity::Entity;
    pub use crate::hierarchy::RelationshipComponent;
    pub use crate::registry::EntityRegistry;
    pub use crate::script::{
        OnDestroy, OnDisable, OnEnable, OnLoad, OnUnload, OnUpdate, ScriptEvent, ScriptHost,
        Scriptable,
    };
    pub use crate::serialize::Node;
    pub use crate::RegistryError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
