//! Process-wide component type table.
//!
//! Maps a component's external name to a [`ComponentOps`] object that can
//! emplace, get and erase that component on any [`EntityRegistry`] without
//! the caller knowing the Rust type. A reverse map from `TypeId` to name lets
//! generic code (serialization, `get_all`) label an opaque storage.
//!
//! The table is created by [`initialize`] (or implicitly by the first
//! registration or the first registry) and torn down by [`shutdown`].
//! Built-in entries: `Transform`, `Enabled`, `Renderable`.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{error, info};

use crate::component::{
    Component, ComponentValue, EnabledComponent, RenderableComponent, TransformComponent,
};
use crate::entity::Entity;
use crate::registry::EntityRegistry;

/// Names the serializer reserves for hierarchy and tag records.
pub const RESERVED_NAMES: [&str; 2] = ["Parent", "Tag"];

// ---------------------------------------------------------------------------
// ComponentOps
// ---------------------------------------------------------------------------

/// Type-erased operations bound to one registered name.
///
/// `name` is the registered name the entry was found under; script entries
/// use it as the script class.
pub trait ComponentOps: Send + Sync {
    fn emplace<'r>(
        &self,
        registry: &'r mut EntityRegistry,
        entity: Entity,
        name: &str,
    ) -> Option<&'r mut dyn ComponentValue>;

    fn get<'r>(
        &self,
        registry: &'r EntityRegistry,
        entity: Entity,
        name: &str,
    ) -> Option<&'r dyn ComponentValue>;

    fn get_mut<'r>(
        &self,
        registry: &'r mut EntityRegistry,
        entity: Entity,
        name: &str,
    ) -> Option<&'r mut dyn ComponentValue>;

    /// Returns whether something was removed.
    fn erase(&self, registry: &mut EntityRegistry, entity: Entity, name: &str) -> bool;

    /// Script entries keep their state in the script host, not in the
    /// component value.
    fn is_script(&self) -> bool {
        false
    }

    /// JSON of the instance [`emplace`](Self::emplace) attaches, when the
    /// entry has one.
    fn default_json(&self) -> Option<serde_json::Value> {
        None
    }
}

struct TypedOps<T>(PhantomData<fn() -> T>);

impl<T: Component + Default> ComponentOps for TypedOps<T> {
    fn emplace<'r>(
        &self,
        registry: &'r mut EntityRegistry,
        entity: Entity,
        _name: &str,
    ) -> Option<&'r mut dyn ComponentValue> {
        registry
            .emplace(entity, T::default())
            .ok()
            .map(|value| value as &mut dyn ComponentValue)
    }

    fn get<'r>(
        &self,
        registry: &'r EntityRegistry,
        entity: Entity,
        _name: &str,
    ) -> Option<&'r dyn ComponentValue> {
        registry
            .try_get::<T>(entity)
            .map(|value| value as &dyn ComponentValue)
    }

    fn get_mut<'r>(
        &self,
        registry: &'r mut EntityRegistry,
        entity: Entity,
        _name: &str,
    ) -> Option<&'r mut dyn ComponentValue> {
        registry
            .try_get_mut::<T>(entity)
            .map(|value| value as &mut dyn ComponentValue)
    }

    fn erase(&self, registry: &mut EntityRegistry, entity: Entity, _name: &str) -> bool {
        registry.erase::<T>(entity).is_some()
    }

    fn default_json(&self) -> Option<serde_json::Value> {
        T::default().save().ok()
    }
}

struct ScriptOps;

impl ComponentOps for ScriptOps {
    fn emplace<'r>(
        &self,
        registry: &'r mut EntityRegistry,
        entity: Entity,
        name: &str,
    ) -> Option<&'r mut dyn ComponentValue> {
        registry
            .emplace_script(entity, name)
            .map(|script| script as &mut dyn ComponentValue)
    }

    fn get<'r>(
        &self,
        registry: &'r EntityRegistry,
        entity: Entity,
        name: &str,
    ) -> Option<&'r dyn ComponentValue> {
        registry
            .get_script(entity, name)
            .map(|script| script as &dyn ComponentValue)
    }

    fn get_mut<'r>(
        &self,
        registry: &'r mut EntityRegistry,
        entity: Entity,
        name: &str,
    ) -> Option<&'r mut dyn ComponentValue> {
        registry
            .get_script_mut(entity, name)
            .map(|script| script as &mut dyn ComponentValue)
    }

    fn erase(&self, registry: &mut EntityRegistry, entity: Entity, name: &str) -> bool {
        registry.erase_script(entity, name)
    }

    fn is_script(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

struct ComponentTypes {
    by_name: BTreeMap<String, Arc<dyn ComponentOps>>,
    /// First name registered for a type wins.
    names: HashMap<TypeId, String>,
}

impl ComponentTypes {
    fn with_builtins() -> Self {
        let mut table = Self {
            by_name: BTreeMap::new(),
            names: HashMap::new(),
        };
        table.insert_typed::<TransformComponent>("Transform");
        table.insert_typed::<EnabledComponent>("Enabled");
        table.insert_typed::<RenderableComponent>("Renderable");
        table
    }

    fn insert_typed<T: Component + Default>(&mut self, name: &str) -> bool {
        self.insert(
            name,
            Arc::new(TypedOps::<T>(PhantomData)),
            Some(TypeId::of::<T>()),
        )
    }

    fn insert(&mut self, name: &str, ops: Arc<dyn ComponentOps>, type_id: Option<TypeId>) -> bool {
        if self.by_name.contains_key(name) {
            info!(component = name, "component already registered, keeping first binding");
            return false;
        }
        if let Some(type_id) = type_id {
            self.names.entry(type_id).or_insert_with(|| name.to_owned());
        }
        self.by_name.insert(name.to_owned(), ops);
        info!(component = name, "registered component");
        true
    }
}

static TYPES: RwLock<Option<ComponentTypes>> = RwLock::new(None);

fn read() -> RwLockReadGuard<'static, Option<ComponentTypes>> {
    TYPES.read().unwrap_or_else(PoisonError::into_inner)
}

fn write() -> RwLockWriteGuard<'static, Option<ComponentTypes>> {
    TYPES.write().unwrap_or_else(PoisonError::into_inner)
}

/// Create the table with its built-in entries. Idempotent.
pub fn initialize() {
    let mut types = write();
    if types.is_none() {
        *types = Some(ComponentTypes::with_builtins());
    }
}

/// Drop every registration. Lookups miss until the next [`initialize`] or
/// registration.
pub fn shutdown() {
    *write() = None;
    info!("component type table shut down");
}

pub fn is_initialized() -> bool {
    read().is_some()
}

fn register(name: &str, ops: Arc<dyn ComponentOps>, type_id: Option<TypeId>) -> bool {
    if name.is_empty() || RESERVED_NAMES.contains(&name) {
        error!(component = name, "cannot register a component under a reserved name");
        return false;
    }
    write()
        .get_or_insert_with(ComponentTypes::with_builtins)
        .insert(name, ops, type_id)
}

/// Bind `name` to component type `T`.
///
/// Returns `false` (and logs) if `name` is already bound; the first binding
/// stays.
pub fn register_component<T: Component + Default>(name: &str) -> bool {
    register(
        name,
        Arc::new(TypedOps::<T>(PhantomData)),
        Some(TypeId::of::<T>()),
    )
}

/// Bind `name` to a script class. Emplacing it instantiates the class on the
/// registry's script host.
pub fn register_script(name: &str) -> bool {
    register(name, Arc::new(ScriptOps), None)
}

/// Operations bound to `name`. The lock is released before this returns.
pub fn lookup(name: &str) -> Option<Arc<dyn ComponentOps>> {
    read().as_ref()?.by_name.get(name).cloned()
}

/// Registered name of the Rust type `type_id`.
pub fn name_of(type_id: TypeId) -> Option<String> {
    read().as_ref()?.names.get(&type_id).cloned()
}

pub fn is_registered(name: &str) -> bool {
    read()
        .as_ref()
        .is_some_and(|types| types.by_name.contains_key(name))
}

/// Every registered name, sorted.
pub fn registered_names() -> Vec<String> {
    read()
        .as_ref()
        .map(|types| types.by_name.keys().cloned().collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Names are process-wide, so every test uses its own.

    #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Foo(u32);

    #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Bar(String);

    #[test]
    fn builtins_are_present_after_initialize() {
        initialize();
        for name in ["Transform", "Enabled", "Renderable"] {
            assert!(is_registered(name), "{name} missing");
        }
        assert_eq!(
            name_of(TypeId::of::<TransformComponent>()).as_deref(),
            Some("Transform")
        );
    }

    #[test]
    fn duplicate_name_keeps_first_binding() {
        assert!(register_component::<Foo>("types::Foo"));
        assert!(!register_component::<Bar>("types::Foo"));

        let mut registry = EntityRegistry::new();
        let e = registry.create();
        let value = lookup("types::Foo")
            .unwrap()
            .emplace(&mut registry, e, "types::Foo")
            .unwrap();
        assert!(value.downcast_ref::<Foo>().is_some());
    }

    #[test]
    fn reserved_and_empty_names_are_refused() {
        assert!(!register_component::<Foo>("Parent"));
        assert!(!register_component::<Foo>("Tag"));
        assert!(!register_script(""));
    }

    #[test]
    fn script_entries_are_flagged() {
        assert!(register_script("types::Mover"));
        assert!(lookup("types::Mover").unwrap().is_script());
        assert!(!lookup("Transform").unwrap().is_script());
    }

    #[test]
    fn registered_names_are_sorted() {
        register_component::<Bar>("types::zz_last");
        register_component::<Bar>("types::aa_first");
        let names = registered_names();
        let first = names.iter().position(|n| n == "types::aa_first").unwrap();
        let last = names.iter().position(|n| n == "types::zz_last").unwrap();
        assert!(first < last);
    }

    #[test]
    fn unknown_name_misses() {
        assert!(lookup("types::never_registered").is_none());
    }
}
