//! The [`EntityRegistry`] owns every live entity, one storage per component
//! type, the identity and tag indices, and the optional script host.
//!
//! Hierarchy, deferred destruction, scripting and serialization live in
//! their own modules as further `impl EntityRegistry` blocks.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::component::{
    Component, ComponentValue, DirtyComponent, EnabledComponent, NameComponent,
    RenderableComponent, TagComponent, TransformComponent,
};
use crate::config::{InvariantPolicy, RegistryConfig};
use crate::entity::{Entity, EntityAllocator};
use crate::hierarchy::RelationshipComponent;
use crate::identity::IdentityIndex;
use crate::script::{OnDisable, OnEnable, OnLoad, OnUnload, ScriptComponent, ScriptHost};
use crate::storage::{ComponentStorage, ErasedStorage};
use crate::types;
use crate::RegistryError;

/// Reserved blank name. Never stored, never matched.
pub const BLANK_NAME: &str = "_";

/// `true` for `""` and [`BLANK_NAME`].
pub fn is_name_empty(name: &str) -> bool {
    name.is_empty() || name == BLANK_NAME
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Single-threaded owner of entities and their components.
pub struct EntityRegistry {
    pub(crate) config: RegistryConfig,
    pub(crate) allocator: EntityAllocator,
    /// In first-use order.
    pub(crate) storages: Vec<Box<dyn ErasedStorage>>,
    pub(crate) storage_index: HashMap<TypeId, usize>,
    pub(crate) identity: IdentityIndex,
    pub(crate) script_host: Option<Box<dyn ScriptHost>>,
    pub(crate) loaded: bool,
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entity_count", &self.allocator.alive_count())
            .field("storage_count", &self.storages.len())
            .field("loaded", &self.loaded)
            .field("has_script_host", &self.script_host.is_some())
            .finish()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    /// Create an empty registry with the default configuration.
    ///
    /// Also makes sure the process-wide component type table exists.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        types::initialize();
        Self {
            identity: IdentityIndex::new(config.uuid_seed),
            loaded: config.start_loaded,
            config,
            allocator: EntityAllocator::new(),
            storages: Vec::new(),
            storage_index: HashMap::new(),
            script_host: None,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Install the script host, returning the previous one.
    pub fn set_script_host(&mut self, host: Box<dyn ScriptHost>) -> Option<Box<dyn ScriptHost>> {
        self.script_host.replace(host)
    }

    pub fn script_host_mut(&mut self) -> Option<&mut (dyn ScriptHost + 'static)> {
        self.script_host.as_deref_mut()
    }

    // ---- Type registration ----

    /// Bind `name` to `T` in the process-wide type table. See
    /// [`types::register_component`].
    pub fn register_component<T: Component + Default>(name: &str) -> bool {
        types::register_component::<T>(name)
    }

    /// Bind `name` to a script class. See [`types::register_script`].
    pub fn register_script(name: &str) -> bool {
        types::register_script(name)
    }

    /// Every name in the type table, sorted.
    pub fn get_registered_components(&self) -> Vec<String> {
        types::registered_names()
    }

    // ---- Storage access ----

    pub(crate) fn storage<T: Component>(&self) -> Option<&ComponentStorage<T>> {
        let idx = *self.storage_index.get(&TypeId::of::<T>())?;
        self.storages[idx].as_any().downcast_ref()
    }

    pub(crate) fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        let idx = *self.storage_index.get(&TypeId::of::<T>())?;
        self.storages[idx].as_any_mut().downcast_mut()
    }

    pub(crate) fn storage_or_insert<T: Component>(&mut self) -> &mut ComponentStorage<T> {
        let idx = match self.storage_index.get(&TypeId::of::<T>()) {
            Some(&idx) => idx,
            None => {
                let idx = self.storages.len();
                self.storages.push(Box::new(ComponentStorage::<T>::new()));
                self.storage_index.insert(TypeId::of::<T>(), idx);
                debug!(component = std::any::type_name::<T>(), "created storage");
                idx
            }
        };
        match self.storages[idx].as_any_mut().downcast_mut() {
            Some(storage) => storage,
            None => crate::fatal(RegistryError::InvariantViolation(format!(
                "storage for {} holds another type",
                std::any::type_name::<T>()
            ))),
        }
    }

    /// Insert a default `T` on `entity` unless one is present. Skips the
    /// liveness check; callers have done it.
    pub(crate) fn insert_marker<T: Component + Default>(&mut self, entity: Entity) {
        self.storage_or_insert::<T>()
            .get_or_insert_with(entity, T::default);
    }

    /// Drop `entities` from every storage.
    pub(crate) fn remove_from_storages(&mut self, entities: &[Entity]) {
        for storage in &mut self.storages {
            storage.remove_many(entities);
        }
    }

    /// Components mirroring registry bookkeeping: the tag index and the
    /// hierarchy links. Generic mutators refuse them.
    fn is_managed<T: Component>() -> bool {
        let id = TypeId::of::<T>();
        id == TypeId::of::<TagComponent>() || id == TypeId::of::<RelationshipComponent>()
    }

    fn managed_error<T: Component>() -> RegistryError {
        RegistryError::ManagedComponent {
            component: std::any::type_name::<T>(),
        }
    }

    pub(crate) fn check_alive(&self, entity: Entity) -> Result<(), RegistryError> {
        if self.allocator.is_alive(entity) {
            Ok(())
        } else {
            Err(RegistryError::StaleEntity { entity })
        }
    }

    /// Report a broken structural invariant according to the configured
    /// policy.
    pub(crate) fn invariant_violated(&self, message: impl Into<String>) {
        let err = RegistryError::InvariantViolation(message.into());
        match self.config.invariant_policy {
            InvariantPolicy::Panic => crate::fatal(err),
            InvariantPolicy::Log => error!(error = %err, "invariant violated"),
        }
    }

    // ---- Entity lifecycle ----

    /// Create an entity with a fresh UUID.
    pub fn create(&mut self) -> Entity {
        let id = self.identity.generate();
        self.create_with_id(id)
    }

    /// Create an entity bound to `id`.
    ///
    /// # Panics
    ///
    /// If `id` is nil or already bound to a live entity. Use
    /// [`try_create_with_id`](Self::try_create_with_id) to check instead.
    pub fn create_with_id(&mut self, id: Uuid) -> Entity {
        match self.try_create_with_id(id) {
            Ok(entity) => entity,
            Err(err) => crate::fatal(err),
        }
    }

    /// Create an entity bound to `id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::IdentityCollision`] if `id` is in use,
    /// [`RegistryError::NilIdentity`] if `id` is nil.
    pub fn try_create_with_id(&mut self, id: Uuid) -> Result<Entity, RegistryError> {
        let enabled = self.config.enabled_by_default;
        self.spawn(id, enabled)
    }

    /// Create an entity with a fresh UUID and, unless `name` is blank, a name.
    pub fn create_named(&mut self, name: &str) -> Entity {
        let id = self.identity.generate();
        self.create_named_with_id(name, id)
    }

    /// Create an entity bound to `id` and, unless `name` is blank, a name.
    ///
    /// # Panics
    ///
    /// On UUID collision, as [`create_with_id`](Self::create_with_id).
    pub fn create_named_with_id(&mut self, name: &str, id: Uuid) -> Entity {
        let entity = self.create_with_id(id);
        self.set_name(entity, name);
        entity
    }

    /// Allocate and bind an identity. `enabled` attaches `EnabledComponent`.
    pub(crate) fn spawn(&mut self, id: Uuid, enabled: bool) -> Result<Entity, RegistryError> {
        if id.is_nil() {
            return Err(RegistryError::NilIdentity);
        }
        if self.identity.contains_id(id) {
            return Err(RegistryError::IdentityCollision { id });
        }
        let entity = self.allocator.allocate();
        self.identity.insert(id, entity)?;
        if enabled {
            self.insert_marker::<EnabledComponent>(entity);
        }
        debug!(entity = %entity, id = %id, "created entity");
        Ok(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.allocator.alive_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live entity, in index order.
    pub fn entities(&self) -> Vec<Entity> {
        self.allocator.iter_alive().collect()
    }

    // ---- Identity ----

    pub fn find_by_id(&self, id: Uuid) -> Option<Entity> {
        self.identity.entity(id)
    }

    pub fn get_id(&self, entity: Entity) -> Option<Uuid> {
        self.identity.id(entity)
    }

    // ---- Names ----

    /// Set or, for a blank `name`, remove the entity's name.
    pub fn set_name(&mut self, entity: Entity, name: &str) {
        if is_name_empty(name) {
            self.erase::<NameComponent>(entity);
        } else if let Err(err) = self.emplace(entity, NameComponent { name: name.to_owned() }) {
            warn!(error = %err, name, "cannot name entity");
        }
    }

    /// The entity's name, or `""`.
    pub fn get_name(&self, entity: Entity) -> &str {
        self.try_get::<NameComponent>(entity)
            .map_or("", |n| n.name.as_str())
    }

    /// The entity's name, or [`BLANK_NAME`].
    pub fn get_name_safe(&self, entity: Entity) -> &str {
        match self.get_name(entity) {
            "" => BLANK_NAME,
            name => name,
        }
    }

    /// First entity named exactly `name`, in storage order. Linear scan.
    pub fn find_by_name(&self, name: &str) -> Option<Entity> {
        if is_name_empty(name) {
            return None;
        }
        self.view::<NameComponent>()
            .find(|(_, n)| n.name == name)
            .map(|(entity, _)| entity)
    }

    // ---- Tags ----

    /// Set the entity's tag; `""` removes it. Keeps the tag index in sync.
    pub fn set_tag(&mut self, entity: Entity, tag: &str) {
        if tag.is_empty() {
            self.erase::<TagComponent>(entity);
        } else if let Err(err) = self.emplace(entity, TagComponent { tag: tag.to_owned() }) {
            warn!(error = %err, tag, "cannot tag entity");
        }
    }

    /// The entity's tag, or `""`.
    pub fn get_tag(&self, entity: Entity) -> &str {
        self.try_get::<TagComponent>(entity)
            .map_or("", |t| t.tag.as_str())
    }

    /// Some entity carrying `tag`.
    pub fn find_by_tag(&self, tag: &str) -> Option<Entity> {
        self.identity.tagged(tag)?.iter().next().copied()
    }

    /// Every entity carrying `tag`.
    pub fn find_all_by_tag(&self, tag: &str) -> BTreeSet<Entity> {
        self.identity.tagged(tag).cloned().unwrap_or_default()
    }

    pub(crate) fn untag(&mut self, entity: Entity) {
        if let Some(old) = self.try_get::<TagComponent>(entity) {
            let old = old.tag.clone();
            self.identity.untag(entity, &old);
        }
    }

    // ---- Typed component access ----

    /// Attach `value`, replacing any `T` the entity already has. A
    /// [`TagComponent`] also updates the tag index.
    ///
    /// # Errors
    ///
    /// [`RegistryError::StaleEntity`] if `entity` is not alive,
    /// [`RegistryError::ManagedComponent`] for a [`RelationshipComponent`].
    pub fn emplace<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<&mut T, RegistryError> {
        if TypeId::of::<T>() == TypeId::of::<RelationshipComponent>() {
            return Err(Self::managed_error::<T>());
        }
        self.check_alive(entity)?;
        if let Some(tag) = (&value as &dyn Any).downcast_ref::<TagComponent>() {
            let tag = tag.tag.clone();
            self.untag(entity);
            if !tag.is_empty() {
                self.identity.tag(entity, &tag);
            }
        }
        if TypeId::of::<T>() == TypeId::of::<TransformComponent>() {
            self.insert_marker::<DirtyComponent>(entity);
        }
        Ok(self.storage_or_insert::<T>().insert(entity, value))
    }

    /// The entity's `T`, inserting `T::default()` first if absent.
    ///
    /// # Errors
    ///
    /// [`RegistryError::StaleEntity`] if `entity` is not alive,
    /// [`RegistryError::ManagedComponent`] for tags and hierarchy links.
    pub fn get_or_emplace<T: Component + Default>(
        &mut self,
        entity: Entity,
    ) -> Result<&mut T, RegistryError> {
        if Self::is_managed::<T>() {
            return Err(Self::managed_error::<T>());
        }
        if self.has::<T>(entity) {
            return self
                .try_get_mut::<T>(entity)
                .ok_or(RegistryError::StaleEntity { entity });
        }
        self.emplace(entity, T::default())
    }

    pub fn try_get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    /// `None` for tags and hierarchy links, which only change through
    /// [`set_tag`](Self::set_tag) and the hierarchy operations.
    pub fn try_get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if Self::is_managed::<T>() {
            warn!(entity = %entity, error = %Self::managed_error::<T>(), "refusing mutable access");
            return None;
        }
        self.storage_mut::<T>()?.get_mut(entity)
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.storage::<T>().is_some_and(|s| s.contains(entity))
    }

    /// Detach and return the entity's `T`. Hierarchy links are refused; use
    /// [`set_parent`](Self::set_parent) instead.
    pub fn erase<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if TypeId::of::<T>() == TypeId::of::<RelationshipComponent>() {
            warn!(entity = %entity, error = %Self::managed_error::<T>(), "refusing erase");
            return None;
        }
        if TypeId::of::<T>() == TypeId::of::<TagComponent>() {
            self.untag(entity);
        }
        self.storage_mut::<T>()?.remove(entity)
    }

    /// Mutate the entity's `T` in place. Patching a transform marks the
    /// entity dirty. Returns `false` if there was no `T`.
    pub fn patch<T: Component>(&mut self, entity: Entity, f: impl FnOnce(&mut T)) -> bool {
        let Some(value) = self.try_get_mut::<T>(entity) else {
            return false;
        };
        f(value);
        if TypeId::of::<T>() == TypeId::of::<TransformComponent>() {
            self.insert_marker::<DirtyComponent>(entity);
        }
        true
    }

    /// Remove `T` from every entity. Hierarchy links are refused.
    pub fn clear_component<T: Component>(&mut self) {
        if TypeId::of::<T>() == TypeId::of::<RelationshipComponent>() {
            warn!(error = %Self::managed_error::<T>(), "refusing clear");
            return;
        }
        if TypeId::of::<T>() == TypeId::of::<TagComponent>() {
            self.identity.clear_tags();
        }
        if let Some(storage) = self.storage_mut::<T>() {
            storage.clear();
        }
    }

    // ---- Name-keyed access ----

    fn lookup_or_log(
        name: &str,
        entity: Entity,
        action: &str,
    ) -> Option<std::sync::Arc<dyn types::ComponentOps>> {
        let ops = types::lookup(name);
        if ops.is_none() {
            let err = RegistryError::UnknownComponent {
                name: name.to_owned(),
                registered: types::registered_names().join(", "),
            };
            error!(entity = %entity, error = %err, "cannot {action} component by name");
        }
        ops
    }

    /// Emplace a default instance of the component registered as `name`.
    /// Unregistered names log an error and return `None`.
    pub fn emplace_by_name(
        &mut self,
        entity: Entity,
        name: &str,
    ) -> Option<&mut dyn ComponentValue> {
        let ops = Self::lookup_or_log(name, entity, "emplace")?;
        ops.emplace(self, entity, name)
    }

    pub fn get_by_name(&self, entity: Entity, name: &str) -> Option<&dyn ComponentValue> {
        let ops = Self::lookup_or_log(name, entity, "get")?;
        ops.get(self, entity, name)
    }

    pub fn get_by_name_mut(
        &mut self,
        entity: Entity,
        name: &str,
    ) -> Option<&mut dyn ComponentValue> {
        let ops = Self::lookup_or_log(name, entity, "get")?;
        ops.get_mut(self, entity, name)
    }

    /// Returns whether something was removed.
    pub fn erase_by_name(&mut self, entity: Entity, name: &str) -> bool {
        match Self::lookup_or_log(name, entity, "erase") {
            Some(ops) => ops.erase(self, entity, name),
            None => false,
        }
    }

    /// Every registered component on `entity`, labelled with its registered
    /// name, in storage order. Scripts appear once per class. Unregistered
    /// components (names, tags, hierarchy links, markers) are skipped.
    pub fn get_all(&self, entity: Entity) -> Vec<(String, &dyn ComponentValue)> {
        let mut out = Vec::new();
        for storage in &self.storages {
            if !storage.contains(entity) {
                continue;
            }
            if storage.component_type() == TypeId::of::<ScriptComponent>() {
                if let Some(scripts) = self.try_get::<ScriptComponent>(entity) {
                    for script in &scripts.scripts {
                        out.push((script.class.clone(), script as &dyn ComponentValue));
                    }
                }
                continue;
            }
            match (types::name_of(storage.component_type()), storage.get_value(entity)) {
                (Some(name), Some(value)) => out.push((name, value)),
                _ => {}
            }
        }
        out
    }

    // ---- Views ----

    /// Every `(entity, &T)`, in storage order.
    pub fn view<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.storage::<T>().into_iter().flat_map(ComponentStorage::iter)
    }

    /// Empty for tags and hierarchy links.
    pub fn view_mut<T: Component>(&mut self) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        let managed = Self::is_managed::<T>();
        if managed {
            warn!(error = %Self::managed_error::<T>(), "refusing mutable view");
        }
        self.storage_mut::<T>()
            .filter(|_| !managed)
            .into_iter()
            .flat_map(ComponentStorage::iter_mut)
    }

    /// Entities carrying both `A` and `B`, driven by `A`'s storage.
    pub fn view2<A: Component, B: Component>(
        &self,
    ) -> impl Iterator<Item = (Entity, &A, &B)> + '_ {
        self.view::<A>()
            .filter_map(move |(entity, a)| self.try_get::<B>(entity).map(|b| (entity, a, b)))
    }

    pub fn entities_with<T: Component>(&self) -> Vec<Entity> {
        self.storage::<T>()
            .map(|s| s.entities().to_vec())
            .unwrap_or_default()
    }

    /// First entity carrying a `T`.
    pub fn find_by_type<T: Component>(&self) -> Option<Entity> {
        self.storage::<T>()?.entities().first().copied()
    }

    // ---- Enabled / renderable / loaded ----

    /// Attach `EnabledComponent`; fires `OnEnable` scripts while loaded.
    pub fn enable(&mut self, entity: Entity) {
        if !self.is_alive(entity) || self.has::<EnabledComponent>(entity) {
            return;
        }
        self.insert_marker::<EnabledComponent>(entity);
        if self.loaded {
            self.trigger_event::<OnEnable>(entity);
        }
    }

    /// Remove `EnabledComponent`; fires `OnDisable` scripts while loaded.
    pub fn disable(&mut self, entity: Entity) {
        if self.erase::<EnabledComponent>(entity).is_some() && self.loaded {
            self.trigger_event::<OnDisable>(entity);
        }
    }

    pub fn set_enabled(&mut self, entity: Entity, enabled: bool) {
        if enabled {
            self.enable(entity);
        } else {
            self.disable(entity);
        }
    }

    pub fn get_enabled(&self, entity: Entity) -> bool {
        self.has::<EnabledComponent>(entity)
    }

    pub fn set_renderable(&mut self, entity: Entity, renderable: bool) {
        if !renderable {
            self.erase::<RenderableComponent>(entity);
        } else if self.is_alive(entity) {
            self.insert_marker::<RenderableComponent>(entity);
        }
    }

    pub fn get_renderable(&self, entity: Entity) -> bool {
        self.has::<RenderableComponent>(entity)
    }

    /// Flip the loaded flag. Loading fires `OnLoad` then `OnEnable` on every
    /// enabled scripted entity; unloading fires `OnDisable` then `OnUnload`.
    pub fn set_loaded(&mut self, loaded: bool) {
        if self.loaded == loaded {
            return;
        }
        self.loaded = loaded;
        let scripted: Vec<Entity> = self
            .view2::<ScriptComponent, EnabledComponent>()
            .map(|(entity, _, _)| entity)
            .collect();
        if loaded {
            for &entity in &scripted {
                self.trigger_event::<OnLoad>(entity);
            }
            for &entity in &scripted {
                self.trigger_event::<OnEnable>(entity);
            }
        } else {
            for &entity in &scripted {
                self.trigger_event::<OnDisable>(entity);
            }
            for &entity in &scripted {
                self.trigger_event::<OnUnload>(entity);
            }
        }
        info!(loaded, entities = scripted.len(), "registry load state changed");
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Mark `entity` and its whole subtree dirty.
    pub fn dirty(&mut self, entity: Entity) {
        if !self.is_alive(entity) {
            return;
        }
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            self.insert_marker::<DirtyComponent>(current);
            stack.extend(self.get_children(current));
        }
    }

    // ---- Diagnostics ----

    /// Log one entity and its registered components at info level.
    pub fn print(&self, entity: Entity) {
        let components: Vec<String> =
            self.get_all(entity).into_iter().map(|(name, _)| name).collect();
        info!(
            entity = %entity,
            name = self.get_name_safe(entity),
            id = ?self.get_id(entity),
            tag = self.get_tag(entity),
            ?components,
            "entity"
        );
    }
}

/// `EntityRegistry(_ (x2), Player)`: live entity names in index order, with
/// repeats collapsed into a count.
impl fmt::Display for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for entity in self.allocator.iter_alive() {
            let name = self.get_name_safe(entity);
            match counts.iter_mut().find(|(n, _)| *n == name) {
                Some((_, count)) => *count += 1,
                None => counts.push((name, 1)),
            }
        }
        write!(f, "EntityRegistry(")?;
        for (i, (name, count)) in counts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if *count > 1 {
                write!(f, "{name} (x{count})")?;
            } else {
                write!(f, "{name}")?;
            }
        }
        write!(f, ")")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
