//! Scripting seam.
//!
//! The registry never talks to a concrete scripting runtime. A
//! [`ScriptHost`] creates and destroys script objects keyed by UUID, and each
//! object is a [`Scriptable`] that can be asked about and sent lifecycle
//! methods by name.
//!
//! An entity's scripts live in one [`ScriptComponent`]. For every lifecycle
//! method a script actually implements, its object id is also listed in the
//! matching [`ScriptEvents`] marker component, so firing an event is a view
//! over entities that care rather than a method lookup per script.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::component::EnabledComponent;
use crate::entity::Entity;
use crate::registry::EntityRegistry;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// A live script object.
pub trait Scriptable {
    fn has_method(&self, method: &str) -> bool;

    fn invoke(&mut self, method: &str);
}

/// Adapter over a scripting runtime.
pub trait ScriptHost {
    /// Instantiate `class` as object `object_id`, attached to the entity
    /// whose UUID is `entity_id`. Returns `false` if the class is unknown.
    fn create_object(&mut self, class: &str, object_id: Uuid, entity_id: Uuid) -> bool;

    fn object(&mut self, object_id: Uuid) -> Option<&mut dyn Scriptable>;

    fn destroy_object(&mut self, object_id: Uuid);
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// One script instance on an entity. Its state lives in the host, so it
/// serializes as an empty object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptObject {
    #[serde(skip)]
    pub class: String,
    #[serde(skip)]
    pub id: Uuid,
}

/// Every script instance attached to an entity, in attach order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptComponent {
    pub scripts: Vec<ScriptObject>,
}

impl ScriptComponent {
    pub fn find(&self, class: &str) -> Option<&ScriptObject> {
        self.scripts.iter().find(|s| s.class == class)
    }

    pub fn find_mut(&mut self, class: &str) -> Option<&mut ScriptObject> {
        self.scripts.iter_mut().find(|s| s.class == class)
    }
}

/// A lifecycle method scripts may implement.
pub trait ScriptEvent: 'static {
    const METHOD: &'static str;
}

macro_rules! script_events {
    ($($(#[$doc:meta])* $name:ident => $method:literal;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name;

            impl ScriptEvent for $name {
                const METHOD: &'static str = $method;
            }
        )*
    };
}

script_events! {
    /// Sent when the registry loads, or at attach time if already loaded.
    OnLoad => "OnLoad";
    /// Sent when an entity becomes enabled while loaded.
    OnEnable => "OnEnable";
    /// Sent once per [`EntityRegistry::update_scripts`].
    OnUpdate => "OnUpdate";
    OnDisable => "OnDisable";
    OnUnload => "OnUnload";
    /// Sent right before the object is destroyed.
    OnDestroy => "OnDestroy";
}

/// Sent once, right after a script object is created. Has no marker.
pub const ON_CREATE: &str = "OnCreate";

/// Object ids of the entity's scripts that implement `E`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ScriptEvents<E> {
    pub ids: Vec<Uuid>,
    #[serde(skip)]
    _event: PhantomData<fn() -> E>,
}

impl<E> Default for ScriptEvents<E> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            _event: PhantomData,
        }
    }
}

impl<E> Clone for ScriptEvents<E> {
    fn clone(&self) -> Self {
        Self {
            ids: self.ids.clone(),
            _event: PhantomData,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry integration
// ---------------------------------------------------------------------------

impl EntityRegistry {
    /// Send `E` to every script on `entity` that implements it.
    pub fn trigger_event<E: ScriptEvent>(&mut self, entity: Entity) {
        self.invoke_scripts::<E>(entity, None);
    }

    /// Send `OnUpdate` to every enabled entity's scripts.
    pub fn update_scripts(&mut self) {
        let targets: Vec<Entity> = self
            .view2::<ScriptEvents<OnUpdate>, EnabledComponent>()
            .map(|(entity, _, _)| entity)
            .collect();
        for entity in targets {
            self.trigger_event::<OnUpdate>(entity);
        }
    }

    /// Send `E` to the scripts on `entity`, optionally only to `class`.
    pub(crate) fn invoke_scripts<E: ScriptEvent>(&mut self, entity: Entity, class: Option<&str>) {
        let Some(events) = self.try_get::<ScriptEvents<E>>(entity) else {
            return;
        };
        let mut ids = events.ids.clone();
        if let Some(class) = class {
            let target = self
                .try_get::<ScriptComponent>(entity)
                .and_then(|scripts| scripts.find(class))
                .map(|script| script.id);
            ids.retain(|id| Some(*id) == target);
        }
        for id in ids {
            self.invoke_object(id, E::METHOD);
        }
    }

    fn invoke_object(&mut self, id: Uuid, method: &str) {
        let Some(host) = self.script_host.as_deref_mut() else {
            return;
        };
        match host.object(id) {
            Some(object) => object.invoke(method),
            None => warn!(object = %id, method, "script object missing from host"),
        }
    }

    /// Add `id` to the `E` marker if the script implements it.
    fn connect<E: ScriptEvent>(&mut self, entity: Entity, id: Uuid, methods: &[&'static str]) {
        if methods.contains(&E::METHOD) {
            self.storage_or_insert::<ScriptEvents<E>>()
                .get_or_insert_with(entity, ScriptEvents::default)
                .ids
                .push(id);
        }
    }

    fn disconnect<E: ScriptEvent>(&mut self, entity: Entity, id: Uuid) {
        let Some(events) = self.try_get_mut::<ScriptEvents<E>>(entity) else {
            return;
        };
        events.ids.retain(|other| *other != id);
        if events.ids.is_empty() {
            self.erase::<ScriptEvents<E>>(entity);
        }
    }

    /// Attach script `class` to `entity`, or return the instance it already
    /// has.
    ///
    /// A new instance is created on the host and sent `OnCreate`; it is then
    /// connected to the lifecycle events it implements and, if the registry
    /// is loaded, sent `OnLoad` and (when enabled) `OnEnable`.
    pub(crate) fn emplace_script(
        &mut self,
        entity: Entity,
        class: &str,
    ) -> Option<&mut ScriptObject> {
        let entity_id = self.get_id(entity)?;
        let exists = self
            .try_get::<ScriptComponent>(entity)
            .is_some_and(|scripts| scripts.find(class).is_some());
        if !exists {
            let id = self.identity.generate();
            let methods = self.instantiate(class, id, entity_id)?;

            self.storage_or_insert::<ScriptComponent>()
                .get_or_insert_with(entity, ScriptComponent::default)
                .scripts
                .push(ScriptObject {
                    class: class.to_owned(),
                    id,
                });
            self.connect::<OnLoad>(entity, id, &methods);
            self.connect::<OnEnable>(entity, id, &methods);
            self.connect::<OnUpdate>(entity, id, &methods);
            self.connect::<OnDisable>(entity, id, &methods);
            self.connect::<OnUnload>(entity, id, &methods);
            self.connect::<OnDestroy>(entity, id, &methods);

            if self.loaded {
                if methods.contains(&OnLoad::METHOD) {
                    self.invoke_object(id, OnLoad::METHOD);
                }
                if methods.contains(&OnEnable::METHOD) && self.get_enabled(entity) {
                    self.invoke_object(id, OnEnable::METHOD);
                }
            }
            debug!(entity = %entity, script = class, object = %id, "attached script");
        }
        self.get_script_mut(entity, class)
    }

    /// Create the host object, send `OnCreate`, and report which lifecycle
    /// methods it implements. `None` if the host refused the class.
    fn instantiate(&mut self, class: &str, id: Uuid, entity_id: Uuid) -> Option<Vec<&'static str>> {
        let Some(host) = self.script_host.as_deref_mut() else {
            warn!(script = class, "no script host installed, script has no behaviour");
            return Some(Vec::new());
        };
        if !host.create_object(class, id, entity_id) {
            error!(script = class, "script host could not create object");
            return None;
        }
        let Some(object) = host.object(id) else {
            return Some(Vec::new());
        };
        if object.has_method(ON_CREATE) {
            object.invoke(ON_CREATE);
        }
        Some(
            [
                OnLoad::METHOD,
                OnEnable::METHOD,
                OnUpdate::METHOD,
                OnDisable::METHOD,
                OnUnload::METHOD,
                OnDestroy::METHOD,
            ]
            .into_iter()
            .filter(|method| object.has_method(method))
            .collect(),
        )
    }

    pub(crate) fn get_script(&self, entity: Entity, class: &str) -> Option<&ScriptObject> {
        self.try_get::<ScriptComponent>(entity)?.find(class)
    }

    pub(crate) fn get_script_mut(
        &mut self,
        entity: Entity,
        class: &str,
    ) -> Option<&mut ScriptObject> {
        self.try_get_mut::<ScriptComponent>(entity)?.find_mut(class)
    }

    /// Detach script `class` from `entity` and destroy its host object.
    /// Drops the `ScriptComponent` once it holds no scripts.
    pub(crate) fn erase_script(&mut self, entity: Entity, class: &str) -> bool {
        let Some(scripts) = self.try_get_mut::<ScriptComponent>(entity) else {
            return false;
        };
        let Some(pos) = scripts.scripts.iter().position(|s| s.class == class) else {
            return false;
        };
        let removed = scripts.scripts.remove(pos);
        if scripts.scripts.is_empty() {
            self.erase::<ScriptComponent>(entity);
        }
        self.disconnect::<OnLoad>(entity, removed.id);
        self.disconnect::<OnEnable>(entity, removed.id);
        self.disconnect::<OnUpdate>(entity, removed.id);
        self.disconnect::<OnDisable>(entity, removed.id);
        self.disconnect::<OnUnload>(entity, removed.id);
        self.disconnect::<OnDestroy>(entity, removed.id);
        if let Some(host) = self.script_host.as_deref_mut() {
            host.destroy_object(removed.id);
        }
        debug!(entity = %entity, script = class, object = %removed.id, "detached script");
        true
    }

    /// Destroy the host objects of every script on `entity`, leaving the
    /// components in place.
    pub(crate) fn destroy_script_objects(&mut self, entity: Entity) {
        let ids: Vec<Uuid> = match self.try_get::<ScriptComponent>(entity) {
            Some(scripts) => scripts.scripts.iter().map(|s| s.id).collect(),
            None => return,
        };
        if let Some(host) = self.script_host.as_deref_mut() {
            for id in ids {
                host.destroy_object(id);
            }
        }
    }

    /// Script classes attached to `entity`, in attach order.
    pub fn script_classes(&self, entity: Entity) -> Vec<String> {
        self.try_get::<ScriptComponent>(entity)
            .map(|scripts| scripts.scripts.iter().map(|s| s.class.clone()).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Test host
// ---------------------------------------------------------------------------

/// In-memory [`ScriptHost`] that records every call, for tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use uuid::Uuid;

    use super::{ScriptHost, Scriptable};

    pub type Log = Rc<RefCell<Vec<String>>>;

    pub struct RecordingScript {
        class: String,
        methods: Vec<&'static str>,
        log: Log,
    }

    impl Scriptable for RecordingScript {
        fn has_method(&self, method: &str) -> bool {
            self.methods.iter().any(|m| *m == method)
        }

        fn invoke(&mut self, method: &str) {
            self.log.borrow_mut().push(format!("{}.{}", self.class, method));
        }
    }

    #[derive(Default)]
    pub struct RecordingHost {
        pub classes: HashMap<String, Vec<&'static str>>,
        pub objects: HashMap<Uuid, RecordingScript>,
        pub log: Log,
    }

    impl RecordingHost {
        pub fn with_class(mut self, class: &str, methods: &[&'static str]) -> Self {
            self.classes.insert(class.to_owned(), methods.to_vec());
            self
        }
    }

    impl ScriptHost for RecordingHost {
        fn create_object(&mut self, class: &str, object_id: Uuid, _entity_id: Uuid) -> bool {
            let Some(methods) = self.classes.get(class) else {
                return false;
            };
            self.objects.insert(
                object_id,
                RecordingScript {
                    class: class.to_owned(),
                    methods: methods.clone(),
                    log: Rc::clone(&self.log),
                },
            );
            true
        }

        fn object(&mut self, object_id: Uuid) -> Option<&mut dyn Scriptable> {
            self.objects
                .get_mut(&object_id)
                .map(|o| o as &mut dyn Scriptable)
        }

        fn destroy_object(&mut self, object_id: Uuid) {
            if let Some(object) = self.objects.remove(&object_id) {
                self.log.borrow_mut().push(format!("{}.<destroyed>", object.class));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
