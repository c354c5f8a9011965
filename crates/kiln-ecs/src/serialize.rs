//! Name-keyed tree serialization.
//!
//! An entity becomes one [`Node`]. A named entity is written as
//! `{ name: <name>, data: <uuid> }`; an unnamed one as `{ name: <uuid> }`.
//! Its children are, in order: a `Parent` record (parent UUID) when it has a
//! parent, a `Tag` record when tagged, then one node per registered
//! component, keyed by registered name. A component carries its compact JSON
//! unless that equals the JSON of its registered default, in which case the
//! node has no data and loading it yields the default again. Scripts never
//! carry data.
//!
//! A whole registry is a root `Entities` node whose children are every
//! entity in hierarchy pre-order, so parents always precede their children.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::component::ComponentValue;
use crate::entity::Entity;
use crate::registry::EntityRegistry;
use crate::types;
use crate::RegistryError;

/// Node name of a parent-link record.
pub const PARENT_NODE: &str = "Parent";
/// Node name of a tag record.
pub const TAG_NODE: &str = "Tag";
/// Root node name of a serialized registry.
pub const ROOT_NODE: &str = "Entities";

/// Generic named tree with an optional text payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
            children: Vec::new(),
        }
    }

    pub fn with_data(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Some(data.into()),
            children: Vec::new(),
        }
    }

    /// First direct child called `name`.
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }
}

/// Entity name and identity read from an entity node's header.
fn parse_header(node: &Node) -> (&str, Option<Uuid>) {
    let parse = |text: &str| Uuid::parse_str(text).ok().filter(|id| !id.is_nil());
    match &node.data {
        Some(data) => (node.name.as_str(), parse(data)),
        None => match parse(&node.name) {
            Some(id) => ("", Some(id)),
            None => (node.name.as_str(), None),
        },
    }
}

/// Compact JSON of the component registered as `name`, or `None` when a bare
/// node would load the same value.
fn encode(name: &str, value: &dyn ComponentValue) -> Result<Option<String>, RegistryError> {
    let ops = types::lookup(name);
    if ops.as_ref().is_some_and(|ops| ops.is_script()) {
        return Ok(None);
    }
    let json = value.save()?;
    let default = ops.and_then(|ops| ops.default_json());
    Ok((default.as_ref() != Some(&json)).then(|| json.to_string()))
}

fn decode(
    value: &mut dyn ComponentValue,
    component: &str,
    data: &str,
) -> Result<(), RegistryError> {
    let json = serde_json::from_str(data).map_err(|e| RegistryError::ComponentDeserialization {
        component: component.to_owned(),
        details: e.to_string(),
    })?;
    value.load(json)
}

impl EntityRegistry {
    /// Serialize one entity. Its descendants are not included.
    ///
    /// # Errors
    ///
    /// [`RegistryError::StaleEntity`] for a dead handle, or whatever a
    /// component's serializer reports.
    pub fn serialize_entity(&self, entity: Entity) -> Result<Node, RegistryError> {
        self.check_alive(entity)?;
        let id = self
            .get_id(entity)
            .ok_or(RegistryError::StaleEntity { entity })?;

        let mut node = match self.get_name(entity) {
            "" => Node::new(id.to_string()),
            name => Node::with_data(name, id.to_string()),
        };

        if let Some(parent_id) = self.get_parent(entity).and_then(|p| self.get_id(p)) {
            node.children
                .push(Node::with_data(PARENT_NODE, parent_id.to_string()));
        }
        match self.get_tag(entity) {
            "" => {}
            tag => node.children.push(Node::with_data(TAG_NODE, tag)),
        }
        for (name, value) in self.get_all(entity) {
            let data = encode(&name, value)?;
            node.children.push(Node {
                name,
                data,
                children: Vec::new(),
            });
        }
        Ok(node)
    }

    /// Serialize every entity, parents before children.
    pub fn serialize(&self) -> Result<Node, RegistryError> {
        let mut root = Node::new(ROOT_NODE);
        for top in self.roots() {
            for entity in self.subtree(top) {
                root.children.push(self.serialize_entity(entity)?);
            }
        }
        debug!(entities = root.children.len(), "serialized registry");
        Ok(root)
    }

    /// Load every entity node under `root`.
    ///
    /// Parent links are resolved once all entities exist, so node order does
    /// not matter. A link to a UUID that was never loaded is dropped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// The first entity that fails to load is destroyed and its error
    /// returned. Entities loaded before it are kept and linked.
    ///
    /// # Panics
    ///
    /// If an entity node carries a UUID that is already in use.
    pub fn deserialize(&mut self, root: &Node) -> Result<Vec<Entity>, RegistryError> {
        let mut loaded = Vec::with_capacity(root.children.len());
        let mut links = Vec::new();
        let mut outcome = Ok(());
        for node in &root.children {
            match self.load_entity(node) {
                Ok((entity, parent)) => {
                    loaded.push(entity);
                    if let Some(parent) = parent {
                        links.push((entity, parent));
                    }
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        for (entity, parent_id) in links {
            self.link_parent(entity, parent_id);
        }
        outcome?;
        debug!(entities = loaded.len(), "deserialized registry");
        Ok(loaded)
    }

    /// Load a single entity node. A `Parent` record is linked immediately if
    /// that UUID is already loaded.
    ///
    /// # Errors
    ///
    /// As [`deserialize`](Self::deserialize).
    pub fn deserialize_entity(&mut self, node: &Node) -> Result<Entity, RegistryError> {
        let (entity, parent) = self.load_entity(node)?;
        if let Some(parent_id) = parent {
            self.link_parent(entity, parent_id);
        }
        Ok(entity)
    }

    /// Attach `entity` under the entity bound to `parent_id`. Missing parents
    /// and links that would close a cycle are dropped with a warning.
    fn link_parent(&mut self, entity: Entity, parent_id: Uuid) {
        match self.find_by_id(parent_id) {
            Some(parent) if parent == entity || self.is_ancestor(entity, parent) => {
                warn!(
                    entity = %entity,
                    parent = %parent_id,
                    "parent link would form a cycle, leaving entity at root"
                );
            }
            Some(parent) => self.set_parent(entity, parent),
            None => warn!(
                entity = %entity,
                parent = %parent_id,
                "parent not loaded, leaving entity at root"
            ),
        }
    }

    /// Create the entity described by `node` and load its components.
    /// Returns the entity and the UUID of its parent, if recorded.
    fn load_entity(&mut self, node: &Node) -> Result<(Entity, Option<Uuid>), RegistryError> {
        let (name, id) = parse_header(node);
        let id = id.unwrap_or_else(|| self.identity.generate());
        let entity = match self.spawn(id, false) {
            Ok(entity) => entity,
            Err(err) => crate::fatal(err),
        };
        self.set_name(entity, name);

        let mut parent = None;
        let mut seen = HashSet::new();
        for child in &node.children {
            if !seen.insert(child.name.as_str()) {
                let err = RegistryError::DuplicateComponent {
                    entity: node.name.clone(),
                    component: child.name.clone(),
                };
                error!(error = %err, "aborting entity load");
                self.destroy_immediate(entity, false);
                return Err(err);
            }

            match child.name.as_str() {
                PARENT_NODE => {
                    parent = child.data.as_deref().and_then(|d| Uuid::parse_str(d).ok());
                    continue;
                }
                TAG_NODE => {
                    self.set_tag(entity, child.data.as_deref().unwrap_or(""));
                    continue;
                }
                _ => {}
            }

            let Some(ops) = types::lookup(&child.name) else {
                error!(
                    entity = %entity,
                    component = %child.name,
                    "unregistered component in serialized entity, skipping"
                );
                continue;
            };
            let result = match ops.emplace(self, entity, &child.name) {
                None => {
                    warn!(
                        entity = %entity,
                        component = %child.name,
                        "component could not be attached"
                    );
                    continue;
                }
                Some(value) => match child.data.as_deref() {
                    Some(data) if !ops.is_script() => decode(value, &child.name, data),
                    _ => Ok(()),
                },
            };
            if let Err(err) = result {
                error!(entity = %entity, error = %err, "aborting entity load");
                self.destroy_immediate(entity, false);
                return Err(err);
            }
        }
        Ok((entity, parent))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
