//! Deferred destruction.
//!
//! Destroy requests only attach marker components. Nothing is removed until
//! [`EntityRegistry::destroy_queued`] commits them, once per frame, so views
//! being iterated mid-frame never see storage shift underneath them. The
//! commit runs in a fixed order:
//!
//! 1. component requests on scripted entities that are not themselves being
//!    destroyed: send `OnDisable`/`OnUnload`/`OnDestroy` to the named
//!    scripts, then erase each named component;
//! 2. component requests on unscripted entities: erase the named components;
//! 3. clear every component request;
//! 4. scripted entities marked for destruction: send the teardown events,
//!    destroy their script objects, drop them from the UUID and tag indices;
//! 5. unscripted entities marked for destruction: drop them from the indices;
//! 6. unlink survivors from the doomed set, then remove the doomed entities
//!    from every storage and free their handles in one pass.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::Entity;
use crate::registry::EntityRegistry;
use crate::script::{OnDestroy, OnDisable, OnUnload, ScriptComponent};

/// Marks an entity for destruction at the next commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyEntityComponent;

/// Names of components to erase from an entity at the next commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyComponentComponent {
    pub names: BTreeSet<String>,
}

/// Summary of one [`EntityRegistry::destroy_queued`] commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyReport {
    /// Components erased by name.
    pub components_removed: usize,
    /// Entities freed.
    pub entities_destroyed: usize,
}

impl EntityRegistry {
    /// Mark `entity` (and with `include_children`, its whole subtree) for
    /// destruction at the next [`destroy_queued`](Self::destroy_queued).
    pub fn destroy(&mut self, entity: Entity, include_children: bool) {
        if !self.is_alive(entity) {
            return;
        }
        let targets = if include_children {
            self.subtree(entity)
        } else {
            vec![entity]
        };
        for target in targets {
            self.insert_marker::<DestroyEntityComponent>(target);
        }
    }

    /// Request that the component registered as `name` be erased from
    /// `entity` at the next commit. Repeated requests have no extra effect.
    pub fn destroy_component(&mut self, entity: Entity, name: &str) {
        if !self.is_alive(entity) {
            return;
        }
        self.storage_or_insert::<DestroyComponentComponent>()
            .get_or_insert_with(entity, DestroyComponentComponent::default)
            .names
            .insert(name.to_owned());
    }

    /// Commit every pending destroy request.
    pub fn destroy_queued(&mut self) -> DestroyReport {
        let mut report = DestroyReport::default();
        let loaded = self.loaded;

        let requests: Vec<(Entity, Vec<String>)> = self
            .view::<DestroyComponentComponent>()
            .map(|(entity, request)| (entity, request.names.iter().cloned().collect()))
            .collect();
        let (scripted, plain): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .partition(|(entity, _)| self.has::<ScriptComponent>(*entity));

        for (entity, names) in scripted {
            if self.has::<DestroyEntityComponent>(entity) {
                continue;
            }
            for name in &names {
                self.trigger_destroy_events(entity, loaded, Some(name.as_str()));
            }
            for name in &names {
                if self.erase_by_name(entity, name) {
                    report.components_removed += 1;
                }
            }
        }

        for (entity, names) in plain {
            for name in &names {
                if self.erase_by_name(entity, name) {
                    report.components_removed += 1;
                }
            }
        }

        self.clear_component::<DestroyComponentComponent>();

        let doomed = self.entities_with::<DestroyEntityComponent>();
        let (scripted, plain): (Vec<Entity>, Vec<Entity>) = doomed
            .iter()
            .copied()
            .partition(|&entity| self.has::<ScriptComponent>(entity));

        for entity in scripted {
            self.trigger_destroy_events(entity, loaded, None);
            self.destroy_script_objects(entity);
            self.unindex(entity);
        }
        for entity in plain {
            self.unindex(entity);
        }

        self.release(&doomed);
        report.entities_destroyed = doomed.len();

        if report != DestroyReport::default() {
            debug!(
                components_removed = report.components_removed,
                entities_destroyed = report.entities_destroyed,
                "committed destroy queue"
            );
        }
        report
    }

    /// Destroy `entity` now, bypassing the queue.
    ///
    /// The entity is unlinked from its parent first. With
    /// `include_children` the whole subtree goes; otherwise the children are
    /// detached into roots and survive.
    pub fn destroy_immediate(&mut self, entity: Entity, include_children: bool) {
        if !self.is_alive(entity) {
            return;
        }
        self.set_parent(entity, Entity::NULL);
        let doomed = if include_children {
            self.subtree(entity)
        } else {
            self.detach_children(entity);
            vec![entity]
        };

        let loaded = self.loaded;
        for &target in &doomed {
            self.trigger_destroy_events(target, loaded, None);
            self.destroy_script_objects(target);
            self.unindex(target);
        }
        self.remove_from_storages(&doomed);
        for &target in &doomed {
            self.allocator.deallocate(target);
        }
        debug!(entity = %entity, count = doomed.len(), "destroyed immediately");
    }

    /// Destroy everything. Scripts get `OnDestroy`, then every storage and
    /// index is emptied and every handle freed.
    pub fn clear(&mut self) {
        for entity in self.entities_with::<ScriptComponent>() {
            self.invoke_scripts::<OnDestroy>(entity, None);
            self.destroy_script_objects(entity);
        }
        for storage in &mut self.storages {
            storage.clear();
        }
        self.identity.clear();
        let alive: Vec<Entity> = self.allocator.iter_alive().collect();
        for &entity in &alive {
            self.allocator.deallocate(entity);
        }
        info!(count = alive.len(), "cleared registry");
    }

    /// Teardown events for `entity`'s scripts, or only for `class`.
    ///
    /// While loaded, removing a single script always sends it `OnDisable`;
    /// tearing down a whole entity sends `OnDisable` only if it is enabled.
    fn trigger_destroy_events(&mut self, entity: Entity, loaded: bool, class: Option<&str>) {
        if !self.has::<ScriptComponent>(entity) {
            return;
        }
        if loaded {
            if class.is_some() || self.get_enabled(entity) {
                self.invoke_scripts::<OnDisable>(entity, class);
            }
            self.invoke_scripts::<OnUnload>(entity, class);
        }
        self.invoke_scripts::<OnDestroy>(entity, class);
    }

    /// Drop `entity` from the UUID and tag indices.
    fn unindex(&mut self, entity: Entity) {
        self.untag(entity);
        self.identity.remove(entity);
    }

    /// Free `doomed` in one pass. Survivors linked to a doomed entity are
    /// unlinked first so no live relationship points at a freed handle.
    fn release(&mut self, doomed: &[Entity]) {
        let marked: HashSet<Entity> = doomed.iter().copied().collect();
        for &entity in doomed {
            if let Some(parent) = self.get_parent(entity) {
                if !marked.contains(&parent) {
                    self.set_parent(entity, Entity::NULL);
                }
            }
            for child in self.get_children(entity) {
                if !marked.contains(&child) {
                    self.set_parent(child, Entity::NULL);
                }
            }
        }
        self.remove_from_storages(doomed);
        for &entity in doomed {
            self.allocator.deallocate(entity);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
