//! Parent/child hierarchy.
//!
//! Each parent keeps an intrusive doubly-linked list of its children inside
//! [`RelationshipComponent`]: `first`/`last` on the parent, `prev`/`next` on
//! each child, plus a child count. Every link mutation goes through this
//! module; [`EntityRegistry::check_hierarchy`] verifies the result.
//!
//! An entity without a `RelationshipComponent` is a childless root. The
//! component is dropped as soon as an entity has neither a parent nor
//! children, so callers must treat "absent" and "all `NULL`" alike.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::component::{DirtyComponent, TagComponent, TransformComponent};
use crate::destroy::{DestroyComponentComponent, DestroyEntityComponent};
use crate::entity::Entity;
use crate::registry::EntityRegistry;
use crate::script::{
    OnDestroy, OnDisable, OnEnable, OnLoad, OnUnload, OnUpdate, ScriptComponent, ScriptEvents,
};
use crate::RegistryError;

/// Hierarchy links of one entity. Read-only outside the crate; the
/// re-parenting and sibling operations below keep the links consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipComponent {
    pub(crate) parent: Entity,
    pub(crate) first: Entity,
    pub(crate) last: Entity,
    pub(crate) prev: Entity,
    pub(crate) next: Entity,
    pub(crate) children: usize,
}

impl Default for RelationshipComponent {
    fn default() -> Self {
        Self {
            parent: Entity::NULL,
            first: Entity::NULL,
            last: Entity::NULL,
            prev: Entity::NULL,
            next: Entity::NULL,
            children: 0,
        }
    }
}

impl RelationshipComponent {
    pub fn parent(&self) -> Entity {
        self.parent
    }

    pub fn first(&self) -> Entity {
        self.first
    }

    pub fn last(&self) -> Entity {
        self.last
    }

    pub fn prev(&self) -> Entity {
        self.prev
    }

    pub fn next(&self) -> Entity {
        self.next
    }

    /// Number of direct children.
    pub fn children(&self) -> usize {
        self.children
    }

    fn is_orphan(&self) -> bool {
        self.parent.is_null() && self.children == 0
    }
}

impl EntityRegistry {
    // ---- Link primitives ----

    fn relationship(&self, entity: Entity) -> RelationshipComponent {
        self.try_get::<RelationshipComponent>(entity)
            .copied()
            .unwrap_or_default()
    }

    fn relationship_mut(&mut self, entity: Entity) -> &mut RelationshipComponent {
        self.storage_or_insert::<RelationshipComponent>()
            .get_or_insert_with(entity, RelationshipComponent::default)
    }

    /// Drop the component once it carries no links.
    fn prune_relationship(&mut self, entity: Entity) {
        if self
            .try_get::<RelationshipComponent>(entity)
            .is_some_and(RelationshipComponent::is_orphan)
        {
            if let Some(storage) = self.storage_mut::<RelationshipComponent>() {
                storage.remove(entity);
            }
        }
    }

    /// Unlink `entity` from `parent`'s sibling list. `entity.parent` is left
    /// untouched.
    fn splice_out(&mut self, entity: Entity, parent: Entity) {
        let RelationshipComponent { prev, next, .. } = self.relationship(entity);
        if !prev.is_null() {
            self.relationship_mut(prev).next = next;
        }
        if !next.is_null() {
            self.relationship_mut(next).prev = prev;
        }
        let p = self.relationship_mut(parent);
        if p.first == entity {
            p.first = next;
        }
        if p.last == entity {
            p.last = prev;
        }
        match p.children.checked_sub(1) {
            Some(children) => p.children = children,
            None => self.invariant_violated(format!(
                "{parent} lost child {entity} while its child count was already 0"
            )),
        }
        let r = self.relationship_mut(entity);
        r.prev = Entity::NULL;
        r.next = Entity::NULL;
    }

    /// Link `entity` into `parent`'s list before `anchor`, or at the end when
    /// `anchor` is `NULL`.
    fn splice_in(&mut self, entity: Entity, parent: Entity, anchor: Entity) {
        let prev = if anchor.is_null() {
            self.relationship(parent).last
        } else {
            self.relationship(anchor).prev
        };
        {
            let r = self.relationship_mut(entity);
            r.parent = parent;
            r.prev = prev;
            r.next = anchor;
        }
        if prev.is_null() {
            self.relationship_mut(parent).first = entity;
        } else {
            self.relationship_mut(prev).next = entity;
        }
        if anchor.is_null() {
            self.relationship_mut(parent).last = entity;
        } else {
            self.relationship_mut(anchor).prev = entity;
        }
        self.relationship_mut(parent).children += 1;
    }

    pub(crate) fn is_ancestor(&self, ancestor: Entity, entity: Entity) -> bool {
        let mut current = self.relationship(entity).parent;
        while !current.is_null() {
            if current == ancestor {
                return true;
            }
            current = self.relationship(current).parent;
        }
        false
    }

    // ---- Re-parenting ----

    /// Make `parent` the parent of `entity`, appending it to the end of the
    /// sibling list. `Entity::NULL` detaches `entity` into a root.
    ///
    /// No-op if `parent` already is the parent. Marks `entity` (and its
    /// subtree) dirty. Parenting an entity under itself or one of its
    /// descendants is an invariant violation and changes nothing.
    pub fn set_parent(&mut self, entity: Entity, parent: Entity) {
        if !self.is_alive(entity) {
            warn!(entity = %entity, "cannot re-parent a dead entity");
            return;
        }
        if !parent.is_null() && !self.is_alive(parent) {
            warn!(entity = %entity, parent = %parent, "cannot parent under a dead entity");
            return;
        }
        let old = self.relationship(entity).parent;
        if old == parent {
            return;
        }
        if parent == entity || (!parent.is_null() && self.is_ancestor(entity, parent)) {
            self.invariant_violated(format!(
                "parenting {entity} under {parent} would form a cycle"
            ));
            return;
        }

        if !old.is_null() {
            self.splice_out(entity, old);
            self.prune_relationship(old);
        }
        {
            let r = self.relationship_mut(entity);
            r.parent = Entity::NULL;
            r.prev = Entity::NULL;
            r.next = Entity::NULL;
        }
        self.dirty(entity);
        if parent.is_null() {
            self.prune_relationship(entity);
        } else {
            self.splice_in(entity, parent, Entity::NULL);
        }
    }

    /// As [`set_parent`](Self::set_parent), then move `entity` to sibling
    /// position `index` (clamped to the end).
    pub fn set_parent_at(&mut self, entity: Entity, parent: Entity, index: usize) {
        self.set_parent(entity, parent);
        if parent.is_null() || self.relationship(entity).parent != parent {
            return;
        }
        self.splice_out(entity, parent);
        let anchor = self.get_child(parent, index).unwrap_or(Entity::NULL);
        self.splice_in(entity, parent, anchor);
        self.dirty(entity);
    }

    /// Turn every child of `entity` into a root.
    pub fn detach_children(&mut self, entity: Entity) {
        loop {
            let first = self.relationship(entity).first;
            if first.is_null() {
                break;
            }
            self.set_parent(first, Entity::NULL);
        }
    }

    // ---- Sibling order ----

    /// Swap the positions of two children of the same parent.
    pub fn swap_siblings(&mut self, left: Entity, right: Entity) {
        if left == right || left.is_null() || right.is_null() {
            return;
        }
        let l = self.relationship(left);
        let r = self.relationship(right);
        if l.parent.is_null() || l.parent != r.parent {
            warn!(left = %left, right = %right, "swap_siblings needs two children of one parent");
            return;
        }
        let parent = l.parent;
        if l.next == right {
            self.splice_out(right, parent);
            self.splice_in(right, parent, left);
        } else if r.next == left {
            self.splice_out(left, parent);
            self.splice_in(left, parent, right);
        } else {
            self.splice_out(left, parent);
            self.splice_in(left, parent, r.next);
            self.splice_out(right, parent);
            self.splice_in(right, parent, l.next);
        }
        self.dirty(left);
        self.dirty(right);
    }

    /// Swap with the next sibling.
    pub fn move_to_next(&mut self, entity: Entity) {
        let next = self.relationship(entity).next;
        self.swap_siblings(entity, next);
    }

    /// Swap with the previous sibling.
    pub fn move_to_previous(&mut self, entity: Entity) {
        let prev = self.relationship(entity).prev;
        self.swap_siblings(entity, prev);
    }

    pub fn move_to_first(&mut self, entity: Entity) {
        let RelationshipComponent { parent, prev, .. } = self.relationship(entity);
        if parent.is_null() || prev.is_null() {
            return;
        }
        let first = self.relationship(parent).first;
        self.splice_out(entity, parent);
        self.splice_in(entity, parent, first);
        self.dirty(entity);
    }

    pub fn move_to_last(&mut self, entity: Entity) {
        let RelationshipComponent { parent, next, .. } = self.relationship(entity);
        if parent.is_null() || next.is_null() {
            return;
        }
        self.splice_out(entity, parent);
        self.splice_in(entity, parent, Entity::NULL);
        self.dirty(entity);
    }

    // ---- Queries ----

    pub fn get_parent(&self, entity: Entity) -> Option<Entity> {
        let parent = self.relationship(entity).parent;
        (!parent.is_null()).then_some(parent)
    }

    pub fn get_child_count(&self, entity: Entity) -> usize {
        self.relationship(entity).children
    }

    /// Child at `index`. Walks the sibling list, O(index).
    pub fn get_child(&self, entity: Entity, index: usize) -> Option<Entity> {
        let mut child = self.relationship(entity).first;
        for _ in 0..index {
            if child.is_null() {
                return None;
            }
            child = self.relationship(child).next;
        }
        (!child.is_null()).then_some(child)
    }

    /// Children in sibling order.
    pub fn get_children(&self, entity: Entity) -> Vec<Entity> {
        let mut children = Vec::with_capacity(self.get_child_count(entity));
        let mut child = self.relationship(entity).first;
        while !child.is_null() {
            children.push(child);
            child = self.relationship(child).next;
        }
        children
    }

    /// Position among siblings; `0` for a root.
    pub fn get_sibling_index(&self, entity: Entity) -> usize {
        let mut index = 0;
        let mut prev = self.relationship(entity).prev;
        while !prev.is_null() {
            index += 1;
            prev = self.relationship(prev).prev;
        }
        index
    }

    /// `entity` followed by each ancestor up to the root.
    pub fn get_family_line(&self, entity: Entity) -> Vec<Entity> {
        if entity.is_null() {
            return Vec::new();
        }
        let mut line = vec![entity];
        let mut parent = self.relationship(entity).parent;
        while !parent.is_null() {
            line.push(parent);
            parent = self.relationship(parent).parent;
        }
        line
    }

    /// `entity` and all of its descendants, pre-order, without recursion.
    pub fn subtree(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            out.push(current);
            let children = self.get_children(current);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Every live root (entity without a parent), in index order.
    pub fn roots(&self) -> Vec<Entity> {
        self.allocator
            .iter_alive()
            .filter(|&e| self.get_parent(e).is_none())
            .collect()
    }

    // ---- Clone ----

    /// Copy `entity` into a new root entity with a fresh UUID.
    ///
    /// Every component is copied except hierarchy links, destroy markers,
    /// the dirty flag and scripts. Scripts are re-attached by class so the
    /// clone gets its own host objects. Descendants are not cloned.
    pub fn clone_entity(&mut self, entity: Entity) -> Option<Entity> {
        if !self.is_alive(entity) {
            return None;
        }
        let id = self.identity.generate();
        let clone = self.spawn(id, false).ok()?;

        let skipped = [
            std::any::TypeId::of::<RelationshipComponent>(),
            std::any::TypeId::of::<DestroyEntityComponent>(),
            std::any::TypeId::of::<DestroyComponentComponent>(),
            std::any::TypeId::of::<DirtyComponent>(),
            std::any::TypeId::of::<ScriptComponent>(),
            std::any::TypeId::of::<ScriptEvents<OnLoad>>(),
            std::any::TypeId::of::<ScriptEvents<OnEnable>>(),
            std::any::TypeId::of::<ScriptEvents<OnUpdate>>(),
            std::any::TypeId::of::<ScriptEvents<OnDisable>>(),
            std::any::TypeId::of::<ScriptEvents<OnUnload>>(),
            std::any::TypeId::of::<ScriptEvents<OnDestroy>>(),
        ];
        for storage in &mut self.storages {
            if !skipped.contains(&storage.component_type()) && !storage.contains(clone) {
                storage.clone_value(entity, clone);
            }
        }

        if let Some(tag) = self.try_get::<TagComponent>(clone).map(|t| t.tag.clone()) {
            self.identity.tag(clone, &tag);
        }
        for class in self.script_classes(entity) {
            self.emplace_script(clone, &class);
        }
        if self.has::<TransformComponent>(clone) {
            self.dirty(clone);
        }
        Some(clone)
    }

    // ---- Validation ----

    /// Verify every sibling list: the walk from `first` visits exactly
    /// `children` entities, each pointing back at the parent, with matching
    /// `prev` links, ending at `last`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvariantViolation`] describing the first broken link.
    pub fn check_hierarchy(&self) -> Result<(), RegistryError> {
        let fail = |msg: String| Err(RegistryError::InvariantViolation(msg));
        for (parent, rel) in self.view::<RelationshipComponent>() {
            if rel.is_orphan() {
                return fail(format!("{parent} keeps an empty relationship"));
            }
            let childless = rel.children == 0;
            if childless != rel.first.is_null() || childless != rel.last.is_null() {
                return fail(format!(
                    "{parent} has {} children but first/last disagree",
                    rel.children
                ));
            }
            if !rel.parent.is_null() && !self.is_alive(rel.parent) {
                return fail(format!("{parent} points at dead parent {}", rel.parent));
            }
            let mut visited = 0;
            let mut prev = Entity::NULL;
            let mut child = rel.first;
            while !child.is_null() {
                if visited == rel.children {
                    return fail(format!("{parent} lists more than {} children", rel.children));
                }
                let Some(link) = self.try_get::<RelationshipComponent>(child) else {
                    return fail(format!("child {child} of {parent} has no relationship"));
                };
                if link.parent != parent {
                    return fail(format!("child {child} of {parent} points at {}", link.parent));
                }
                if link.prev != prev {
                    return fail(format!("child {child} of {parent} has a broken prev link"));
                }
                visited += 1;
                prev = child;
                child = link.next;
            }
            if visited != rel.children {
                return fail(format!(
                    "{parent} counts {} children but links {visited}",
                    rel.children
                ));
            }
            if prev != rel.last {
                return fail(format!(
                    "{parent}'s last child is {} but the walk ends at {prev}",
                    rel.last
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
