//! Per-type component storage.
//!
//! Each component type lives in its own [`ComponentStorage`], a sparse set:
//! a dense `Vec<T>` packed for iteration, a parallel vector of owning
//! entities, and a sparse table from entity index to dense slot. Insert,
//! lookup, removal and `contains` are all O(1). Removal swaps the last element
//! into the hole, so iteration order is insertion order until something is
//! removed.

use std::any::{Any, TypeId};

use crate::component::{Component, ComponentValue};
use crate::entity::Entity;

// ---------------------------------------------------------------------------
// ComponentStorage
// ---------------------------------------------------------------------------

/// Homogeneous storage for one component type.
#[derive(Debug, Clone)]
pub struct ComponentStorage<T> {
    dense: Vec<T>,
    entities: Vec<Entity>,
    sparse: Vec<Option<u32>>,
}

impl<T> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self {
            dense: Vec::new(),
            entities: Vec::new(),
            sparse: Vec::new(),
        }
    }
}

impl<T: Component> ComponentStorage<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Dense slot of `entity`, checking the generation so stale handles
    /// miss.
    fn slot(&self, entity: Entity) -> Option<usize> {
        let slot = (*self.sparse.get(entity.index() as usize)?)? as usize;
        (self.entities[slot] == entity).then_some(slot)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.slot(entity).is_some()
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot(entity).map(|slot| &self.dense[slot])
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = self.slot(entity)?;
        Some(&mut self.dense[slot])
    }

    /// Insert `value`, replacing any value `entity` already had.
    pub fn insert(&mut self, entity: Entity, value: T) -> &mut T {
        let slot = match self.slot(entity) {
            Some(slot) => {
                self.dense[slot] = value;
                slot
            }
            None => self.push(entity, value),
        };
        &mut self.dense[slot]
    }

    /// Return the existing value, or insert the one produced by `make`.
    pub fn get_or_insert_with(&mut self, entity: Entity, make: impl FnOnce() -> T) -> &mut T {
        let slot = match self.slot(entity) {
            Some(slot) => slot,
            None => self.push(entity, make()),
        };
        &mut self.dense[slot]
    }

    fn push(&mut self, entity: Entity, value: T) -> usize {
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, None);
        }
        // an older generation of this index may still hold a slot
        if let Some(stale) = self.sparse[idx] {
            let stale_entity = self.entities[stale as usize];
            self.remove(stale_entity);
        }
        let slot = self.dense.len();
        self.dense.push(value);
        self.entities.push(entity);
        self.sparse[idx] = Some(slot as u32);
        slot
    }

    /// Remove and return the value for `entity`.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.slot(entity)?;
        self.sparse[entity.index() as usize] = None;
        let value = self.dense.swap_remove(slot);
        self.entities.swap_remove(slot);
        if let Some(&moved) = self.entities.get(slot) {
            self.sparse[moved.index() as usize] = Some(slot as u32);
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.dense.clear();
        self.entities.clear();
        self.sparse.clear();
    }

    /// Entities with a value, in storage order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.entities.iter().copied().zip(self.dense.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        self.entities.iter().copied().zip(self.dense.iter_mut())
    }
}

// ---------------------------------------------------------------------------
// ErasedStorage
// ---------------------------------------------------------------------------

/// Object-safe face of a [`ComponentStorage`], so the registry can hold
/// storages of every type in one list.
pub trait ErasedStorage: 'static {
    /// `TypeId` of the stored component.
    fn component_type(&self) -> TypeId;

    fn type_name(&self) -> &'static str;

    fn contains(&self, entity: Entity) -> bool;

    /// Drop the value for `entity`. Returns whether one existed.
    fn remove(&mut self, entity: Entity) -> bool;

    fn remove_many(&mut self, entities: &[Entity]) {
        for &entity in entities {
            self.remove(entity);
        }
    }

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn entities(&self) -> &[Entity];

    fn get_value(&self, entity: Entity) -> Option<&dyn ComponentValue>;

    fn get_value_mut(&mut self, entity: Entity) -> Option<&mut dyn ComponentValue>;

    /// Copy the value of `src` onto `dst`. Returns `false` if `src` had none.
    fn clone_value(&mut self, src: Entity, dst: Entity) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStorage for ComponentStorage<T> {
    fn component_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn contains(&self, entity: Entity) -> bool {
        ComponentStorage::contains(self, entity)
    }

    fn remove(&mut self, entity: Entity) -> bool {
        ComponentStorage::remove(self, entity).is_some()
    }

    fn clear(&mut self) {
        ComponentStorage::clear(self)
    }

    fn len(&self) -> usize {
        ComponentStorage::len(self)
    }

    fn entities(&self) -> &[Entity] {
        ComponentStorage::entities(self)
    }

    fn get_value(&self, entity: Entity) -> Option<&dyn ComponentValue> {
        self.get(entity).map(|v| v as &dyn ComponentValue)
    }

    fn get_value_mut(&mut self, entity: Entity) -> Option<&mut dyn ComponentValue> {
        self.get_mut(entity).map(|v| v as &mut dyn ComponentValue)
    }

    fn clone_value(&mut self, src: Entity, dst: Entity) -> bool {
        match self.get(src).cloned() {
            Some(value) => {
                self.insert(dst, value);
                true
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
