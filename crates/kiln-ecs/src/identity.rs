//! Stable identity and tag indices.
//!
//! Every live entity owns exactly one [`Uuid`] that survives save/load. The
//! [`IdentityIndex`] keeps the UUID <-> entity maps and the tag -> entities
//! index. Names are not indexed; they are found by scanning `NameComponent`.

use std::collections::{BTreeSet, HashMap};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use uuid::Uuid;

use crate::entity::Entity;
use crate::RegistryError;

/// Bidirectional UUID map plus the tag index.
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    id_to_entity: HashMap<Uuid, Entity>,
    entity_to_id: HashMap<Entity, Uuid>,
    tags: HashMap<String, BTreeSet<Entity>>,
    rng: Pcg64,
}

impl IdentityIndex {
    /// Create an empty index. With a seed, generated UUIDs are reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
        Self {
            id_to_entity: HashMap::new(),
            entity_to_id: HashMap::new(),
            tags: HashMap::new(),
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Mint a random (v4) UUID not currently in use.
    pub fn generate(&mut self) -> Uuid {
        loop {
            let id = uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid();
            if !self.id_to_entity.contains_key(&id) {
                return id;
            }
        }
    }

    /// Bind `id` to `entity`.
    pub fn insert(&mut self, id: Uuid, entity: Entity) -> Result<(), RegistryError> {
        if id.is_nil() {
            return Err(RegistryError::NilIdentity);
        }
        if self.id_to_entity.contains_key(&id) {
            return Err(RegistryError::IdentityCollision { id });
        }
        self.id_to_entity.insert(id, entity);
        self.entity_to_id.insert(entity, id);
        Ok(())
    }

    /// Drop the UUID binding of `entity`, returning the UUID it had.
    pub fn remove(&mut self, entity: Entity) -> Option<Uuid> {
        let id = self.entity_to_id.remove(&entity)?;
        self.id_to_entity.remove(&id);
        Some(id)
    }

    pub fn entity(&self, id: Uuid) -> Option<Entity> {
        self.id_to_entity.get(&id).copied()
    }

    pub fn id(&self, entity: Entity) -> Option<Uuid> {
        self.entity_to_id.get(&entity).copied()
    }

    pub fn contains_id(&self, id: Uuid) -> bool {
        self.id_to_entity.contains_key(&id)
    }

    /// Number of bound identities.
    pub fn len(&self) -> usize {
        self.id_to_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_entity.is_empty()
    }

    // ---- Tags ----

    pub fn tag(&mut self, entity: Entity, tag: &str) {
        self.tags.entry(tag.to_owned()).or_default().insert(entity);
    }

    /// Remove `entity` from `tag`'s set, dropping the set once empty.
    pub fn untag(&mut self, entity: Entity, tag: &str) {
        if let Some(set) = self.tags.get_mut(tag) {
            set.remove(&entity);
            if set.is_empty() {
                self.tags.remove(tag);
            }
        }
    }

    pub fn tagged(&self, tag: &str) -> Option<&BTreeSet<Entity>> {
        self.tags.get(tag)
    }

    pub fn clear_tags(&mut self) {
        self.tags.clear();
    }

    /// Forget every binding. The UUID generator keeps its state.
    pub fn clear(&mut self) {
        self.id_to_entity.clear();
        self.entity_to_id.clear();
        self.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_generation_is_reproducible() {
        let mut a = IdentityIndex::new(Some(5));
        let mut b = IdentityIndex::new(Some(5));
        assert_eq!(a.generate(), b.generate());
        assert_eq!(a.generate().get_version_num(), 4);
    }

    #[test]
    fn insert_and_lookup_both_ways() {
        let mut index = IdentityIndex::new(Some(1));
        let id = index.generate();
        let e = Entity::new(0, 0);
        index.insert(id, e).unwrap();
        assert_eq!(index.entity(id), Some(e));
        assert_eq!(index.id(e), Some(id));
        assert_eq!(index.remove(e), Some(id));
        assert!(index.entity(id).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn collision_is_rejected() {
        let mut index = IdentityIndex::new(Some(1));
        let id = index.generate();
        index.insert(id, Entity::new(0, 0)).unwrap();
        let err = index.insert(id, Entity::new(1, 0)).unwrap_err();
        assert!(matches!(err, RegistryError::IdentityCollision { .. }));
        assert_eq!(index.entity(id), Some(Entity::new(0, 0)));
    }

    #[test]
    fn nil_is_rejected() {
        let mut index = IdentityIndex::new(None);
        assert!(matches!(
            index.insert(Uuid::nil(), Entity::new(0, 0)),
            Err(RegistryError::NilIdentity)
        ));
    }

    #[test]
    fn untag_drops_empty_sets() {
        let mut index = IdentityIndex::new(None);
        let e = Entity::new(0, 0);
        index.tag(e, "Enemy");
        assert_eq!(index.tagged("Enemy").map(|s| s.len()), Some(1));
        index.untag(e, "Enemy");
        assert!(index.tagged("Enemy").is_none());
    }
}
