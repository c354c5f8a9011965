//! Property tests for entity identity.
//!
//! Live entities always carry distinct UUIDs that map back to them, and a
//! destroyed entity's UUID stops resolving.

use std::collections::HashSet;

use kiln_ecs::destroy::DestroyEntityComponent;
use kiln_ecs::prelude::*;
use proptest::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum IdentityOp {
    Create,
    CreateNamed(u8),
    Destroy(usize),
    DestroyImmediate(usize),
    Commit,
    Clone(usize),
}

fn op_strategy() -> impl Strategy<Value = IdentityOp> {
    prop_oneof![
        4 => Just(IdentityOp::Create),
        2 => (0..4u8).prop_map(IdentityOp::CreateNamed),
        2 => (0..64usize).prop_map(IdentityOp::Destroy),
        1 => (0..64usize).prop_map(IdentityOp::DestroyImmediate),
        2 => Just(IdentityOp::Commit),
        1 => (0..64usize).prop_map(IdentityOp::Clone),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn live_identities_are_unique_and_resolve(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 1..100),
    ) {
        let mut registry = EntityRegistry::with_config(RegistryConfig::default().with_seed(seed));
        let mut retired: HashSet<Uuid> = HashSet::new();

        for op in ops {
            let entities = registry.entities();
            let pick = |i: usize| (!entities.is_empty()).then(|| entities[i % entities.len()]);
            match op {
                IdentityOp::Create => {
                    registry.create();
                }
                IdentityOp::CreateNamed(n) => {
                    registry.create_named(&format!("Entity{n}"));
                }
                IdentityOp::Destroy(i) => {
                    if let Some(e) = pick(i) {
                        registry.destroy(e, true);
                    }
                }
                IdentityOp::DestroyImmediate(i) => {
                    if let Some(e) = pick(i) {
                        for doomed in registry.subtree(e) {
                            retired.extend(registry.get_id(doomed));
                        }
                        registry.destroy_immediate(e, true);
                    }
                }
                IdentityOp::Commit => {
                    let doomed = registry.entities_with::<DestroyEntityComponent>();
                    for doomed in doomed {
                        retired.extend(registry.get_id(doomed));
                    }
                    registry.destroy_queued();
                }
                IdentityOp::Clone(i) => {
                    if let Some(e) = pick(i) {
                        let copy = registry.clone_entity(e).unwrap();
                        prop_assert_ne!(registry.get_id(copy), registry.get_id(e));
                    }
                }
            }

            let mut seen = HashSet::new();
            for entity in registry.entities() {
                let id = registry.get_id(entity).unwrap();
                prop_assert!(!id.is_nil());
                prop_assert!(seen.insert(id), "duplicate identity {}", id);
                prop_assert_eq!(registry.find_by_id(id), Some(entity));
            }
            for id in &retired {
                prop_assert_eq!(registry.find_by_id(*id), None);
            }
        }
    }

    #[test]
    fn explicit_identity_is_kept(bytes in any::<[u8; 16]>()) {
        let id = Uuid::from_bytes(bytes);
        prop_assume!(!id.is_nil());
        let mut registry = EntityRegistry::new();
        let e = registry.create_with_id(id);
        prop_assert_eq!(registry.get_id(e), Some(id));
        prop_assert!(matches!(
            registry.try_create_with_id(id),
            Err(RegistryError::IdentityCollision { .. })
        ), "expected IdentityCollision");
        registry.destroy_immediate(e, false);
        let again = registry.create_with_id(id);
        prop_assert_eq!(registry.find_by_id(id), Some(again));
    }
}
