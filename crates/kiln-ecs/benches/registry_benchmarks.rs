//! Entity registry benchmarks.
//!
//! Covers the per-frame hot paths: creating and committing destruction of
//! entity batches, re-parenting inside a wide hierarchy, and view iteration.
//!
//! Run with: `cargo bench --bench registry_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kiln_ecs::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Velocity {
    dx: f32,
    dy: f32,
}

fn registry() -> EntityRegistry {
    EntityRegistry::register_component::<Velocity>("velocity");
    EntityRegistry::with_config(RegistryConfig {
        invariant_policy: InvariantPolicy::Log,
        ..RegistryConfig::default().with_seed(42)
    })
}

fn bench_create_destroy(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_destroy_queued");
    for &count in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut registry = registry();
            b.iter(|| {
                for _ in 0..count {
                    let e = registry.create();
                    registry.destroy(e, false);
                }
                black_box(registry.destroy_queued());
            });
        });
    }
    group.finish();
}

fn bench_set_parent(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_parent");
    for &count in &[100usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut registry = registry();
            let left = registry.create();
            let right = registry.create();
            let children: Vec<Entity> = (0..count).map(|_| registry.create()).collect();
            for &child in &children {
                registry.set_parent(child, left);
            }
            let mut flip = false;
            b.iter(|| {
                let target = if flip { left } else { right };
                for &child in &children {
                    registry.set_parent(child, target);
                }
                flip = !flip;
                black_box(registry.get_child_count(target));
            });
        });
    }
    group.finish();
}

fn bench_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_iteration");
    for &count in &[1_000usize, 10_000] {
        let mut registry = registry();
        for i in 0..count {
            let e = registry.create();
            registry
                .emplace(e, Velocity { dx: i as f32, dy: 1.0 })
                .unwrap();
            if i % 2 == 0 {
                registry.emplace(e, TransformComponent::default()).unwrap();
            }
        }
        group.bench_with_input(BenchmarkId::new("view", count), &count, |b, _| {
            b.iter(|| {
                let sum: f32 = registry.view::<Velocity>().map(|(_, v)| v.dx).sum();
                black_box(sum);
            });
        });
        group.bench_with_input(BenchmarkId::new("view2", count), &count, |b, _| {
            b.iter(|| {
                let moved = registry
                    .view2::<TransformComponent, Velocity>()
                    .filter(|(_, t, v)| t.position[0] + v.dx > 0.0)
                    .count();
                black_box(moved);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_create_destroy, bench_set_parent, bench_view);
criterion_main!(benches);
