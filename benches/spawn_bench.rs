use archetype_ecs::World;
use criterion::{criterion_group, criterion_main, Criterion};

#[derive(Debug, Clone, Copy)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Health(u32);

fn bench_spawn_despawn_churn(c: &mut Criterion) {
    c.bench_function("spawn_then_despawn_10k", |b| {
        b.iter(|| {
            let mut world = World::new();
            let entities: Vec<_> = (0..10_000)
                .map(|_| world.spawn((Position(1.0, 2.0, 3.0), Velocity(0.0, 0.0, 0.0), Health(100))))
                .collect();
            for e in entities {
                world.despawn(e);
            }
        });
    });
}

fn bench_archetype_transition(c: &mut Criterion) {
    c.bench_function("add_remove_component_10k", |b| {
        b.iter(|| {
            let mut world = World::new();
            let entities: Vec<_> = (0..10_000)
                .map(|_| world.spawn((Position(0.0, 0.0, 0.0),)))
                .collect();
            for &e in &entities {
                world.add_component(e, Velocity(1.0, 0.0, 0.0));
            }
            for &e in &entities {
                world.remove_component::<Velocity>(e);
            }
        });
    });
}

criterion_group!(benches, bench_spawn_despawn_churn, bench_archetype_transition);
criterion_main!(benches);
