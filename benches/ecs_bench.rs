use archetype_ecs::system::{AccessDecl, QuerySystem};
use archetype_ecs::{App, BoxedSystem, World};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
}

fn movement_system() -> BoxedSystem {
    Box::new(QuerySystem::new(
        "movement",
        AccessDecl::new().read::<Velocity>().write::<Position>(),
        |view, _cmds| {
            let vel = *view.get::<Velocity>().unwrap();
            let pos = view.get_mut::<Position>().unwrap();
            pos.x += vel.x;
            pos.y += vel.y;
        },
    ))
}

fn spawn_entities(n: usize) -> World {
    let mut world = World::new();
    for i in 0..n {
        world.spawn((
            Position { x: i as f32, y: 0.0 },
            Velocity { x: 1.0, y: 1.0 },
        ));
    }
    world
}

fn bench_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");
    for size in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(format!("{size}_entities"), &size, |b, &size| {
            b.iter(|| spawn_entities(size));
        });
    }
    group.finish();
}

fn bench_movement_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_update");
    for size in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(format!("{size}_entities"), &size, |b, &size| {
            b.iter_batched(
                || {
                    let mut app = App::new();
                    for i in 0..size {
                        app.world_mut().spawn((
                            Position { x: i as f32, y: 0.0 },
                            Velocity { x: 1.0, y: 1.0 },
                        ));
                    }
                    app.add_system(movement_system());
                    app
                },
                |mut app| app.update().unwrap(),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_spawn, bench_movement_update);
criterion_main!(benches);
