//! Spawning entities, running one system, and reading the result back.

use archetype_ecs::system::{AccessDecl, QuerySystem};
use archetype_ecs::{App, BoxedSystem};

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

fn main() {
    let mut app = App::new();

    let entity = app
        .world_mut()
        .spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.5 }));
    app.world_mut().spawn((Position { x: 10.0, y: 10.0 },));

    app.add_system(movement_system());

    for tick in 0..5 {
        app.update().expect("update");
        let pos = *app.world().get_component::<Position>(entity).unwrap();
        println!("tick {tick}: entity {:?} at ({}, {})", entity, pos.x, pos.y);
    }

    app.world_mut().despawn(entity);
    assert!(!app.world().is_alive(entity));
    println!("despawned {:?}", entity);
}
