//! Two systems that touch disjoint components land in the same execution
//! group and run across the thread pool's workers concurrently.

use archetype_ecs::system::{AccessDecl, QuerySystem};
use archetype_ecs::{App, BoxedSystem};

#[derive(Debug, Clone, Copy)]
struct Health(u32);

#[derive(Debug, Clone, Copy)]
struct Shield(u32);

fn regen_health() -> BoxedSystem {
    Box::new(QuerySystem::new(
        "regen_health",
        AccessDecl::new().write::<Health>(),
        |view, _cmds| {
            view.get_mut::<Health>().unwrap().0 += 1;
        },
    ))
}

fn regen_shield() -> BoxedSystem {
    Box::new(QuerySystem::new(
        "regen_shield",
        AccessDecl::new().write::<Shield>(),
        |view, _cmds| {
            view.get_mut::<Shield>().unwrap().0 += 2;
        },
    ))
}

fn main() {
    let mut app = App::new().with_worker_count(4);

    let entity = app.world_mut().spawn((Health(100), Shield(0)));

    app.add_system(regen_health());
    app.add_system(regen_shield());

    for _ in 0..10 {
        app.update().expect("update");
    }

    let health = *app.world().get_component::<Health>(entity).unwrap();
    let shield = *app.world().get_component::<Shield>(entity).unwrap();
    println!("health = {}, shield = {}", health.0, shield.0);
    assert_eq!(health.0, 110);
    assert_eq!(shield.0, 20);
}
