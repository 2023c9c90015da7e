//! Schedule ordering, conflict-free grouping, and `stop_at` driven through
//! `App`/`ScheduleSet` end to end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use archetype_ecs::system::{AccessDecl, TickSystem};
use archetype_ecs::{App, BoxedSystem, Schedule, ScheduleSet, SystemAccess};

#[derive(Debug, Clone, Copy)]
struct Counter(u32);

fn writer(name: &'static str, log: Arc<AtomicU32>, bit: u32) -> BoxedSystem {
    Box::new(TickSystem::new(
        name,
        SystemAccess {
            component_writes: vec![],
            ..Default::default()
        },
        move |_ctx, _cmds| {
            log.fetch_or(bit, Ordering::SeqCst);
        },
    ))
}

#[test]
fn conflicting_systems_still_observe_declared_order() {
    let mut world = archetype_ecs::World::new();
    let e = world.spawn((Counter(0),));

    let mut schedule = Schedule::new();
    schedule.add_system(Box::new(archetype_ecs::system::QuerySystem::new(
        "increment",
        AccessDecl::new().write::<Counter>(),
        move |view, _cmds| {
            view.get_mut::<Counter>().unwrap().0 += 1;
        },
    )));
    schedule.add_system(Box::new(archetype_ecs::system::QuerySystem::new(
        "double",
        AccessDecl::new().write::<Counter>(),
        move |view, _cmds| {
            view.get_mut::<Counter>().unwrap().0 *= 2;
        },
    )));

    let pool = archetype_ecs::ThreadPool::new(1);
    schedule.run(&world.context(), &pool).unwrap();

    assert_eq!(*world.get_component::<Counter>(e).unwrap(), Counter(2));
}

#[test]
fn disjoint_systems_both_run_within_one_update() {
    let mut app = App::new();
    let log = Arc::new(AtomicU32::new(0));

    app.add_system(writer("a", log.clone(), 0b01));
    app.add_system(writer("b", log.clone(), 0b10));

    app.update().unwrap();

    assert_eq!(log.load(Ordering::SeqCst), 0b11);
}

#[test]
fn update_until_stops_after_the_named_schedule() {
    let mut schedules = ScheduleSet::new();
    let log = Arc::new(AtomicU32::new(0));

    let mut first = Schedule::new();
    first.add_system(writer("first", log.clone(), 0b01));
    schedules.add_schedule("first", first);

    let mut second = Schedule::new();
    second.add_system(writer("second", log.clone(), 0b10));
    schedules.add_schedule_after("second", second, "first");

    let mut app = App::with_schedules(schedules);
    app.update_until(Some("first")).unwrap();

    assert_eq!(log.load(Ordering::SeqCst), 0b01, "second schedule must not have run yet");
}
