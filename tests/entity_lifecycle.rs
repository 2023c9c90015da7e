//! Whole-`World` scenarios: spawn/despawn, structural transitions, and hole
//! compaction driven entirely through the public API, no internal types.

use archetype_ecs::World;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(u32);

#[test]
fn despawned_entity_is_no_longer_valid() {
    let mut world = World::new();
    let e = world.spawn((Position { x: 0.0, y: 0.0 },));
    assert!(world.is_alive(e));
    assert!(world.despawn(e));
    assert!(!world.is_alive(e));
    assert!(!world.despawn(e));
}

#[test]
fn reusing_an_entity_slot_bumps_the_generation() {
    let mut world = World::new();
    let first = world.spawn((Health(10),));
    world.despawn(first);
    let second = world.spawn((Health(20),));

    assert_eq!(first.id, second.id);
    assert_ne!(first.generation, second.generation);
    assert!(!world.is_alive(first));
    assert!(world.is_alive(second));
}

#[test]
fn adding_a_component_moves_entity_to_a_new_archetype() {
    let mut world = World::new();
    let e = world.spawn((Position { x: 1.0, y: 1.0 },));
    let archetypes_before = world.archetype_count();

    assert!(world.add_component(e, Velocity { x: 2.0, y: 3.0 }));
    assert!(world.archetype_count() > archetypes_before);
    assert_eq!(
        *world.get_component::<Position>(e).unwrap(),
        Position { x: 1.0, y: 1.0 }
    );
    assert_eq!(
        *world.get_component::<Velocity>(e).unwrap(),
        Velocity { x: 2.0, y: 3.0 }
    );
}

#[test]
fn removing_a_component_drops_it_but_keeps_the_rest() {
    let mut world = World::new();
    let e = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 1.0 }));
    assert!(world.remove_component::<Velocity>(e));
    assert!(world.get_component::<Velocity>(e).is_none());
    assert!(world.get_component::<Position>(e).is_some());
}

#[test]
fn removing_middle_entity_relocates_the_tail_not_the_identity() {
    let mut world = World::new();
    let entities: Vec<_> = (0..8u32)
        .map(|i| world.spawn((Health(i),)))
        .collect();

    let middle = entities[3];
    world.despawn(middle);

    for (i, &e) in entities.iter().enumerate() {
        if e == middle {
            continue;
        }
        let expected = Health(i as u32);
        assert_eq!(*world.get_component::<Health>(e).unwrap(), expected);
        assert!(world.is_alive(e));
    }
}

#[test]
fn archetypes_are_shared_across_entities_with_the_same_component_set() {
    let mut world = World::new();
    let a = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 1.0 }));
    let before = world.archetype_count();
    let b = world.spawn((Position { x: 5.0, y: 5.0 }, Velocity { x: 0.0, y: 0.0 }));

    assert_eq!(world.archetype_count(), before);
    assert_ne!(a.id, b.id);
}
