// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! World: the aggregate that owns every other storage layer.
//!
//! `World` itself stores nothing directly; it just bundles a
//! `TypeRegistrar`, `ArchetypeManager`, `Mutex<EntityPool>` and
//! `ResourcePool` behind one handle and exposes the immediate-mode
//! convenience API (`spawn`/`despawn`/`add_component`/...) that setup code
//! outside a running schedule wants. Systems never touch `World` directly —
//! they only see the `SystemContext` borrowed out of it.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::archetype_manager::ArchetypeManager;
use crate::component::{Bundle, Component};
use crate::entity::{Entity, EntityPool};
use crate::error::{EcsError, Result};
use crate::resource::ResourcePool;
use crate::system::SystemContext;
use crate::table::RowPos;
use crate::type_registry::TypeRegistrar;

pub struct World {
    registrar: TypeRegistrar,
    archetypes: ArchetypeManager,
    entities: Mutex<EntityPool>,
    resources: ResourcePool,
    /// Bumped once per tick by whatever drives this world (`App::update` or
    /// a caller driving `ScheduleSet::run` directly). Coarse-grained on
    /// purpose: a system that wants to know "has anything changed since I
    /// last ran" stores the tick it last observed and compares against
    /// `World::tick()`, rather than the core tracking per-component,
    /// per-row dirty bits itself.
    tick: AtomicU64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            registrar: TypeRegistrar::new(),
            archetypes: ArchetypeManager::new(),
            entities: Mutex::new(EntityPool::new()),
            resources: ResourcePool::new(),
            tick: AtomicU64::new(0),
        }
    }

    /// The world's current tick counter. Starts at zero and only ever
    /// increases; never reset, never wraps in practice.
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Advances the tick counter by one, returning the new value. Called by
    /// `App::update`/`ScheduleSet::run` once per pass over every schedule;
    /// exposed directly so a caller driving schedules some other way can
    /// still participate in the same "last observed tick" convention.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn registrar(&self) -> &TypeRegistrar {
        &self.registrar
    }

    pub fn archetypes(&self) -> &ArchetypeManager {
        &self.archetypes
    }

    pub fn resources(&self) -> &ResourcePool {
        &self.resources
    }

    /// Borrows every layer behind a `SystemContext`, the only view systems
    /// are ever handed.
    pub fn context(&self) -> SystemContext<'_> {
        SystemContext {
            registrar: &self.registrar,
            archetypes: &self.archetypes,
            entities: &self.entities,
            resources: &self.resources,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.lock().is_empty()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.lock().is_alive(entity)
    }

    /// Spawns an entity with `bundle`'s components and commits immediately.
    /// Meant for setup code running outside a schedule tick; systems should
    /// go through `SystemContext::commands()` instead, so their mutations
    /// stay batched with everything else the tick produces.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let mut cmds = self.context().commands();
        let entity = cmds.create_entity();
        cmds.add_components(entity, bundle);
        cmds.commit();
        entity
    }

    pub fn despawn(&mut self, entity: Entity) -> bool {
        let mut cmds = self.context().commands();
        let removed = cmds.remove_entity(entity);
        cmds.commit();
        removed
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> bool {
        let mut cmds = self.context().commands();
        let added = cmds.add_component(entity, value);
        cmds.commit();
        added
    }

    pub fn add_components<B: Bundle>(&mut self, entity: Entity, bundle: B) -> bool {
        let mut cmds = self.context().commands();
        let added = cmds.add_components(entity, bundle);
        cmds.commit();
        added
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> bool {
        let mut cmds = self.context().commands();
        let removed = cmds.remove_component(entity);
        cmds.commit();
        removed
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.get_component::<T>(entity).is_some()
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let info = self.entities.lock().info(entity)?;
        let type_id = self.registrar.get_type_id::<T>()?;
        self.archetypes
            .with(info.archetype_id, |archetype| {
                let col = archetype.column_index(type_id)?;
                let pos = RowPos {
                    chunk_index: info.chunk_index as usize,
                    row_index: info.index_in_chunk as usize,
                };
                let ptr = archetype.get_component_ptr(col, pos);
                Some(unsafe { &*(ptr as *const T) })
            })
            .flatten()
    }

    /// # Safety argument
    /// Exclusivity here is the caller's responsibility, exactly as for
    /// `EntityView::get_mut`: this is meant for setup/teardown code running
    /// outside a schedule tick, where nothing else touches the world
    /// concurrently, not for call sites racing a running schedule.
    pub fn get_component_mut<T: Component>(&self, entity: Entity) -> Option<&mut T> {
        let info = self.entities.lock().info(entity)?;
        let type_id = self.registrar.get_type_id::<T>()?;
        self.archetypes
            .with(info.archetype_id, |archetype| {
                let col = archetype.column_index(type_id)?;
                let pos = RowPos {
                    chunk_index: info.chunk_index as usize,
                    row_index: info.index_in_chunk as usize,
                };
                let ptr = archetype.get_component_ptr(col, pos);
                Some(unsafe { &mut *(ptr as *mut T) })
            })
            .flatten()
    }

    pub fn insert_resource<T: std::any::Any + Send + Sync>(&mut self, value: T) {
        self.resources.insert(value);
    }

    pub fn add_resource<T: std::any::Any + Send + Sync>(&mut self, value: T) -> Result<()> {
        self.resources.add(value)
    }

    pub fn resource<T: std::any::Any + Send + Sync>(&self) -> Option<&T> {
        self.resources.get::<T>()
    }

    pub fn resource_mut<T: std::any::Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.resources.get_mut::<T>()
    }

    pub fn has_resource<T: std::any::Any + Send + Sync>(&self) -> bool {
        self.resources.has::<T>()
    }

    pub fn remove_resource<T: std::any::Any + Send + Sync>(&mut self) -> Option<T> {
        self.resources.remove::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    struct FrameCount(u32);

    #[test]
    fn spawn_then_get_component_round_trips() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 1.0, y: 2.0 },));
        assert!(world.is_alive(entity));
        assert_eq!(
            *world.get_component::<Position>(entity).unwrap(),
            Position { x: 1.0, y: 2.0 }
        );
    }

    #[test]
    fn despawn_removes_entity() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 0.0, y: 0.0 },));
        assert!(world.despawn(entity));
        assert!(!world.is_alive(entity));
        assert!(world.get_component::<Position>(entity).is_none());
    }

    #[test]
    fn add_and_remove_component_transitions_archetypes() {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 0.0, y: 0.0 },));
        assert!(world.add_component(entity, Velocity { x: 1.0, y: 1.0 }));
        assert!(world.has_component::<Velocity>(entity));

        assert!(world.remove_component::<Velocity>(entity));
        assert!(!world.has_component::<Velocity>(entity));
        assert!(world.has_component::<Position>(entity));
    }

    #[test]
    fn advance_tick_is_monotonic() {
        let world = World::new();
        assert_eq!(world.tick(), 0);
        assert_eq!(world.advance_tick(), 1);
        assert_eq!(world.advance_tick(), 2);
        assert_eq!(world.tick(), 2);
    }

    #[test]
    fn resources_round_trip() {
        let mut world = World::new();
        world.add_resource(FrameCount(0)).unwrap();
        world.resource_mut::<FrameCount>().unwrap().0 += 1;
        assert_eq!(world.resource::<FrameCount>().unwrap().0, 1);
        assert!(world.remove_resource::<FrameCount>().is_some());
        assert!(!world.has_resource::<FrameCount>());
    }
}
