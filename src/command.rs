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

//! Deferred structural mutation buffer.
//!
//! A `Commands` is produced by a running system and records entity
//! creation/removal and component add/remove without ever taking a lock that
//! would block a sibling system running concurrently in the same schedule
//! group. Every recorded mutation performs its archetype move and byte copy
//! immediately (so several `Commands` buffers can fan out across archetypes
//! in parallel); only the bookkeeping that must be serialized -- the entity
//! pool's `EntityInfo`, and each archetype's `position_of`/`entity_at` maps
//! -- is deferred to `commit`, which the schedule calls once at a
//! synchronisation point with exclusive access.

use std::any::TypeId;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::archetype::{Archetype, ArchetypeId};
use crate::archetype_manager::ArchetypeManager;
use crate::component::{Bundle, Component, MAX_BUNDLE_COMPONENTS};
use crate::entity::{Entity, EntityInfo, EntityPool};
use crate::table::RowPos;
use crate::type_registry::TypeIndex;
use crate::type_registry::TypeRegistrar;

/// Identifies the *shape* of a structural transition so repeated calls with
/// the same source archetype and the same added/removed type set reuse a
/// cached destination archetype instead of re-deriving it through
/// `ArchetypeManager::get_or_create` every time.
#[derive(Clone, PartialEq, Eq, Hash)]
enum MutationKind {
    AddComponent(TypeIndex),
    AddBundle(TypeId),
    RemoveComponent(TypeIndex),
    RemoveBundle(TypeId),
}

/// Cached outcome of one `(src_archetype, mutation_kind)` transition: just
/// the destination archetype. Column indices for the fields being written
/// are resolved per call through `Archetype::column_index`, an `FxHashMap`
/// lookup already cheap enough that caching it again wasn't worth the extra
/// bookkeeping (documented in DESIGN.md as a simplification).
#[derive(Clone, Copy)]
struct TransferPlan {
    dst: ArchetypeId,
}

/// A deferred mutation buffer, borrowed from the `World` it will eventually
/// commit into. One is constructed per system per tick; none is ever shared
/// between two systems, so none of its own state needs synchronisation.
pub struct Commands<'w> {
    registrar: &'w TypeRegistrar,
    archetypes: &'w ArchetypeManager,
    entities: &'w Mutex<EntityPool>,

    transfer_cache: FxHashMap<(ArchetypeId, MutationKind), TransferPlan>,

    /// `entity.id -> (entity, destination archetype, destination row)` for
    /// every entity created or structurally moved this tick, not yet
    /// reflected in the entity pool or either archetype's bookkeeping.
    modified: FxHashMap<u32, (Entity, ArchetypeId, RowPos)>,
    /// `entity.id -> entity` for every entity despawned this tick. An
    /// entity present here is never also present in `modified`: a later
    /// `remove_entity` call pops any pending `modified` entry first.
    removed: FxHashMap<u32, Entity>,

    current_entity: Option<Entity>,
}

impl<'w> Commands<'w> {
    pub fn new(
        registrar: &'w TypeRegistrar,
        archetypes: &'w ArchetypeManager,
        entities: &'w Mutex<EntityPool>,
    ) -> Self {
        Self {
            registrar,
            archetypes,
            entities,
            transfer_cache: FxHashMap::default(),
            modified: FxHashMap::default(),
            removed: FxHashMap::default(),
            current_entity: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }

    /// Reserves a fresh entity id and immediately places it in the empty
    /// archetype at a reserved row, so a following `add_component` call on
    /// the same `Commands` finds a pending source position without going
    /// through the entity pool at all.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.entities.lock().reserve();
        let empty_id = self.archetypes.empty_archetype_id();
        let pos = self
            .archetypes
            .with(empty_id, Archetype::reserve)
            .expect("the empty archetype always exists");
        self.modified.insert(entity.id, (entity, empty_id, pos));
        entity
    }

    /// Marks `entity` for removal. No-op (returns `false`) if `entity` is
    /// already removed this tick, or is neither pending nor currently alive.
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        if self.removed.contains_key(&entity.id) {
            return false;
        }
        if let Some((_, archetype_id, pos)) = self.modified.remove(&entity.id) {
            self.archetypes.with(archetype_id, |a| a.mark_remove(pos));
        } else {
            let pool = self.entities.lock();
            if !pool.is_alive(entity) {
                return false;
            }
            let info = pool.info(entity).expect("checked is_alive above");
            drop(pool);
            self.archetypes
                .with(info.archetype_id, |a| a.mark_remove(row_pos(info)));
        }
        self.removed.insert(entity.id, entity);
        true
    }

    /// Adds a single component, moving `entity` into the archetype that is
    /// its current set plus `T`. No-op (returns `false`) if `entity` has no
    /// resolvable source position (despawned, stale, or never existed).
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> bool {
        let Some((src_id, src_pos)) = self.resolve_source(entity) else {
            return false;
        };
        let comp_id = self.registrar.register_component::<T>();
        if self
            .archetypes
            .with(src_id, |a| a.contains(comp_id))
            .unwrap_or(false)
        {
            // Already has this component: overwrite it in place, no move.
            self.archetypes.with(src_id, |a| {
                let col = a.column_index(comp_id).expect("just checked contains");
                let ptr = a.get_component_ptr(col, src_pos) as *mut T;
                unsafe {
                    std::ptr::drop_in_place(ptr);
                    std::ptr::write(ptr, value);
                }
            });
            return true;
        }
        let dst_id = self.dst_for_add(src_id, MutationKind::AddComponent(comp_id), &[comp_id]);
        self.finish_transfer(entity, src_id, src_pos, dst_id, move |dst, pos| {
            let col = dst
                .column_index(comp_id)
                .expect("destination archetype must contain the added component");
            let ptr = dst.get_component_ptr(col, pos) as *mut T;
            unsafe { std::ptr::write(ptr, value) };
        });
        true
    }

    /// Adds every field of `bundle` atomically. Fields already present on
    /// `entity`'s archetype are left untouched by the destination archetype
    /// (adding a bundle with an already-present field does not change that
    /// field's type-level shape); callers that need overwrite semantics for
    /// a present field should use `add_component` for that field instead.
    pub fn add_components<B: Bundle>(&mut self, entity: Entity, bundle: B) -> bool {
        let Some((src_id, src_pos)) = self.resolve_source(entity) else {
            return false;
        };
        let ids = B::register(self.registrar);
        let fields = crate::component::synthetic_bundle_fields(self.registrar, &ids);
        let _ = self.registrar.register_bundle_fields::<B>(fields);
        let dst_id = self.dst_for_add(src_id, MutationKind::AddBundle(TypeId::of::<B>()), &ids);
        self.finish_transfer(entity, src_id, src_pos, dst_id, move |dst, pos| {
            let ptrs: SmallVec<[*mut u8; MAX_BUNDLE_COMPONENTS]> = ids
                .iter()
                .map(|&id| {
                    let col = dst
                        .column_index(id)
                        .expect("destination archetype must contain every bundle field");
                    dst.get_component_ptr(col, pos)
                })
                .collect();
            unsafe { bundle.write_components(&ptrs) };
        });
        true
    }

    /// Removes a single component type. A no-op success (`true`, no move)
    /// if `entity` doesn't currently carry `T`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> bool {
        let Some((src_id, src_pos)) = self.resolve_source(entity) else {
            return false;
        };
        let Some(comp_id) = self.registrar.get_type_id::<T>() else {
            return true;
        };
        self.remove_ids(entity, src_id, src_pos, MutationKind::RemoveComponent(comp_id), &[comp_id])
    }

    /// Removes every field type named by `B`, whether `B` is a declared
    /// bundle or a plain tuple of component types.
    pub fn remove_components<B: Bundle>(&mut self, entity: Entity) -> bool {
        let Some((src_id, src_pos)) = self.resolve_source(entity) else {
            return false;
        };
        let ids = B::register(self.registrar);
        self.remove_ids(entity, src_id, src_pos, MutationKind::RemoveBundle(TypeId::of::<B>()), &ids)
    }

    /// Alias for `remove_components`, named to match call sites that read
    /// more naturally as "remove this tuple of types" than "remove this
    /// bundle" (the two are the same operation: `B` is any `Bundle`,
    /// including plain tuples).
    pub fn remove_components_tuple<B: Bundle>(&mut self, entity: Entity) -> bool {
        self.remove_components::<B>(entity)
    }

    /// Reads a component of the entity most recently named via
    /// `set_current_entity`, against already-committed state only (pending
    /// structural changes recorded on this same buffer are not visible).
    /// Returns `None` if no current entity is set, it's not alive, or it
    /// doesn't carry `T`.
    pub fn current_component<T: Component>(&self) -> Option<&T> {
        let entity = self.current_entity?;
        let comp_id = self.registrar.get_type_id::<T>()?;
        let info = self.entities.lock().info(entity)?;
        let pos = row_pos(info);
        let ptr = self
            .archetypes
            .with(info.archetype_id, |a| a.column_index(comp_id).map(|col| a.get_component_ptr(col, pos)))??;
        Some(unsafe { &*(ptr as *const T) })
    }

    pub fn set_current_entity(&mut self, entity: Option<Entity>) {
        self.current_entity = entity;
    }

    pub fn current_entity(&self) -> Option<Entity> {
        self.current_entity
    }

    /// The archetype and row an entity would be found at if committed right
    /// now: a pending position recorded on this buffer if one exists,
    /// otherwise its currently-committed position from the entity pool.
    /// `None` if the entity is despawned (on this buffer or in the pool) or
    /// was never alive/reserved.
    fn resolve_source(&self, entity: Entity) -> Option<(ArchetypeId, RowPos)> {
        if self.removed.contains_key(&entity.id) {
            return None;
        }
        if let Some((_, archetype_id, pos)) = self.modified.get(&entity.id) {
            return Some((*archetype_id, *pos));
        }
        let pool = self.entities.lock();
        if !pool.is_alive(entity) {
            return None;
        }
        let info = pool.info(entity)?;
        Some((info.archetype_id, row_pos(info)))
    }

    fn dst_for_add(&mut self, src_id: ArchetypeId, kind: MutationKind, added_ids: &[TypeIndex]) -> ArchetypeId {
        if let Some(plan) = self.transfer_cache.get(&(src_id, kind.clone())) {
            return plan.dst;
        }
        let mut ids: Vec<TypeIndex> = self.archetypes.with(src_id, |a| a.ids().to_vec()).unwrap_or_default();
        for &id in added_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let dst = self.archetypes.get_or_create(self.columns_for(&ids));
        self.transfer_cache.insert((src_id, kind), TransferPlan { dst });
        dst
    }

    fn dst_for_remove(&mut self, src_id: ArchetypeId, kind: MutationKind, removed_ids: &[TypeIndex]) -> ArchetypeId {
        if let Some(plan) = self.transfer_cache.get(&(src_id, kind.clone())) {
            return plan.dst;
        }
        let ids: Vec<TypeIndex> = self
            .archetypes
            .with(src_id, |a| a.ids().iter().copied().filter(|id| !removed_ids.contains(id)).collect())
            .unwrap_or_default();
        let dst = self.archetypes.get_or_create(self.columns_for(&ids));
        self.transfer_cache.insert((src_id, kind), TransferPlan { dst });
        dst
    }

    fn columns_for(&self, ids: &[TypeIndex]) -> Vec<(TypeIndex, u32, u32)> {
        ids.iter()
            .map(|&id| {
                let info = self
                    .registrar
                    .get_type_info(id)
                    .expect("component type must be registered before it appears in an archetype");
                (id, info.size, info.align)
            })
            .collect()
    }

    fn remove_ids(
        &mut self,
        entity: Entity,
        src_id: ArchetypeId,
        src_pos: RowPos,
        kind: MutationKind,
        removed_ids: &[TypeIndex],
    ) -> bool {
        let has_any = self
            .archetypes
            .with(src_id, |a| removed_ids.iter().any(|id| a.contains(*id)))
            .unwrap_or(false);
        if !has_any {
            return true;
        }
        let dst_id = self.dst_for_remove(src_id, kind, removed_ids);
        self.finish_transfer(entity, src_id, src_pos, dst_id, |_dst, _pos| {});
        true
    }

    /// Reserves a row in `dst_id`, lets `write` fill in any newly-added
    /// fields, copies every column `src_id` and `dst_id` have in common,
    /// marks the source row as a hole, and records the entity's new pending
    /// position. Both archetypes are accessed under one lock acquisition.
    fn finish_transfer(
        &mut self,
        entity: Entity,
        src_id: ArchetypeId,
        src_pos: RowPos,
        dst_id: ArchetypeId,
        write: impl FnOnce(&Archetype, RowPos),
    ) {
        let dst_pos = self
            .archetypes
            .with_two(dst_id, src_id, |dst, src| {
                let pos = dst.reserve();
                write(dst, pos);
                src.move_data_to(dst, src_pos, pos);
                src.mark_remove(src_pos);
                pos
            })
            .expect("destination and source archetypes must exist");
        self.modified.insert(entity.id, (entity, dst_id, dst_pos));
    }

    /// Drains every recorded mutation into the entity pool and each
    /// affected archetype's bookkeeping, then runs archetype-level hole
    /// compaction and folds any resulting relocations back into the pool.
    /// Must be called with no other `Commands` touching the same `World`
    /// concurrently; the schedule upholds that at its commit points.
    pub fn commit(&mut self) {
        {
            let mut pool = self.entities.lock();
            for (entity, archetype_id, pos) in self.modified.values().copied() {
                let info = EntityInfo {
                    archetype_id,
                    chunk_index: pos.chunk_index as u32,
                    index_in_chunk: pos.row_index as u32,
                };
                if !pool.commit_reserved(entity, info) {
                    pool.set_info(entity, info);
                }
                self.archetypes.with(archetype_id, |a| a.commit_add_entity(entity, pos));
            }
            self.modified.clear();

            for entity in self.removed.values().copied() {
                if let Some(info) = pool.info(entity) {
                    self.archetypes
                        .with(info.archetype_id, |a| a.commit_remove_entity(entity));
                }
                pool.commit_remove(entity);
            }
            self.removed.clear();
        }

        let relocations = self.archetypes.commit();
        if !relocations.is_empty() {
            let mut pool = self.entities.lock();
            for (archetype_id, entity, pos) in relocations {
                let info = EntityInfo {
                    archetype_id,
                    chunk_index: pos.chunk_index as u32,
                    index_in_chunk: pos.row_index as u32,
                };
                pool.set_info(entity, info);
            }
        }
    }
}

fn row_pos(info: EntityInfo) -> RowPos {
    RowPos {
        chunk_index: info.chunk_index as usize,
        row_index: info.index_in_chunk as usize,
    }
}
