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

//! Archetype storage: a `Table` plus the entity bookkeeping and
//! move-planning caches layered on top of it.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::entity::Entity;
use crate::sparse::{NativeList, SparseMap};
use crate::table::{RowPos, Table};
use crate::type_registry::TypeIndex;

/// Dense index of an `Archetype` within its owning `ArchetypeManager`.
/// Archetype `0` is always the empty archetype.
pub type ArchetypeId = u32;

/// Per-chunk, per-row reverse lookup plus the forward `entity_id ->
/// position` map and the pending hole stack. Always mutated together, so
/// they share one lock rather than risking three locks going out of sync.
///
/// `position_of` is the sparse map §9 describes: a dense array indexed by
/// entity id, plus a packed dense list for iteration.
#[derive(Default)]
struct Bookkeeping {
    position_of: SparseMap<RowPos>,
    entity_at: Vec<Vec<Option<Entity>>>,
    holes: NativeList<RowPos>,
}

/// One archetype: a table of columns shared by every entity with exactly
/// this archetype's component set, plus the bookkeeping §4.4 describes.
pub struct Archetype {
    id: ArchetypeId,
    type_ids: Vec<TypeIndex>,
    column_of: FxHashMap<TypeIndex, usize>,
    table: Table,
    book: Mutex<Bookkeeping>,
    move_cache: RwLock<FxHashMap<ArchetypeId, Vec<(usize, usize)>>>,
    dirty: AtomicBool,
}

impl Archetype {
    /// `columns` is `(type_id, size, align)` for every component in this
    /// archetype. `Table::new` sorts them internally; `type_ids`/
    /// `column_of` here are derived from the same sorted order so `ids()`
    /// reports the identity the manager interned it under.
    pub fn new(id: ArchetypeId, mut columns: Vec<(TypeIndex, u32, u32)>) -> Self {
        columns.sort_by_key(|&(type_id, _, _)| type_id);
        let type_ids: Vec<TypeIndex> = columns.iter().map(|&(t, _, _)| t).collect();
        let table = Table::new(columns);
        let column_of = table
            .layout()
            .columns
            .iter()
            .enumerate()
            .map(|(idx, meta)| (meta.type_id, idx))
            .collect();
        Self {
            id,
            type_ids,
            column_of,
            table,
            book: Mutex::new(Bookkeeping::default()),
            move_cache: RwLock::new(FxHashMap::default()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn ids(&self) -> &[TypeIndex] {
        &self.type_ids
    }

    pub fn contains(&self, type_id: TypeIndex) -> bool {
        self.column_of.contains_key(&type_id)
    }

    pub fn column_index(&self, type_id: TypeIndex) -> Option<usize> {
        self.column_of.get(&type_id).copied()
    }

    pub fn chunk_capacity(&self) -> usize {
        self.table.chunk_capacity()
    }

    pub fn chunk_count(&self) -> usize {
        self.table.chunk_count()
    }

    pub fn len(&self) -> usize {
        self.book.lock().position_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves a row for a new entity. Safe to call concurrently from many
    /// worker `Commands` buffers; only touches the `Table`'s lock-free(ish)
    /// reservation path and the `dirty` flag.
    pub fn reserve(&self) -> RowPos {
        let pos = self.table.reserve();
        self.dirty.store(true, Ordering::Release);
        pos
    }

    /// Raw copy of `bytes` into column `col` at `pos`. `bytes.len()` must
    /// equal that column's registered size.
    pub fn put_component_data(&self, col: usize, pos: RowPos, bytes: &[u8]) {
        self.table.put(col, pos, bytes);
    }

    pub fn get_component_ptr(&self, col: usize, pos: RowPos) -> *mut u8 {
        self.table.get(col, pos)
    }

    /// Copies every column `self` and `dst` have in common from `src_pos`
    /// to `dst_pos`, using a cache of `(src_col, dst_col)` pairs keyed by
    /// the destination archetype's id so repeated transitions along the
    /// same edge don't re-derive the intersection by type id every time.
    pub fn move_data_to(&self, dst: &Archetype, src_pos: RowPos, dst_pos: RowPos) {
        for (src_col, dst_col) in self.common_columns_with(dst) {
            self.table
                .copy_column_row(src_col, src_pos, &dst.table, dst_col, dst_pos);
        }
    }

    fn common_columns_with(&self, dst: &Archetype) -> Vec<(usize, usize)> {
        if let Some(cached) = self.move_cache.read().get(&dst.id) {
            return cached.clone();
        }
        let mut pairs: Vec<(usize, usize)> = self
            .column_of
            .iter()
            .filter_map(|(&type_id, &src_col)| dst.column_of.get(&type_id).map(|&dst_col| (src_col, dst_col)))
            .collect();
        pairs.sort_unstable();
        self.move_cache.write().insert(dst.id, pairs.clone());
        pairs
    }

    /// Pushes a hole at `pos`, to be compacted away on the next `commit`.
    /// Not visible to iteration until then.
    pub fn mark_remove(&self, pos: RowPos) {
        self.book.lock().holes.push(pos);
        self.dirty.store(true, Ordering::Release);
    }

    /// Records that `entity` now resides at `pos` (a fresh reservation or a
    /// cross-archetype transition landing here). Called only at a schedule
    /// commit point.
    pub fn commit_add_entity(&self, entity: Entity, pos: RowPos) {
        let mut book = self.book.lock();
        book.position_of.insert(entity.id, pos);
        ensure_row_slot(&mut book.entity_at, pos, self.table.chunk_capacity());
        book.entity_at[pos.chunk_index][pos.row_index] = Some(entity);
    }

    /// Forgets `entity`'s position (it either despawned or moved to another
    /// archetype). The row itself becomes a hole only once `mark_remove` was
    /// also called for the transition/removal that triggered this.
    pub fn commit_remove_entity(&self, entity: Entity) {
        let mut book = self.book.lock();
        if let Some(pos) = book.position_of.remove(entity.id) {
            if let Some(slot) = book
                .entity_at
                .get_mut(pos.chunk_index)
                .and_then(|c| c.get_mut(pos.row_index))
            {
                *slot = None;
            }
        }
    }

    pub fn position_of(&self, entity_id: u32) -> Option<RowPos> {
        self.book.lock().position_of.get(entity_id).copied()
    }

    /// Drains pending holes by swapping the tail row of each hole's chunk
    /// into the hole, then folds every chunk's reservations into `size`.
    /// Returns `(entity, new_pos)` for every entity relocated by a swap, so
    /// the caller (the owning `Commands`/`World` commit path) can update
    /// the entity pool's `EntityInfo` to match.
    pub fn commit(&self) -> Vec<(Entity, RowPos)> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        let mut relocations = Vec::new();
        let mut book = self.book.lock();
        while let Some(hole) = book.holes.pop() {
            if let Some(moved_row) = self.table.fill_hole_from_tail(hole.chunk_index, hole.row_index) {
                let moved_entity = book
                    .entity_at
                    .get_mut(hole.chunk_index)
                    .and_then(|c| c.get_mut(moved_row).and_then(Option::take));
                if let Some(entity) = moved_entity {
                    ensure_row_slot(&mut book.entity_at, hole, self.table.chunk_capacity());
                    book.entity_at[hole.chunk_index][hole.row_index] = Some(entity);
                    book.position_of.insert(entity.id, hole);
                    relocations.push((entity, hole));
                }
            }
        }
        self.table.commit_reserved();
        relocations
    }

    /// One `(ptr, len)` pair per chunk for column `type_id`, `len` being the
    /// number of *committed* rows in that chunk.
    pub fn iterate_data_among_chunk(&self, type_id: TypeIndex) -> Vec<(*mut u8, usize)> {
        let Some(col) = self.column_index(type_id) else {
            return Vec::new();
        };
        (0..self.table.chunk_count())
            .map(|c| (self.table.chunk_column_ptr(col, c), self.table.chunk_len(c)))
            .collect()
    }

    pub fn get_chunk_data(&self, type_id: TypeIndex, chunk_index: usize) -> Option<(*mut u8, usize)> {
        let col = self.column_index(type_id)?;
        Some((
            self.table.chunk_column_ptr(col, chunk_index),
            self.table.chunk_len(chunk_index),
        ))
    }

    /// Entities in archetype-discovery order: chunk order, then row order
    /// within a chunk — the ordering §5 promises within one iteration.
    pub fn entities(&self) -> Vec<(RowPos, Entity)> {
        let book = self.book.lock();
        let mut out = Vec::with_capacity(self.len());
        for (chunk_index, rows) in book.entity_at.iter().enumerate() {
            for (row_index, slot) in rows.iter().enumerate() {
                if let Some(entity) = slot {
                    out.push((
                        RowPos {
                            chunk_index,
                            row_index,
                        },
                        *entity,
                    ));
                }
            }
        }
        out
    }
}

fn ensure_row_slot(entity_at: &mut Vec<Vec<Option<Entity>>>, pos: RowPos, chunk_capacity: usize) {
    while entity_at.len() <= pos.chunk_index {
        entity_at.push(vec![None; chunk_capacity]);
    }
    let rows = &mut entity_at[pos.chunk_index];
    if rows.len() <= pos.row_index {
        rows.resize(pos.row_index + 1, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos_vel_archetype(id: ArchetypeId) -> Archetype {
        Archetype::new(id, vec![(0, 8, 4), (1, 8, 4)])
    }

    #[test]
    fn reserve_then_commit_add_is_visible_in_entities() {
        let a = pos_vel_archetype(0);
        let pos = a.reserve();
        a.table.commit_reserved();
        let entity = Entity { id: 7, generation: 1 };
        a.commit_add_entity(entity, pos);
        assert_eq!(a.entities(), vec![(pos, entity)]);
    }

    #[test]
    fn move_data_to_copies_only_common_columns() {
        let src = Archetype::new(0, vec![(0, 4, 4), (1, 4, 4)]);
        let dst = Archetype::new(1, vec![(0, 4, 4), (2, 4, 4)]);
        let src_pos = src.reserve();
        src.table.commit_reserved();
        src.put_component_data(src.column_index(0).unwrap(), src_pos, &42i32.to_ne_bytes());

        let dst_pos = dst.reserve();
        dst.table.commit_reserved();
        src.move_data_to(&dst, src_pos, dst_pos);

        let ptr = dst.get_component_ptr(dst.column_index(0).unwrap(), dst_pos) as *const i32;
        assert_eq!(unsafe { *ptr }, 42);
    }

    #[test]
    fn hole_compaction_shrinks_size_and_relocates_tail() {
        let a = pos_vel_archetype(0);
        let mut entities = Vec::new();
        for i in 0..5u32 {
            let pos = a.reserve();
            a.table.commit_reserved();
            let e = Entity {
                id: i,
                generation: 1,
            };
            a.commit_add_entity(e, pos);
            entities.push((e, pos));
        }
        // Remove entity 1 (not the tail) -- its hole should be filled from
        // the true tail (entity 4).
        let (_, removed_pos) = entities[1];
        a.commit_remove_entity(entities[1].0);
        a.mark_remove(removed_pos);
        let relocations = a.commit();

        assert_eq!(a.len(), 4);
        assert_eq!(relocations.len(), 1);
        assert_eq!(relocations[0].0, entities[4].0);
        assert_eq!(relocations[0].1, removed_pos);
    }
}
