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

//! Entity identifiers, location metadata, and the generational entity pool.

use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque entity handle: a dense slot id plus the generation that slot held
/// when this handle was produced. A handle is valid iff its generation
/// matches the pool's current generation for `id`; there is no other
/// validity check, and handles are never dereferenced as pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub id: u32,
    pub generation: u32,
}

impl Entity {
    /// A handle that can never be produced by `EntityPool` (generation 0 is
    /// reserved for not-yet-committed slots), useful as a sentinel.
    pub const NULL: Entity = Entity {
        id: u32::MAX,
        generation: 0,
    };
}

/// Where a committed entity currently lives: which archetype, which chunk
/// within that archetype's table, and which row within that chunk.
/// Updated only on commit (see `crate::command`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityInfo {
    pub archetype_id: u32,
    pub chunk_index: u32,
    pub index_in_chunk: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Never allocated.
    Free,
    /// Allocated via `reserve`, not yet addressable by iteration.
    Reserved,
    /// Committed: `info` is meaningful.
    Alive,
}

struct Slot {
    generation: u32,
    state: SlotState,
    info: EntityInfo,
}

/// Entity id allocation with generational validity and a two-phase
/// reserve/commit lifecycle.
///
/// `reserve` hands out an id (recycled from the free list if possible)
/// immediately, bumping `next_id` under an atomic so reservation can happen
/// from any thread without a lock; `commit_reserved` is the only thing that
/// makes the entity addressable by iteration, and is expected to run on the
/// single committing thread at a schedule's commit point.
pub struct EntityPool {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    next_id: AtomicU32,
    live_count: usize,
}

impl Default for EntityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            next_id: AtomicU32::new(0),
            live_count: 0,
        }
    }

    /// Allocates an entity id in the `Reserved` state. Safe to call
    /// concurrently with other `reserve` calls; not safe to interleave with
    /// `commit_reserved`/`commit_remove` on another thread (those are
    /// commit-point operations run single-threaded).
    pub fn reserve(&mut self) -> Entity {
        if let Some(id) = self.free_list.pop() {
            let slot = &mut self.slots[id as usize];
            slot.state = SlotState::Reserved;
            return Entity {
                id,
                generation: slot.generation,
            };
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.push(Slot {
            generation: 1,
            state: SlotState::Reserved,
            info: EntityInfo::default(),
        });
        debug_assert_eq!(self.slots.len() as u32 - 1, id);
        Entity { id, generation: 1 }
    }

    /// Makes a reserved entity addressable, recording its archetype
    /// position. No-op (returns `false`) if `e` is not a currently reserved
    /// slot with a matching generation.
    pub fn commit_reserved(&mut self, e: Entity, info: EntityInfo) -> bool {
        let Some(slot) = self.slots.get_mut(e.id as usize) else {
            return false;
        };
        if slot.generation != e.generation || slot.state != SlotState::Reserved {
            return false;
        }
        slot.state = SlotState::Alive;
        slot.info = info;
        self.live_count += 1;
        true
    }

    /// Updates the stored location of an already-alive entity (used when an
    /// archetype transition lands the entity somewhere new).
    pub fn set_info(&mut self, e: Entity, info: EntityInfo) -> bool {
        let Some(slot) = self.slots.get_mut(e.id as usize) else {
            return false;
        };
        if slot.generation != e.generation || slot.state != SlotState::Alive {
            return false;
        }
        slot.info = info;
        true
    }

    /// Bumps the slot's generation and returns it to the free list. Valid
    /// from either `Alive` or `Reserved` (an entity may be despawned before
    /// it is ever committed). No-op (returns `false`) on a stale handle.
    pub fn commit_remove(&mut self, e: Entity) -> bool {
        let Some(slot) = self.slots.get_mut(e.id as usize) else {
            return false;
        };
        if slot.generation != e.generation || slot.state == SlotState::Free {
            return false;
        }
        if slot.state == SlotState::Alive {
            self.live_count -= 1;
        }
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free_list.push(e.id);
        true
    }

    pub fn generation_of(&self, id: u32) -> Option<u32> {
        self.slots.get(id as usize).map(|s| s.generation)
    }

    /// A handle is valid iff its generation matches the pool's current
    /// generation for that id *and* the slot is alive (reserved-but-not-yet-
    /// committed entities are not valid for general lookup, only for the
    /// Commands machinery that created them).
    pub fn is_alive(&self, e: Entity) -> bool {
        self.slots
            .get(e.id as usize)
            .is_some_and(|s| s.generation == e.generation && s.state == SlotState::Alive)
    }

    pub fn is_reserved(&self, e: Entity) -> bool {
        self.slots
            .get(e.id as usize)
            .is_some_and(|s| s.generation == e.generation && s.state == SlotState::Reserved)
    }

    pub fn info(&self, e: Entity) -> Option<EntityInfo> {
        self.slots.get(e.id as usize).and_then(|s| {
            (s.generation == e.generation && s.state == SlotState::Alive).then_some(s.info)
        })
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }
}
