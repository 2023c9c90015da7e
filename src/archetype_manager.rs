//! Interns archetypes by their sorted component-id set and matches them
//! against system filters.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::archetype::{Archetype, ArchetypeId};
use crate::type_registry::TypeIndex;

/// `all`/`any`/`none`/`required` filter consulted by `ArchetypeManager::match_archetypes`.
/// `required` is the set of component types the system's body actually
/// reads or writes per entity (distinct from `all`, which may list ids the
/// body never touches, just gates on their presence).
#[derive(Debug, Clone, Default)]
pub struct ArchetypeFilter {
    pub all: Vec<TypeIndex>,
    pub any: Vec<TypeIndex>,
    pub none: Vec<TypeIndex>,
    pub required: Vec<TypeIndex>,
}

struct Inner {
    archetypes: Vec<Archetype>,
    index_of_ids: FxHashMap<Vec<TypeIndex>, ArchetypeId>,
}

/// Owns every archetype that has ever been created, archetype `0` being the
/// empty archetype created at construction. Archetype creation takes a
/// write lock; `match_archetypes` only ever needs a read lock.
pub struct ArchetypeManager {
    inner: RwLock<Inner>,
    /// Bumped every time a new archetype is interned, so systems can tell
    /// their cached match list is stale without re-scanning every tick.
    generation: std::sync::atomic::AtomicU64,
}

impl Default for ArchetypeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeManager {
    pub fn new() -> Self {
        let empty = Archetype::new(0, Vec::new());
        Self {
            inner: RwLock::new(Inner {
                archetypes: vec![empty],
                index_of_ids: {
                    let mut m = FxHashMap::default();
                    m.insert(Vec::new(), 0);
                    m
                },
            }),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn empty_archetype_id(&self) -> ArchetypeId {
        0
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.read().archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the empty archetype always exists
    }

    /// Interns the archetype whose component set is `ids` (sorted,
    /// deduplicated inside), creating it on first request. `columns` gives
    /// `(type_id, size, align)` for every id in `ids`, looked up by the
    /// caller from the `TypeRegistrar` before calling in.
    pub fn get_or_create(&self, mut columns: Vec<(TypeIndex, u32, u32)>) -> ArchetypeId {
        columns.sort_by_key(|&(id, _, _)| id);
        columns.dedup_by_key(|&mut (id, _, _)| id);
        let ids: Vec<TypeIndex> = columns.iter().map(|&(id, _, _)| id).collect();

        if let Some(&existing) = self.inner.read().index_of_ids.get(&ids) {
            return existing;
        }
        let mut inner = self.inner.write();
        // Another writer may have interned it while we waited for the lock.
        if let Some(&existing) = inner.index_of_ids.get(&ids) {
            return existing;
        }
        let id = inner.archetypes.len() as ArchetypeId;
        #[cfg_attr(not(feature = "profiling"), allow(unused_variables))]
        let component_count = ids.len();
        inner.archetypes.push(Archetype::new(id, columns));
        inner.index_of_ids.insert(ids, id);
        self.generation.fetch_add(1, std::sync::atomic::Ordering::Release);
        #[cfg(feature = "profiling")]
        tracing::debug!(archetype_id = id, component_count, "archetype created");
        id
    }

    /// Looks up the archetype that already exists for exactly `ids` (sorted,
    /// deduplicated), without creating it. Used by transition planning to
    /// test whether `src.ids ∪ {added}` would even change anything.
    pub fn find(&self, ids: &[TypeIndex]) -> Option<ArchetypeId> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.inner.read().index_of_ids.get(&sorted).copied()
    }

    /// Runs `f` with a read-locked reference to archetype `id`. Archetype
    /// ids are append-only and never reused, so holding the id across calls
    /// is safe even though no single long-lived reference is exposed.
    pub fn with<R>(&self, id: ArchetypeId, f: impl FnOnce(&Archetype) -> R) -> Option<R> {
        self.inner.read().archetypes.get(id as usize).map(f)
    }

    /// Runs `f` with read-locked references to both `a` and `b` under one
    /// lock acquisition, so a transition can move data from a source
    /// archetype into a destination archetype without taking the manager's
    /// lock twice (or risking the two ever pointing at different snapshots).
    pub fn with_two<R>(
        &self,
        a: ArchetypeId,
        b: ArchetypeId,
        f: impl FnOnce(&Archetype, &Archetype) -> R,
    ) -> Option<R> {
        let inner = self.inner.read();
        let archetype_a = inner.archetypes.get(a as usize)?;
        let archetype_b = inner.archetypes.get(b as usize)?;
        Some(f(archetype_a, archetype_b))
    }

    /// Archetypes whose id-list (a) contains every id in `filter.required`
    /// and every id in `filter.all`, (b) contains at least one id in
    /// `filter.any` if non-empty, (c) shares no id with `filter.none`. An
    /// empty `required` set short-circuits to no matches — per §4.5/§9, a
    /// component-less system is dispatched once per tick by its adapter
    /// instead of iterating an (empty) archetype match list.
    pub fn match_archetypes(&self, filter: &ArchetypeFilter) -> Vec<ArchetypeId> {
        if filter.required.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        inner
            .archetypes
            .iter()
            .filter(|a| {
                filter.required.iter().all(|id| a.contains(*id))
                    && filter.all.iter().all(|id| a.contains(*id))
                    && (filter.any.is_empty() || filter.any.iter().any(|id| a.contains(*id)))
                    && filter.none.iter().all(|id| !a.contains(*id))
            })
            .map(|a| a.id())
            .collect()
    }

    /// Forwards to every archetype's `commit`, collecting `(archetype_id,
    /// entity, new_pos)` for every hole-compaction relocation so the caller
    /// can fold those into the entity pool's `EntityInfo`.
    pub fn commit(&self) -> Vec<(ArchetypeId, crate::entity::Entity, crate::table::RowPos)> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for archetype in &inner.archetypes {
            for (entity, pos) in archetype.commit() {
                out.push((archetype.id(), entity, pos));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_archetype_always_exists_at_zero() {
        let mgr = ArchetypeManager::new();
        assert_eq!(mgr.empty_archetype_id(), 0);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn get_or_create_is_idempotent_regardless_of_input_order() {
        let mgr = ArchetypeManager::new();
        let a = mgr.get_or_create(vec![(1, 4, 4), (0, 8, 8)]);
        let b = mgr.get_or_create(vec![(0, 8, 8), (1, 4, 4)]);
        assert_eq!(a, b);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn distinct_id_sets_create_distinct_archetypes() {
        let mgr = ArchetypeManager::new();
        let a = mgr.get_or_create(vec![(0, 4, 4)]);
        let b = mgr.get_or_create(vec![(0, 4, 4), (1, 4, 4)]);
        assert_ne!(a, b);
    }

    #[test]
    fn match_with_empty_required_returns_nothing() {
        let mgr = ArchetypeManager::new();
        mgr.get_or_create(vec![(0, 4, 4)]);
        let matches = mgr.match_archetypes(&ArchetypeFilter::default());
        assert!(matches.is_empty());
    }

    #[test]
    fn match_respects_all_any_none() {
        let mgr = ArchetypeManager::new();
        let a = mgr.get_or_create(vec![(0, 4, 4), (1, 4, 4)]);
        let b = mgr.get_or_create(vec![(0, 4, 4), (2, 4, 4)]);
        let filter = ArchetypeFilter {
            all: vec![0],
            any: vec![],
            none: vec![2],
            required: vec![0],
        };
        let matches = mgr.match_archetypes(&filter);
        assert!(matches.contains(&a));
        assert!(!matches.contains(&b));
    }
}
