//! An ordered sequence of named schedules, run one after another each tick.
//!
//! Unlike systems within a single `Schedule`, schedules in a `ScheduleSet`
//! never run concurrently with one another — each runs to completion
//! (including its own commit points) before the next starts. Ordering
//! between schedules is declared the same way ordering between systems is:
//! by name, resolved against whatever is already registered.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::error::{EcsError, Result};
use crate::schedule::Schedule;
use crate::system::SystemContext;
use crate::thread_pool::ThreadPool;

struct Entry {
    name: String,
    schedule: Schedule,
}

/// An ordered collection of schedules addressed by name.
pub struct ScheduleSet {
    entries: Vec<Entry>,
    names: FxHashMap<String, usize>,
    after: Vec<(usize, usize)>,
    order: Vec<usize>,
    dirty: bool,
    /// Names queued for removal by `remove_schedule`, applied at the start
    /// of the next `run` rather than immediately, so a schedule mid-run
    /// never has entries vanish out from under it.
    pending_removals: Vec<String>,
}

impl Default for ScheduleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            names: FxHashMap::default(),
            after: Vec::new(),
            order: Vec::new(),
            dirty: true,
            pending_removals: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_schedule(&mut self, name: impl Into<String>, schedule: Schedule) {
        let name = name.into();
        let index = self.entries.len();
        self.names.insert(name.clone(), index);
        self.entries.push(Entry { name, schedule });
        self.dirty = true;
    }

    /// Registers `schedule` under `name`, constrained to run after whatever
    /// schedule is currently registered under `after_name`. Silently does
    /// nothing to the ordering if `after_name` isn't registered yet.
    pub fn add_schedule_after(&mut self, name: impl Into<String>, schedule: Schedule, after_name: &str) {
        let name = name.into();
        let index = self.entries.len();
        self.names.insert(name.clone(), index);
        self.entries.push(Entry { name, schedule });
        if let Some(&after_index) = self.names.get(after_name) {
            self.after.push((index, after_index));
        }
        self.dirty = true;
    }

    pub fn schedule_mut(&mut self, name: &str) -> Option<&mut Schedule> {
        let &index = self.names.get(name)?;
        Some(&mut self.entries[index].schedule)
    }

    /// Queues `name` for removal. The schedule keeps running (including any
    /// run already in progress) until the next call to `run`, at which
    /// point it is dropped before that run's schedules execute.
    pub fn remove_schedule(&mut self, name: &str) {
        self.pending_removals.push(name.to_string());
    }

    fn apply_pending_removals(&mut self) {
        if self.pending_removals.is_empty() {
            return;
        }
        for name in self.pending_removals.drain(..) {
            if let Some(index) = self.names.remove(&name) {
                self.entries.remove(index);
                // Every index past the removed one shifts down by one.
                for v in self.names.values_mut() {
                    if *v > index {
                        *v -= 1;
                    }
                }
                self.after.retain_mut(|(a, b)| {
                    if *a == index || *b == index {
                        return false;
                    }
                    if *a > index {
                        *a -= 1;
                    }
                    if *b > index {
                        *b -= 1;
                    }
                    true
                });
            }
        }
        self.dirty = true;
    }

    fn rebuild_order(&mut self) -> Result<()> {
        let n = self.entries.len();
        let mut forward: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for &(after, before) in &self.after {
            forward[before].push(after);
            in_degree[after] += 1;
        }

        let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &next in &forward[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }
        if order.len() != n {
            return Err(EcsError::ScheduleConstruction(
                "cyclic ordering between schedules".to_string(),
            ));
        }
        self.order = order;
        self.dirty = false;
        Ok(())
    }

    /// Runs every schedule once, in order, applying any pending removals
    /// first.
    pub fn run(&mut self, ctx: &SystemContext, pool: &ThreadPool) -> Result<()> {
        self.run_until(ctx, pool, None)
    }

    /// Runs schedules in order, stopping after the one named `stop_at` has
    /// run (inclusive). `stop_at == None` runs every schedule, matching
    /// `run`. A name that isn't registered runs the whole set, same as not
    /// passing one.
    pub fn run_until(
        &mut self,
        ctx: &SystemContext,
        pool: &ThreadPool,
        stop_at: Option<&str>,
    ) -> Result<()> {
        self.apply_pending_removals();
        if self.dirty {
            self.rebuild_order()?;
        }
        let stop_index = stop_at.and_then(|name| self.names.get(name).copied());
        for &index in &self.order.clone() {
            self.entries[index].schedule.run(ctx, pool)?;
            if stop_index == Some(index) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype_manager::ArchetypeManager;
    use crate::entity::EntityPool;
    use crate::resource::ResourcePool;
    use crate::type_registry::TypeRegistrar;
    use parking_lot::Mutex as PLMutex;

    fn test_ctx() -> (TypeRegistrar, ArchetypeManager, PLMutex<EntityPool>, ResourcePool) {
        (
            TypeRegistrar::new(),
            ArchetypeManager::new(),
            PLMutex::new(EntityPool::new()),
            ResourcePool::new(),
        )
    }

    #[test]
    fn run_executes_every_schedule() {
        let mut set = ScheduleSet::new();
        set.add_schedule("update", Schedule::new());
        set.add_schedule_after("late_update", Schedule::new(), "update");

        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };
        let pool = ThreadPool::new(1);
        set.run(&ctx, &pool).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn run_until_stops_after_named_schedule() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        use crate::system::{BoxedSystem, SystemAccess};
        use crate::system::TickSystem;

        let ran: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let make_system = |flag: Arc<AtomicUsize>, bit: usize| -> BoxedSystem {
            Box::new(TickSystem::new(
                "mark",
                SystemAccess::default(),
                move |_ctx, _cmds| {
                    flag.fetch_or(bit, Ordering::SeqCst);
                },
            ))
        };

        let mut set = ScheduleSet::new();
        let mut first = Schedule::new();
        first.add_system(make_system(ran.clone(), 0b01));
        set.add_schedule("first", first);
        let mut second = Schedule::new();
        second.add_system(make_system(ran.clone(), 0b10));
        set.add_schedule_after("second", second, "first");

        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };
        let pool = ThreadPool::new(1);
        set.run_until(&ctx, &pool, Some("first")).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0b01);
    }

    #[test]
    fn removal_is_deferred_until_next_run() {
        let mut set = ScheduleSet::new();
        set.add_schedule("update", Schedule::new());
        set.remove_schedule("update");
        assert_eq!(set.len(), 1);

        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };
        let pool = ThreadPool::new(1);
        set.run(&ctx, &pool).unwrap();
        assert_eq!(set.len(), 0);
    }
}
