//! Builds an ordered sequence of conflict-free execution groups from a set
//! of registered systems, and drives one pass over them.
//!
//! A schedule moves between two states. *Unfrozen*: systems were just added
//! or removed and the group layout is stale. *Frozen*: `initialize` has run
//! on every system and `groups` reflects the current conflict graph. Adding
//! a system always drops back to Unfrozen; running a frozen schedule stays
//! frozen unless the archetype set has grown, in which case every system's
//! `configure` is re-run (component storage may have moved) without
//! rebuilding the group layout itself, since new archetypes don't change
//! which systems conflict with which.

use rustc_hash::FxHashMap;

use crate::command::Commands;
use crate::error::{EcsError, Result};
use crate::system::{BoxedSystem, System, SystemAccess, SystemContext};
use crate::thread_pool::ThreadPool;

pub type SystemId = u32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FreezeState {
    Unfrozen,
    Frozen,
}

/// When a group's deferred commands are applied to the world.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Commit every group's commands before the next group starts. Safe
    /// default: a later group can observe structural changes made by an
    /// earlier one.
    Synchronisation,
    /// Defer every commit until the whole schedule has run once. Cheaper,
    /// but every system in the schedule sees the world as it stood at the
    /// start of the tick.
    ScheduleEnd,
}

struct OrderingConstraint {
    before: SystemId,
    after: SystemId,
}

enum PendingRelation {
    Before,
    After,
}

/// A `before`/`after` constraint whose target name wasn't registered yet at
/// the time it was declared. Resolved against `names` at freeze time; one
/// still unresolved there is a construction error.
struct PendingConstraint {
    id: SystemId,
    target_name: String,
    relation: PendingRelation,
}

/// An ordered set of systems with no two systems in the same entry
/// conflicting over a component or resource; entries run one after another,
/// systems within an entry run concurrently.
pub struct Schedule {
    systems: Vec<BoxedSystem>,
    names: FxHashMap<String, SystemId>,
    constraints: Vec<OrderingConstraint>,
    pending: Vec<PendingConstraint>,
    groups: Vec<Vec<SystemId>>,
    state: FreezeState,
    commit_policy: CommitPolicy,
    last_archetype_generation: u64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            names: FxHashMap::default(),
            constraints: Vec::new(),
            pending: Vec::new(),
            groups: Vec::new(),
            state: FreezeState::Unfrozen,
            commit_policy: CommitPolicy::Synchronisation,
            last_archetype_generation: 0,
        }
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn is_frozen(&self) -> bool {
        self.state == FreezeState::Frozen
    }

    pub fn groups(&self) -> &[Vec<SystemId>] {
        &self.groups
    }

    pub fn add_system(&mut self, system: BoxedSystem) -> SystemId {
        let id = self.systems.len() as SystemId;
        self.names.insert(system.name().to_string(), id);
        self.systems.push(system);
        self.invalidate();
        id
    }

    /// Adds a tuple (optionally nested) of systems in one call. Top-level
    /// tuple positions run strictly one after another; a position that is
    /// itself a nested tuple is a sibling group whose members carry no
    /// ordering constraint between each other (they still only actually run
    /// concurrently if `pack_groups` finds them conflict-free). A lone
    /// system, not wrapped in a tuple, is accepted as a one-position chain.
    pub fn add_systems<G: SystemChain>(&mut self, group: G) -> Vec<SystemId> {
        group.add_to(self, &[])
    }

    /// Drops every registered system, name, and ordering constraint,
    /// rebuilding the schedule's graph with only the synthetic root.
    /// `commit_policy` is preserved.
    pub fn clear_systems(&mut self) {
        self.systems.clear();
        self.names.clear();
        self.constraints.clear();
        self.pending.clear();
        self.groups.clear();
        self.state = FreezeState::Unfrozen;
        self.last_archetype_generation = 0;
    }

    fn constrain_after_ids(&mut self, id: SystemId, predecessors: &[SystemId]) {
        for &p in predecessors {
            self.constraints.push(OrderingConstraint { before: p, after: id });
        }
    }

    /// Constrains `system` to run strictly before whatever system is later
    /// registered under `before_name`, or whatever already is. Unknown names
    /// are resolved lazily at freeze time; a name that never resolves is a
    /// construction error.
    pub fn add_system_before(&mut self, system: BoxedSystem, before_name: &str) -> SystemId {
        let id = self.add_system(system);
        if let Some(&other) = self.names.get(before_name) {
            self.constraints.push(OrderingConstraint {
                before: id,
                after: other,
            });
        } else {
            self.pending.push(PendingConstraint {
                id,
                target_name: before_name.to_string(),
                relation: PendingRelation::Before,
            });
        }
        id
    }

    pub fn add_system_after(&mut self, system: BoxedSystem, after_name: &str) -> SystemId {
        let id = self.add_system(system);
        if let Some(&other) = self.names.get(after_name) {
            self.constraints.push(OrderingConstraint {
                before: other,
                after: id,
            });
        } else {
            self.pending.push(PendingConstraint {
                id,
                target_name: after_name.to_string(),
                relation: PendingRelation::After,
            });
        }
        id
    }

    /// Resolves every pending `before`/`after` target against the current
    /// name table. A target still missing here is a construction error.
    fn resolve_pending(&mut self) -> Result<()> {
        for pending in self.pending.drain(..) {
            let Some(&other) = self.names.get(&pending.target_name) else {
                return Err(EcsError::ScheduleConstruction(format!(
                    "add_system_{}: target system '{}' was never registered",
                    match pending.relation {
                        PendingRelation::Before => "before",
                        PendingRelation::After => "after",
                    },
                    pending.target_name
                )));
            };
            let constraint = match pending.relation {
                PendingRelation::Before => OrderingConstraint {
                    before: pending.id,
                    after: other,
                },
                PendingRelation::After => OrderingConstraint {
                    before: other,
                    after: pending.id,
                },
            };
            self.constraints.push(constraint);
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.state = FreezeState::Unfrozen;
        self.groups.clear();
    }

    /// Runs `initialize` on every system and rebuilds the group layout if
    /// the schedule is Unfrozen; a no-op otherwise.
    pub fn ensure_frozen(&mut self, ctx: &SystemContext) -> Result<()> {
        if self.state == FreezeState::Frozen {
            return Ok(());
        }
        for system in &mut self.systems {
            system.initialize(ctx)?;
        }
        self.resolve_pending()?;
        self.rebuild()?;
        self.last_archetype_generation = ctx.archetypes.generation();
        self.state = FreezeState::Frozen;
        #[cfg(feature = "profiling")]
        tracing::debug!(
            system_count = self.systems.len(),
            group_count = self.groups.len(),
            "schedule frozen"
        );
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        let accesses: Vec<SystemAccess> = self.systems.iter().map(|s| s.access()).collect();

        let n = self.systems.len();
        let mut forward: Vec<Vec<SystemId>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];
        for c in &self.constraints {
            forward[c.before as usize].push(c.after);
            in_degree[c.after as usize] += 1;
        }

        let order = topological_order(&forward, &in_degree, &accesses)?;
        self.groups = pack_groups(&order, &accesses);
        Ok(())
    }

    /// Re-runs `configure` on every system if new archetypes have appeared
    /// since the last freeze, so cached archetype-match lists stay current.
    fn refresh_if_stale(&mut self, ctx: &SystemContext) {
        let current = ctx.archetypes.generation();
        if current != self.last_archetype_generation {
            for system in &mut self.systems {
                system.configure(ctx);
            }
            self.last_archetype_generation = current;
        }
    }

    /// Runs every group once, draining each system's produced `Commands`
    /// according to the configured `CommitPolicy`.
    pub fn run(&mut self, ctx: &SystemContext, pool: &ThreadPool) -> Result<()> {
        self.ensure_frozen(ctx)?;
        self.refresh_if_stale(ctx);

        let groups = self.groups.clone();
        let mut deferred: Vec<Commands> = Vec::new();

        for group in &groups {
            let mut group_sorted = group.clone();
            group_sorted.sort_unstable();
            #[cfg(feature = "profiling")]
            tracing::trace!(group_size = group_sorted.len(), "dispatching execution group");

            // Indices within one group are pairwise distinct by construction
            // (`pack_groups` never places the same id twice), so casting the
            // backing slice to a raw pointer and handing each task its own
            // offset is sound: no two tasks ever touch the same element.
            let systems_ptr = self.systems.as_mut_ptr() as usize;
            let produced: parking_lot::Mutex<Vec<Commands>> = parking_lot::Mutex::new(Vec::new());

            let tasks: Vec<Box<dyn FnOnce() + Send + '_>> = group_sorted
                .iter()
                .map(|&id| {
                    let ctx = *ctx;
                    let produced = &produced;
                    let task: Box<dyn FnOnce() + Send> = Box::new(move || {
                        let system: &mut BoxedSystem =
                            unsafe { &mut *(systems_ptr as *mut BoxedSystem).add(id as usize) };
                        let mut cmds = system.execute(&ctx);
                        produced.lock().append(&mut cmds);
                    });
                    task
                })
                .collect();

            pool.dispatch_all(tasks);

            let mut batch = produced.into_inner();
            match self.commit_policy {
                CommitPolicy::Synchronisation => {
                    for cmds in batch.iter_mut() {
                        cmds.commit();
                    }
                }
                CommitPolicy::ScheduleEnd => deferred.append(&mut batch),
            }
        }

        for cmds in deferred.iter_mut() {
            cmds.commit();
        }
        Ok(())
    }
}

/// Kahn's algorithm over the explicit `before`/`after` edges, breaking ties
/// among simultaneously-ready systems by preferring whichever one does not
/// conflict with the system most recently placed — its "last conflict-free
/// ancestor" in the build order. This keeps runs of mutually compatible
/// systems adjacent, which lets the greedy packer in `pack_groups` bin them
/// into fewer groups.
fn topological_order(
    forward: &[Vec<SystemId>],
    in_degree: &[usize],
    accesses: &[SystemAccess],
) -> Result<Vec<SystemId>> {
    let n = accesses.len();
    let mut remaining = in_degree.to_vec();
    let mut ready: Vec<SystemId> = (0..n as SystemId).filter(|&i| remaining[i as usize] == 0).collect();
    ready.sort_unstable();

    let mut result = Vec::with_capacity(n);
    while !ready.is_empty() {
        let chosen_idx = match result.last() {
            Some(&last) => {
                let last_access = &accesses[last as usize];
                ready
                    .iter()
                    .position(|&id| !accesses[id as usize].conflicts_with(last_access))
                    .unwrap_or(0)
            }
            None => 0,
        };
        let chosen = ready.remove(chosen_idx);
        result.push(chosen);

        for &next in &forward[chosen as usize] {
            remaining[next as usize] -= 1;
            if remaining[next as usize] == 0 {
                let pos = ready.binary_search(&next).unwrap_or_else(|e| e);
                ready.insert(pos, next);
            }
        }
    }

    if result.len() != n {
        return Err(EcsError::SystemCycleDetected);
    }
    Ok(result)
}

/// Greedily appends each system (in the given order) to the currently-open
/// group if it conflicts with nothing already in it, otherwise closes that
/// group and opens a new one.
fn pack_groups(order: &[SystemId], accesses: &[SystemAccess]) -> Vec<Vec<SystemId>> {
    let mut groups: Vec<Vec<SystemId>> = Vec::new();
    let mut current: Vec<SystemId> = Vec::new();

    for &id in order {
        let access = &accesses[id as usize];
        let fits = current
            .iter()
            .all(|&member| !accesses[member as usize].conflicts_with(access));
        if fits {
            current.push(id);
        } else {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            current.push(id);
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// One position within an `add_systems` call: a single system, or a nested
/// tuple of positions that all share the same predecessors and carry no
/// ordering constraint between each other.
pub trait SystemGroup {
    fn add_to(self, schedule: &mut Schedule, after: &[SystemId]) -> Vec<SystemId>;
}

impl SystemGroup for BoxedSystem {
    fn add_to(self, schedule: &mut Schedule, after: &[SystemId]) -> Vec<SystemId> {
        let id = schedule.add_system(self);
        schedule.constrain_after_ids(id, after);
        vec![id]
    }
}

/// The argument type `Schedule::add_systems` accepts: a single system, or a
/// tuple of `SystemGroup` positions run one after another.
pub trait SystemChain {
    fn add_to(self, schedule: &mut Schedule, after: &[SystemId]) -> Vec<SystemId>;
}

impl SystemChain for BoxedSystem {
    fn add_to(self, schedule: &mut Schedule, after: &[SystemId]) -> Vec<SystemId> {
        SystemGroup::add_to(self, schedule, after)
    }
}

macro_rules! impl_system_tuples {
    ($($T:ident),+) => {
        impl<$($T: SystemGroup),+> SystemGroup for ($($T,)+) {
            #[allow(non_snake_case)]
            fn add_to(self, schedule: &mut Schedule, after: &[SystemId]) -> Vec<SystemId> {
                let ($($T,)+) = self;
                let mut produced = Vec::new();
                $(produced.extend(SystemGroup::add_to($T, schedule, after));)+
                produced
            }
        }

        impl<$($T: SystemGroup),+> SystemChain for ($($T,)+) {
            #[allow(non_snake_case)]
            fn add_to(self, schedule: &mut Schedule, after: &[SystemId]) -> Vec<SystemId> {
                let ($($T,)+) = self;
                let mut current_after: Vec<SystemId> = after.to_vec();
                let mut produced: Vec<SystemId> = Vec::new();
                $(
                    produced = SystemGroup::add_to($T, schedule, &current_after);
                    current_after = produced.clone();
                )+
                produced
            }
        }
    };
}

impl_system_tuples!(A);
impl_system_tuples!(A, B);
impl_system_tuples!(A, B, C);
impl_system_tuples!(A, B, C, D);
impl_system_tuples!(A, B, C, D, E);
impl_system_tuples!(A, B, C, D, E, F);
impl_system_tuples!(A, B, C, D, E, F, G);
impl_system_tuples!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype_manager::ArchetypeManager;
    use crate::entity::EntityPool;
    use crate::resource::ResourcePool;
    use crate::type_registry::TypeRegistrar;
    use parking_lot::Mutex as PLMutex;

    struct MockSystem {
        name: String,
        access: SystemAccess,
    }

    impl System for MockSystem {
        fn name(&self) -> &str {
            &self.name
        }

        fn access(&self) -> SystemAccess {
            self.access.clone()
        }

        fn initialize(&mut self, _ctx: &SystemContext) -> Result<()> {
            Ok(())
        }
        fn configure(&mut self, _ctx: &SystemContext) {}

        fn execute<'w>(&mut self, _ctx: &SystemContext<'w>) -> Vec<Commands<'w>> {
            Vec::new()
        }
    }

    fn mock(name: &str, access: SystemAccess) -> BoxedSystem {
        Box::new(MockSystem {
            name: name.to_string(),
            access,
        })
    }

    fn test_ctx() -> (TypeRegistrar, ArchetypeManager, PLMutex<EntityPool>, ResourcePool) {
        (
            TypeRegistrar::new(),
            ArchetypeManager::new(),
            PLMutex::new(EntityPool::new()),
            ResourcePool::new(),
        )
    }

    #[test]
    fn test_lazy_rebuild() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        assert!(!schedule.is_frozen());
        schedule.add_system(mock("a", SystemAccess::default()));
        assert!(!schedule.is_frozen());

        schedule.ensure_frozen(&ctx).unwrap();
        assert!(schedule.is_frozen());

        schedule.add_system(mock("b", SystemAccess::default()));
        assert!(!schedule.is_frozen());
    }

    #[test]
    fn non_conflicting_systems_share_a_group() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        schedule.add_system(mock(
            "readers_a",
            SystemAccess {
                component_reads: vec![0],
                ..Default::default()
            },
        ));
        schedule.add_system(mock(
            "readers_b",
            SystemAccess {
                component_reads: vec![0],
                ..Default::default()
            },
        ));
        schedule.ensure_frozen(&ctx).unwrap();
        assert_eq!(schedule.groups().len(), 1);
        assert_eq!(schedule.groups()[0].len(), 2);
    }

    #[test]
    fn conflicting_systems_land_in_separate_groups() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        schedule.add_system(mock(
            "writer",
            SystemAccess {
                component_writes: vec![0],
                ..Default::default()
            },
        ));
        schedule.add_system(mock(
            "reader",
            SystemAccess {
                component_reads: vec![0],
                ..Default::default()
            },
        ));
        schedule.ensure_frozen(&ctx).unwrap();
        assert_eq!(schedule.groups().len(), 2);
    }

    #[test]
    fn explicit_ordering_constraint_is_respected() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        schedule.add_system(mock(
            "writer",
            SystemAccess {
                component_writes: vec![0],
                ..Default::default()
            },
        ));
        schedule.add_system_after(
            mock(
                "second_writer",
                SystemAccess {
                    component_writes: vec![0],
                    ..Default::default()
                },
            ),
            "writer",
        );
        schedule.ensure_frozen(&ctx).unwrap();
        let groups = schedule.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![0]);
        assert_eq!(groups[1], vec![1]);
    }

    #[test]
    fn add_after_unresolved_target_is_a_construction_error() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        schedule.add_system_after(mock("first", SystemAccess::default()), "never_registered");
        let err = schedule.ensure_frozen(&ctx).unwrap_err();
        assert!(matches!(err, EcsError::ScheduleConstruction(_)));
    }

    #[test]
    fn add_after_target_registered_later_still_resolves() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        schedule.add_system_after(
            mock(
                "second_writer",
                SystemAccess {
                    component_writes: vec![0],
                    ..Default::default()
                },
            ),
            "writer",
        );
        schedule.add_system(mock(
            "writer",
            SystemAccess {
                component_writes: vec![0],
                ..Default::default()
            },
        ));
        schedule.ensure_frozen(&ctx).unwrap();
        let groups = schedule.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![1]);
        assert_eq!(groups[1], vec![0]);
    }

    #[test]
    fn add_systems_tuple_chains_top_level_positions() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        schedule.add_systems((
            mock(
                "first",
                SystemAccess {
                    component_writes: vec![0],
                    ..Default::default()
                },
            ),
            mock(
                "second",
                SystemAccess {
                    component_writes: vec![0],
                    ..Default::default()
                },
            ),
        ));
        schedule.ensure_frozen(&ctx).unwrap();
        let groups = schedule.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![0]);
        assert_eq!(groups[1], vec![1]);
    }

    #[test]
    fn add_systems_nested_tuple_is_a_sibling_group() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        // A tuple nested one level inside the top-level chain is a sibling
        // group: its members carry no ordering constraint between them.
        schedule.add_systems(((
            mock("readers_a", SystemAccess { component_reads: vec![0], ..Default::default() }),
            mock("readers_b", SystemAccess { component_reads: vec![0], ..Default::default() }),
        ),));
        schedule.ensure_frozen(&ctx).unwrap();
        assert_eq!(schedule.groups().len(), 1);
        assert_eq!(schedule.groups()[0].len(), 2);
    }

    #[test]
    fn clear_systems_drops_everything() {
        let mut schedule = Schedule::new();
        let (registrar, archetypes, entities, resources) = test_ctx();
        let ctx = SystemContext {
            registrar: &registrar,
            archetypes: &archetypes,
            entities: &entities,
            resources: &resources,
        };

        schedule.add_system(mock("a", SystemAccess::default()));
        schedule.ensure_frozen(&ctx).unwrap();
        assert_eq!(schedule.system_count(), 1);

        schedule.clear_systems();
        assert_eq!(schedule.system_count(), 0);
        assert!(!schedule.is_frozen());
        schedule.ensure_frozen(&ctx).unwrap();
        assert!(schedule.groups().is_empty());
    }
}
