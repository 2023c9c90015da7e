//! The system adapter contract: `initialize`/`configure`/`execute`, the
//! declared-access conflict check the schedule groups systems by, and two
//! ready-made adapters (per-entity and whole-tick) built on top of it.

use std::any::{Any, TypeId};

use parking_lot::Mutex;

use crate::archetype::{Archetype, ArchetypeId};
use crate::archetype_manager::{ArchetypeFilter, ArchetypeManager};
use crate::command::Commands;
use crate::component::Component;
use crate::entity::{Entity, EntityPool};
use crate::error::{EcsError, Result};
use crate::resource::ResourcePool;
use crate::table::RowPos;
use crate::type_registry::{TypeIndex, TypeRegistrar};

/// Everything a system needs to read state, write state, and defer
/// structural mutation for one tick. Cheap to construct: every field is a
/// borrow held by the owning `World`/`App` for the duration of a schedule
/// run.
#[derive(Clone, Copy)]
pub struct SystemContext<'w> {
    pub registrar: &'w TypeRegistrar,
    pub archetypes: &'w ArchetypeManager,
    pub entities: &'w Mutex<EntityPool>,
    pub resources: &'w ResourcePool,
}

impl<'w> SystemContext<'w> {
    pub fn commands(&self) -> Commands<'w> {
        Commands::new(self.registrar, self.archetypes, self.entities)
    }

    /// Read-only access to a resource declared via `AccessDecl::resource_read`
    /// or `resource_write`.
    pub fn resource<T: Any + Send + Sync>(&self) -> Option<&'w T> {
        self.resources.get::<T>()
    }

    /// Mutable access to a resource declared via `AccessDecl::resource_write`.
    ///
    /// Soundness rests on the same guarantee as `EntityView::get_mut`: the
    /// schedule never places two systems whose declared access conflicts in
    /// the same execution group, so a system that actually calls this for
    /// `T` is the only one touching `T` this group.
    pub fn resource_mut<T: Any + Send + Sync>(&self) -> Option<&'w mut T> {
        unsafe { self.resources.get_mut_unchecked::<T>() }
    }
}

/// The component and resource types one system declares it reads/writes.
/// The schedule pairwise-compares these to decide which systems may run in
/// the same execution group; it never inspects a system's body.
#[derive(Default, Clone)]
pub struct SystemAccess {
    pub component_reads: Vec<TypeIndex>,
    pub component_writes: Vec<TypeIndex>,
    pub resource_reads: Vec<TypeId>,
    pub resource_writes: Vec<TypeId>,
}

impl SystemAccess {
    /// Two systems conflict iff one writes a type the other reads or
    /// writes. Two readers of the same type never conflict.
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        writes_conflict(&self.component_writes, &other.component_reads, &other.component_writes)
            || writes_conflict(&other.component_writes, &self.component_reads, &self.component_writes)
            || writes_conflict(&self.resource_writes, &other.resource_reads, &other.resource_writes)
            || writes_conflict(&other.resource_writes, &self.resource_reads, &self.resource_writes)
    }
}

fn writes_conflict<T: PartialEq>(writes: &[T], other_reads: &[T], other_writes: &[T]) -> bool {
    writes.iter().any(|w| other_reads.contains(w) || other_writes.contains(w))
}

/// The three-method lifecycle every system implements: `initialize` runs
/// once, before the owning schedule's first freeze, and is where component
/// types get registered; `configure` re-runs whenever the archetype set has
/// grown since the last run, refreshing any cached archetype match list;
/// `execute` runs every tick and returns one `Commands` buffer per call (an
/// adapter may return more than one if it fans out internally).
pub trait System: Send {
    fn name(&self) -> &str;

    /// The system's declared reads/writes. Only meaningful after
    /// `initialize` has run; the schedule always initializes every system
    /// before using this for conflict analysis.
    fn access(&self) -> SystemAccess;

    /// Fails only on a declared-access type-misuse (see `AccessDecl::resolve`);
    /// the schedule propagates the error out of `ensure_frozen` rather than
    /// starting a run with a system it can't place.
    fn initialize(&mut self, ctx: &SystemContext) -> Result<()>;
    fn configure(&mut self, ctx: &SystemContext);
    fn execute<'w>(&mut self, ctx: &SystemContext<'w>) -> Vec<Commands<'w>>;
}

pub type BoxedSystem = Box<dyn System>;

/// A single entity's row in one archetype, read through the same raw
/// column-pointer path `Commands` uses. `get_mut` takes `&self`, not
/// `&mut self`: exclusivity for writes is the schedule's declared-access
/// guarantee, not something this type can check on its own.
pub struct EntityView<'a> {
    archetype: &'a Archetype,
    pos: RowPos,
    entity: Entity,
    registrar: &'a TypeRegistrar,
}

impl<'a> EntityView<'a> {
    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn get<T: Component>(&self) -> Option<&'a T> {
        let id = self.registrar.get_type_id::<T>()?;
        let col = self.archetype.column_index(id)?;
        let ptr = self.archetype.get_component_ptr(col, self.pos) as *const T;
        Some(unsafe { &*ptr })
    }

    pub fn get_mut<T: Component>(&self) -> Option<&'a mut T> {
        let id = self.registrar.get_type_id::<T>()?;
        let col = self.archetype.column_index(id)?;
        let ptr = self.archetype.get_component_ptr(col, self.pos) as *mut T;
        Some(unsafe { &mut *ptr })
    }
}

type Registrant = Box<dyn Fn(&TypeRegistrar) -> TypeIndex + Send>;

/// Marker component excluded from every system's archetype match by
/// default. An author who actually wants to see disabled entities has to
/// say so explicitly, by putting `Disabled` in `all` or `any`.
pub struct Disabled;

/// A contiguous, raw view over one archetype chunk's column for `T` — the
/// whole-column span parameter kind, the alternative to visiting one entity
/// at a time. Declaring both this and a per-entity parameter on the same
/// system is rejected at `initialize` (see `AccessDecl::resolve`).
pub struct ColumnSpan<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: std::marker::PhantomData<&'a mut [T]>,
}

unsafe impl<'a, T: Send> Send for ColumnSpan<'a, T> {}

impl<'a, T> ColumnSpan<'a, T> {
    fn new(ptr: *mut T, len: usize) -> Self {
        Self { ptr, len, _marker: std::marker::PhantomData }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// Declares the component/resource types a system touches, ahead of having
/// a `TypeRegistrar` to resolve them against (that only exists once the
/// owning `World` does). Each declared type carries its own registration
/// closure, so `initialize` can register types the system is the first to
/// mention.
#[derive(Default)]
pub struct AccessDecl {
    reads: Vec<Registrant>,
    writes: Vec<Registrant>,
    any: Vec<Registrant>,
    none: Vec<Registrant>,
    span_reads: Vec<Registrant>,
    span_writes: Vec<Registrant>,
    resource_reads: Vec<TypeId>,
    resource_writes: Vec<TypeId>,
}

impl AccessDecl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T: Component>(mut self) -> Self {
        self.reads.push(Box::new(|r| r.register_component::<T>()));
        self
    }

    pub fn write<T: Component>(mut self) -> Self {
        self.writes.push(Box::new(|r| r.register_component::<T>()));
        self
    }

    /// Narrows the match to archetypes carrying at least one of the given
    /// types, in addition to every declared read/write.
    pub fn any<T: Component>(mut self) -> Self {
        self.any.push(Box::new(|r| r.register_component::<T>()));
        self
    }

    /// Excludes archetypes carrying the given type.
    pub fn none<T: Component>(mut self) -> Self {
        self.none.push(Box::new(|r| r.register_component::<T>()));
        self
    }

    /// Declares a read-only whole-column span parameter for `T`. Mutually
    /// exclusive with `read`/`write` on the same declaration.
    pub fn span_read<T: Component>(mut self) -> Self {
        self.span_reads.push(Box::new(|r| r.register_component::<T>()));
        self
    }

    /// Declares a mutable whole-column span parameter for `T`. Mutually
    /// exclusive with `read`/`write` on the same declaration.
    pub fn span_write<T: Component>(mut self) -> Self {
        self.span_writes.push(Box::new(|r| r.register_component::<T>()));
        self
    }

    pub fn resource_read<T: Any + Send + Sync>(mut self) -> Self {
        self.resource_reads.push(TypeId::of::<T>());
        self
    }

    pub fn resource_write<T: Any + Send + Sync>(mut self) -> Self {
        self.resource_writes.push(TypeId::of::<T>());
        self
    }

    /// Resolves every declared type against `registrar` and builds the
    /// matching filter and conflict-detection access set, rejecting the
    /// three system-level type-misuse cases along the way: mixing
    /// per-entity and span parameters on one declaration, a read/write
    /// parameter whose type is also in `none`, and a zero-sized type used
    /// as a per-entity parameter.
    fn resolve(&self, registrar: &TypeRegistrar) -> Result<(ArchetypeFilter, SystemAccess)> {
        let component_reads: Vec<TypeIndex> = self.reads.iter().map(|f| f(registrar)).collect();
        let component_writes: Vec<TypeIndex> = self.writes.iter().map(|f| f(registrar)).collect();
        let span_reads: Vec<TypeIndex> = self.span_reads.iter().map(|f| f(registrar)).collect();
        let span_writes: Vec<TypeIndex> = self.span_writes.iter().map(|f| f(registrar)).collect();
        let any: Vec<TypeIndex> = self.any.iter().map(|f| f(registrar)).collect();
        let none: Vec<TypeIndex> = self.none.iter().map(|f| f(registrar)).collect();

        let has_per_entity = !component_reads.is_empty() || !component_writes.is_empty();
        let has_span = !span_reads.is_empty() || !span_writes.is_empty();
        if has_per_entity && has_span {
            return Err(EcsError::TypeMisuse(
                "system declares both per-entity and column-span parameters".to_string(),
            ));
        }

        for &id in component_reads.iter().chain(component_writes.iter()) {
            if none.contains(&id) {
                return Err(EcsError::TypeMisuse(format!(
                    "component {id} is both a read/write parameter and in the none filter"
                )));
            }
            let info = registrar
                .get_type_info(id)
                .expect("type just registered by this same call must have info");
            if info.size == 0 {
                return Err(EcsError::TypeMisuse(format!(
                    "component {id} is zero-sized and cannot be used as a per-entity parameter"
                )));
            }
        }

        let mut all = component_reads.clone();
        all.extend(component_writes.iter().copied());
        all.extend(span_reads.iter().copied());
        all.extend(span_writes.iter().copied());

        let mut none = none;
        let disabled_id = registrar.register_component::<Disabled>();
        if !all.contains(&disabled_id) && !any.contains(&disabled_id) && !none.contains(&disabled_id) {
            none.push(disabled_id);
        }

        let required = all.clone();
        let filter = ArchetypeFilter { all, any, none, required };
        let access = SystemAccess {
            component_reads: component_reads.into_iter().chain(span_reads).collect(),
            component_writes: component_writes.into_iter().chain(span_writes).collect(),
            resource_reads: self.resource_reads.clone(),
            resource_writes: self.resource_writes.clone(),
        };
        Ok((filter, access))
    }
}

/// A system dispatched once per entity matching its filter. The cached
/// archetype match list is refreshed whenever `ArchetypeManager::generation`
/// has moved since the last refresh, per the staleness rule in §4.8.
pub struct QuerySystem<F> {
    name: String,
    decl: AccessDecl,
    resolved: Mutex<Option<(ArchetypeFilter, SystemAccess)>>,
    cached_matches: Mutex<(u64, Vec<ArchetypeId>)>,
    body: F,
}

impl<F> QuerySystem<F>
where
    F: FnMut(EntityView, &mut Commands) + Send,
{
    pub fn new(name: impl Into<String>, decl: AccessDecl, body: F) -> Self {
        Self {
            name: name.into(),
            decl,
            resolved: Mutex::new(None),
            cached_matches: Mutex::new((u64::MAX, Vec::new())),
            body,
        }
    }
}

impl<F> System for QuerySystem<F>
where
    F: FnMut(EntityView, &mut Commands) + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> SystemAccess {
        self.resolved.lock().clone().map(|(_, access)| access).unwrap_or_default()
    }

    fn initialize(&mut self, ctx: &SystemContext) -> Result<()> {
        let resolved = self.decl.resolve(ctx.registrar)?;
        *self.resolved.lock() = Some(resolved);
        self.configure(ctx);
        Ok(())
    }

    fn configure(&mut self, ctx: &SystemContext) {
        let Some((filter, _)) = self.resolved.lock().clone() else {
            return;
        };
        let matches = ctx.archetypes.match_archetypes(&filter);
        *self.cached_matches.lock() = (ctx.archetypes.generation(), matches);
    }

    fn execute<'w>(&mut self, ctx: &SystemContext<'w>) -> Vec<Commands<'w>> {
        let Some((filter, _)) = self.resolved.lock().clone() else {
            return vec![ctx.commands()];
        };
        let gen = ctx.archetypes.generation();
        {
            let mut cache = self.cached_matches.lock();
            if cache.0 != gen {
                cache.1 = ctx.archetypes.match_archetypes(&filter);
                cache.0 = gen;
            }
        }
        let matches = self.cached_matches.lock().1.clone();
        let mut cmds = ctx.commands();
        for archetype_id in matches {
            ctx.archetypes.with(archetype_id, |a| {
                for (pos, entity) in a.entities() {
                    let view = EntityView {
                        archetype: a,
                        pos,
                        entity,
                        registrar: ctx.registrar,
                    };
                    (self.body)(view, &mut cmds);
                }
            });
        }
        vec![cmds]
    }
}

/// A system dispatched once per archetype chunk, receiving the whole
/// column as a `ColumnSpan<T>` rather than one `EntityView` per entity.
/// Grounded on the same cached-match staleness rule as `QuerySystem`.
pub struct ChunkSystem<T, F> {
    name: String,
    decl: AccessDecl,
    resolved: Mutex<Option<(ArchetypeFilter, SystemAccess)>>,
    cached_matches: Mutex<(u64, Vec<ArchetypeId>)>,
    body: F,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F> ChunkSystem<T, F>
where
    T: Component,
    F: FnMut(ColumnSpan<T>, &mut Commands) + Send,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            decl: AccessDecl::new().span_write::<T>(),
            resolved: Mutex::new(None),
            cached_matches: Mutex::new((u64::MAX, Vec::new())),
            body,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> System for ChunkSystem<T, F>
where
    T: Component,
    F: FnMut(ColumnSpan<T>, &mut Commands) + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> SystemAccess {
        self.resolved.lock().clone().map(|(_, access)| access).unwrap_or_default()
    }

    fn initialize(&mut self, ctx: &SystemContext) -> Result<()> {
        let resolved = self.decl.resolve(ctx.registrar)?;
        *self.resolved.lock() = Some(resolved);
        self.configure(ctx);
        Ok(())
    }

    fn configure(&mut self, ctx: &SystemContext) {
        let Some((filter, _)) = self.resolved.lock().clone() else {
            return;
        };
        let matches = ctx.archetypes.match_archetypes(&filter);
        *self.cached_matches.lock() = (ctx.archetypes.generation(), matches);
    }

    fn execute<'w>(&mut self, ctx: &SystemContext<'w>) -> Vec<Commands<'w>> {
        let Some(id) = ctx.registrar.get_type_id::<T>() else {
            return vec![ctx.commands()];
        };
        let gen = ctx.archetypes.generation();
        {
            let mut cache = self.cached_matches.lock();
            if cache.0 != gen {
                if let Some((filter, _)) = self.resolved.lock().clone() {
                    cache.1 = ctx.archetypes.match_archetypes(&filter);
                }
                cache.0 = gen;
            }
        }
        let matches = self.cached_matches.lock().1.clone();
        let mut cmds = ctx.commands();
        for archetype_id in matches {
            ctx.archetypes.with(archetype_id, |a| {
                for chunk in 0..a.chunk_count() {
                    let Some((ptr, len)) = a.get_chunk_data(id, chunk) else { continue };
                    let span = ColumnSpan::new(ptr as *mut T, len);
                    (self.body)(span, &mut cmds);
                }
            });
        }
        vec![cmds]
    }
}

/// A system with no per-entity component parameters: dispatched exactly
/// once per tick, with no archetype iteration at all (the resolution for
/// the open question of how a component-less system interacts with
/// archetype matching -- see DESIGN.md).
pub struct TickSystem<F> {
    name: String,
    access: SystemAccess,
    body: F,
}

impl<F> TickSystem<F>
where
    F: FnMut(&SystemContext, &mut Commands) + Send,
{
    pub fn new(name: impl Into<String>, access: SystemAccess, body: F) -> Self {
        Self {
            name: name.into(),
            access,
            body,
        }
    }
}

impl<F> System for TickSystem<F>
where
    F: FnMut(&SystemContext, &mut Commands) + Send,
{
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

    fn execute<'w>(&mut self, ctx: &SystemContext<'w>) -> Vec<Commands<'w>> {
        let mut cmds = ctx.commands();
        (self.body)(ctx, &mut cmds);
        vec![cmds]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position {
        x: f32,
    }

    fn context<'w>(
        registrar: &'w TypeRegistrar,
        archetypes: &'w ArchetypeManager,
        entities: &'w Mutex<EntityPool>,
        resources: &'w ResourcePool,
    ) -> SystemContext<'w> {
        SystemContext {
            registrar,
            archetypes,
            entities,
            resources,
        }
    }

    #[test]
    fn conflicting_writes_are_detected() {
        let a = SystemAccess {
            component_writes: vec![1],
            ..Default::default()
        };
        let b = SystemAccess {
            component_reads: vec![1],
            ..Default::default()
        };
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn two_readers_never_conflict() {
        let a = SystemAccess {
            component_reads: vec![1],
            ..Default::default()
        };
        let b = SystemAccess {
            component_reads: vec![1],
            ..Default::default()
        };
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn query_system_visits_every_matching_entity() {
        let registrar = TypeRegistrar::new();
        let archetypes = ArchetypeManager::new();
        let entities = Mutex::new(EntityPool::new());
        let resources = ResourcePool::new();
        let ctx = context(&registrar, &archetypes, &entities, &resources);

        {
            let mut cmds = ctx.commands();
            for i in 0..3 {
                let e = cmds.create_entity();
                cmds.add_component(e, Position { x: i as f32 });
            }
            cmds.commit();
        }

        let mut visited = 0u32;
        let mut sys = QuerySystem::new(
            "sum_position",
            AccessDecl::new().read::<Position>(),
            move |view: EntityView, _cmds: &mut Commands| {
                if view.get::<Position>().is_some() {
                    visited += 1;
                }
            },
        );
        sys.initialize(&ctx).unwrap();
        let mut cmds_out = sys.execute(&ctx);
        for cmds in cmds_out.iter_mut() {
            cmds.commit();
        }
        let archetype_id = archetypes.find(&[registrar.get_type_id::<Position>().unwrap()]).unwrap();
        assert_eq!(archetypes.with(archetype_id, |a| a.len()).unwrap_or(0), 3);
    }

    #[test]
    fn context_resource_mut_writes_through_to_later_reads() {
        struct FrameCount(u32);

        let registrar = TypeRegistrar::new();
        let archetypes = ArchetypeManager::new();
        let entities = Mutex::new(EntityPool::new());
        let mut resources = ResourcePool::new();
        resources.add(FrameCount(0)).unwrap();
        let ctx = context(&registrar, &archetypes, &entities, &resources);

        let mut tick = TickSystem::new(
            "advance_frame",
            AccessDecl::new().resource_write::<FrameCount>().resolve(&registrar).unwrap().1,
            |ctx: &SystemContext, _cmds: &mut Commands| {
                ctx.resource_mut::<FrameCount>().unwrap().0 += 1;
            },
        );
        tick.initialize(&ctx).unwrap();
        let _ = tick.execute(&ctx);
        let _ = tick.execute(&ctx);
        assert_eq!(ctx.resource::<FrameCount>().unwrap().0, 2);
    }

    struct Tag;

    #[test]
    fn resolve_rejects_zero_sized_per_entity_component() {
        let registrar = TypeRegistrar::new();
        let err = AccessDecl::new().read::<Tag>().resolve(&registrar).unwrap_err();
        assert!(matches!(err, EcsError::TypeMisuse(_)));
    }

    #[test]
    fn resolve_rejects_read_write_type_also_in_none_filter() {
        let registrar = TypeRegistrar::new();
        let err = AccessDecl::new()
            .read::<Position>()
            .none::<Position>()
            .resolve(&registrar)
            .unwrap_err();
        assert!(matches!(err, EcsError::TypeMisuse(_)));
    }

    #[test]
    fn resolve_rejects_mixing_per_entity_and_span_parameters() {
        let registrar = TypeRegistrar::new();
        let err = AccessDecl::new()
            .read::<Position>()
            .span_write::<Position>()
            .resolve(&registrar)
            .unwrap_err();
        assert!(matches!(err, EcsError::TypeMisuse(_)));
    }

    #[test]
    fn resolve_implicitly_excludes_disabled_entities() {
        let registrar = TypeRegistrar::new();
        let (filter, _) = AccessDecl::new().read::<Position>().resolve(&registrar).unwrap();
        let disabled_id = registrar.get_type_id::<Disabled>().unwrap();
        assert!(filter.none.contains(&disabled_id));
    }

    #[test]
    fn resolve_does_not_double_exclude_disabled_when_declared_explicitly() {
        let registrar = TypeRegistrar::new();
        let (filter, _) = AccessDecl::new()
            .read::<Position>()
            .any::<Disabled>()
            .resolve(&registrar)
            .unwrap();
        let disabled_id = registrar.get_type_id::<Disabled>().unwrap();
        assert!(!filter.none.contains(&disabled_id));
        assert!(filter.any.contains(&disabled_id));
    }

    #[test]
    fn chunk_system_visits_every_entity_via_span() {
        let registrar = TypeRegistrar::new();
        let archetypes = ArchetypeManager::new();
        let entities = Mutex::new(EntityPool::new());
        let resources = ResourcePool::new();
        let ctx = context(&registrar, &archetypes, &entities, &resources);

        {
            let mut cmds = ctx.commands();
            for i in 0..5 {
                let e = cmds.create_entity();
                cmds.add_component(e, Position { x: i as f32 });
            }
            cmds.commit();
        }

        let mut total = 0.0f32;
        let mut sys = ChunkSystem::<Position, _>::new("sum_span", move |mut span, _cmds| {
            for p in span.as_mut_slice() {
                total += p.x;
                p.x *= 2.0;
            }
        });
        sys.initialize(&ctx).unwrap();
        let mut cmds_out = sys.execute(&ctx);
        for cmds in cmds_out.iter_mut() {
            cmds.commit();
        }
        let archetype_id = archetypes.find(&[registrar.get_type_id::<Position>().unwrap()]).unwrap();
        assert_eq!(archetypes.with(archetype_id, |a| a.len()).unwrap_or(0), 5);
    }
}
