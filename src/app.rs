use crate::error::Result;
use crate::schedule::Schedule;
use crate::schedule_set::ScheduleSet;
use crate::system::BoxedSystem;
use crate::thread_pool::ThreadPool;
use crate::world::World;

/// Default name of the single schedule `App::new` wires up. An embedding
/// application that wants multiple named schedules (fixed-timestep physics,
/// a late-update pass, ...) builds its own `ScheduleSet` via
/// `App::with_schedules` instead.
pub const UPDATE: &str = "update";

/// Composition root: owns a `World` and the `ScheduleSet`/`ThreadPool` pair
/// that drives it one tick at a time.
pub struct App {
    world: World,
    schedules: ScheduleSet,
    pool: ThreadPool,
}

impl App {
    pub fn new() -> Self {
        let mut schedules = ScheduleSet::new();
        schedules.add_schedule(UPDATE, Schedule::new());
        Self {
            world: World::new(),
            schedules,
            pool: ThreadPool::default(),
        }
    }

    pub fn with_schedules(schedules: ScheduleSet) -> Self {
        Self {
            world: World::new(),
            schedules,
            pool: ThreadPool::default(),
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.pool = ThreadPool::new(worker_count);
        self
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Adds `system` to the default `"update"` schedule.
    pub fn add_system(&mut self, system: BoxedSystem) -> &mut Self {
        if let Some(schedule) = self.schedules.schedule_mut(UPDATE) {
            schedule.add_system(system);
        }
        self
    }

    pub fn add_system_to(&mut self, schedule_name: &str, system: BoxedSystem) -> &mut Self {
        if let Some(schedule) = self.schedules.schedule_mut(schedule_name) {
            schedule.add_system(system);
        }
        self
    }

    pub fn schedules_mut(&mut self) -> &mut ScheduleSet {
        &mut self.schedules
    }

    /// Runs every schedule once, in order.
    pub fn update(&mut self) -> Result<()> {
        self.update_until(None)
    }

    /// Runs schedules in order, stopping after the named one has run.
    /// `stop_at == None` runs every schedule, matching `update`.
    pub fn update_until(&mut self, stop_at: Option<&str>) -> Result<()> {
        let ctx = self.world.context();
        let result = self.schedules.run_until(&ctx, &self.pool, stop_at);
        self.world.advance_tick();
        result
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
