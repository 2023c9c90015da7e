//! Worker pool used to run one execution group's systems concurrently.
//!
//! Wraps a dedicated `rayon::ThreadPool` rather than the global rayon pool so
//! an embedding application can size worker count independently of whatever
//! else in the process also happens to use rayon.

use rayon::prelude::*;

/// Thin wrapper around a rayon thread pool sized at construction time.
pub struct ThreadPool {
    inner: rayon::ThreadPool,
}

impl ThreadPool {
    /// `worker_count == 0` defers to the crate's own default of half of
    /// `std::thread::available_parallelism()` (never less than one), rather
    /// than rayon's own default of one worker per logical core — leaving
    /// headroom for whatever else in the embedding process also schedules
    /// work onto the machine.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = if worker_count > 0 {
            worker_count
        } else {
            default_worker_count()
        };
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("ecs-worker-{i}"))
            .build()
            .expect("failed to spawn worker threads");
        #[cfg(feature = "profiling")]
        tracing::debug!(worker_count, "thread pool created");
        Self { inner }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.current_num_threads()
    }

    /// Runs every task to completion before returning. Tasks do not need to
    /// be `'static`: the pool installs the batch inside its own scope, so
    /// borrows from the caller's stack frame are sound for the duration of
    /// this call.
    pub fn dispatch_all<'scope, T>(&self, tasks: Vec<T>)
    where
        T: FnOnce() + Send + 'scope,
    {
        self.inner.install(|| {
            tasks.into_par_iter().for_each(|task| task());
        });
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        #[cfg(feature = "profiling")]
        tracing::debug!(worker_count = self.worker_count(), "thread pool shutting down");
    }
}

/// Half of the machine's available parallelism, never less than one.
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}
