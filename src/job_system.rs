//! High-level job system interface.
//!
//! The JobSystem owns the worker threads, one job queue per worker plus one
//! for the thread that created it, and the job arena. Scheduling goes
//! through the [`JobScheduler`] trait.

use crate::PinningStrategy;
use crate::error::{JobSystemError, Result};
use crate::scheduler::{JobScheduler, LocalQueue, Scheduler};
use crate::worker::{self, StdThreadFactory, ThreadFactory, ThreadSpec, WorkerThread};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, info};

/// Configuration for the job system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
    /// Number of worker threads. Default: processor count - 1, at least 1.
    pub worker_threads: Option<usize>,
    /// Job slots in each thread's ring. Power of two. Default: 4096.
    pub jobs_per_thread: usize,
    /// Capacity of each job queue. Power of two. Default: 4096.
    pub queue_capacity: usize,
    /// How worker threads are pinned to cores. Default: none.
    pub pinning: PinningStrategy,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            jobs_per_thread: 4096,
            queue_capacity: 4096,
            pinning: PinningStrategy::None,
            thread_name_prefix: "rustjob-worker".to_string(),
        }
    }
}

impl JobSystemConfig {
    /// Shorthand for a default config with a fixed worker count.
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads: Some(worker_threads),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| {
            Err(JobSystemError::InvalidConfig {
                field,
                reason: reason.to_string(),
            })
        };
        if self.worker_threads == Some(0) {
            return invalid("worker_threads", "at least one worker is required");
        }
        if !self.jobs_per_thread.is_power_of_two() {
            return invalid("jobs_per_thread", "must be a power of two");
        }
        if !self.queue_capacity.is_power_of_two() {
            return invalid("queue_capacity", "must be a power of two");
        }
        Ok(())
    }
}

/// The main job system managing worker threads and job execution.
///
/// The thread that creates the job system owns queue 0 and is the only
/// non-worker thread allowed to schedule on it. It takes part in execution
/// whenever it calls [`complete`](JobScheduler::complete).
///
/// # Example
///
/// ```no_run
/// use rustjob::{JobScheduler, JobSystem};
///
/// let job_system = JobSystem::new(4);
/// let root = job_system.prepare_empty_job();
/// for i in 0..8 {
///     job_system.schedule_child_job(&root, move |_| println!("child {i}"));
/// }
/// let root = job_system.schedule(root);
/// job_system.complete(&root);
/// job_system.shutdown().unwrap();
/// ```
pub struct JobSystem {
    core: Arc<Scheduler>,
    /// Thread owning each queue, by queue index.
    registry: Box<[ThreadId]>,
    threads: Vec<Box<dyn WorkerThread>>,
    config: JobSystemConfig,
}

impl JobSystem {
    /// Creates a job system with `num_threads` workers and default settings.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is zero or a worker thread cannot be spawned.
    pub fn new(num_threads: usize) -> Self {
        Self::with_config(JobSystemConfig::with_workers(num_threads))
            .unwrap_or_else(|err| panic!("failed to start job system: {err}"))
    }

    /// Creates a job system with one worker per processor, minus one for the
    /// calling thread.
    pub fn with_default_threads() -> Self {
        Self::with_config(JobSystemConfig::default())
            .unwrap_or_else(|err| panic!("failed to start job system: {err}"))
    }

    pub fn with_config(config: JobSystemConfig) -> Result<Self> {
        Self::with_thread_factory(config, &StdThreadFactory)
    }

    /// Creates a job system whose workers are spawned by `factory`.
    pub fn with_thread_factory(
        config: JobSystemConfig,
        factory: &dyn ThreadFactory,
    ) -> Result<Self> {
        config.validate()?;
        let workers = config
            .worker_threads
            .unwrap_or_else(|| factory.processor_count().saturating_sub(1).max(1));
        let queue_count = workers + 1;
        if queue_count
            .checked_mul(config.jobs_per_thread)
            .is_none_or(|slots| slots > u32::MAX as usize)
        {
            return Err(JobSystemError::InvalidConfig {
                field: "jobs_per_thread",
                reason: format!(
                    "{queue_count} rings of {} slots overflow the job arena",
                    config.jobs_per_thread
                ),
            });
        }

        let core = Arc::new(Scheduler::new(
            queue_count,
            config.jobs_per_thread,
            config.queue_capacity,
        ));
        let mut registry = Vec::with_capacity(queue_count);
        registry.push(thread::current().id());

        let mut system = JobSystem {
            core,
            registry: Box::default(),
            threads: Vec::with_capacity(workers),
            config,
        };

        for index in 0..workers {
            let spec = ThreadSpec {
                index,
                name: format!("{}-{}", system.config.thread_name_prefix, index),
                core: system.config.pinning.core_for(index),
            };
            let worker_core = Arc::clone(&system.core);
            match factory.spawn(spec, Box::new(move || worker::run(worker_core, index + 1))) {
                Ok(thread) => {
                    registry.push(thread.id());
                    system.threads.push(thread);
                }
                Err(source) => {
                    // Dropping stops the workers that did start.
                    system.registry = registry.into_boxed_slice();
                    return Err(JobSystemError::Spawn { index, source });
                }
            }
        }
        system.registry = registry.into_boxed_slice();

        debug!(
            workers,
            jobs_per_thread = system.config.jobs_per_thread,
            queue_capacity = system.config.queue_capacity,
            pinning = ?system.config.pinning,
            "job system started"
        );
        Ok(system)
    }

    /// Returns the number of worker threads in the system.
    pub fn num_workers(&self) -> usize {
        self.core.queue_count() - 1
    }

    pub fn config(&self) -> &JobSystemConfig {
        &self.config
    }

    /// Queue index owned by the calling thread, if it belongs to this system.
    pub fn queue_of_current_thread(&self) -> Option<usize> {
        let current = thread::current().id();
        self.registry.iter().position(|id| *id == current)
    }

    /// Returns a snapshot of the scheduler counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Stops every worker and waits for it to exit.
    ///
    /// Called from the thread that built the system, one terminal job per
    /// worker is queued behind all work already submitted from this thread.
    /// From any other thread, workers are asked to exit once every queue has
    /// drained. Jobs must not be scheduled concurrently with shutdown.
    ///
    /// Returns an error if any worker thread panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if self.threads.is_empty() {
            return Ok(());
        }
        if self.queue_of_current_thread() == Some(0) {
            let core = &self.core;
            for _ in 0..self.threads.len() {
                let terminal = core.prepare_shutdown(0);
                core.publish(0, terminal);
            }
        } else {
            debug!("job system stopped away from its owning thread");
            self.core.request_stop();
        }

        let current = thread::current().id();
        let mut panicked = 0;
        for (index, thread) in self.threads.drain(..).enumerate() {
            // A worker dropping the system leaves its loop once it is idle.
            if thread.id() == current {
                continue;
            }
            if thread.join().is_err() {
                error!(worker = index, "worker thread panicked");
                panicked += 1;
            }
        }

        if panicked > 0 {
            return Err(JobSystemError::WorkerPanicked { count: panicked });
        }
        info!("job system shut down");
        Ok(())
    }
}

impl JobScheduler for JobSystem {
    /// # Panics
    ///
    /// Panics when called from a thread that is not registered with this
    /// job system.
    fn local(&self) -> LocalQueue<'_> {
        let queue = self.queue_of_current_thread().unwrap_or_else(|| {
            panic!(
                "thread {:?} is not registered with this job system",
                thread::current().id()
            )
        });
        LocalQueue {
            core: &self.core,
            queue,
        }
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        JobSystem::with_default_threads()
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        debug!("job system dropped without explicit shutdown");
        if let Err(err) = self.stop() {
            error!("job system shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_job_system_creation() {
        let job_system = JobSystem::new(4);
        assert_eq!(job_system.num_workers(), 4);
        assert_eq!(job_system.queue_of_current_thread(), Some(0));
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_job_system_run() {
        let job_system = JobSystem::new(2);
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = executed.clone();

        let handle = job_system.schedule_job(move |_| {
            executed_clone.fetch_add(1, Ordering::SeqCst);
        });

        job_system.complete(&handle);
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = JobSystemConfig {
            jobs_per_thread: 1000,
            ..JobSystemConfig::with_workers(2)
        };
        match JobSystem::with_config(config) {
            Err(JobSystemError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "jobs_per_thread")
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("config should have been rejected"),
        }

        assert!(matches!(
            JobSystem::with_config(JobSystemConfig::with_workers(0)),
            Err(JobSystemError::InvalidConfig { field: "worker_threads", .. })
        ));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: JobSystemConfig =
            serde_json::from_str(r#"{ "worker_threads": 3, "pinning": "Linear" }"#).unwrap();
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.pinning, PinningStrategy::Linear);
        assert_eq!(config.jobs_per_thread, 4096);
        assert_eq!(config.thread_name_prefix, "rustjob-worker");
    }

    #[test]
    fn test_drop_stops_workers() {
        let executed = Arc::new(AtomicUsize::new(0));
        {
            let job_system = JobSystem::new(2);
            for _ in 0..16 {
                let executed = executed.clone();
                job_system.schedule_job(move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        // Terminal jobs queue behind the submitted ones.
        assert_eq!(executed.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_unregistered_thread_cannot_schedule_but_stops_workers() {
        let job_system = Arc::new(JobSystem::new(2));
        let core = Arc::clone(&job_system.core);

        let remote = thread::spawn(move || {
            let rejected = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                job_system.schedule_job(|_| {});
            }))
            .is_err();
            // Last reference: dropping here must still stop the workers.
            drop(job_system);
            rejected
        });
        assert!(remote.join().expect("remote thread panicked"));

        // Every worker has exited and released its share of the scheduler.
        assert_eq!(Arc::strong_count(&core), 1);
    }
}
