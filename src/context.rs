//! Context handed to every work function.
//!
//! The context ties a running job to the queue of the thread executing it,
//! so jobs can spawn children, chain continuations and wait on other jobs
//! without going through the [`JobSystem`](crate::JobSystem).

use crate::handle::JobHandle;
use crate::job::JobId;
use crate::scheduler::{JobScheduler, LocalQueue, Scheduler};

/// Capability passed to a running job.
///
/// All [`JobScheduler`] methods are available and operate on the executing
/// thread's local queue.
pub struct JobContext<'a> {
    core: &'a Scheduler,
    queue: usize,
    job: JobId,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(core: &'a Scheduler, queue: usize, job: JobId) -> Self {
        JobContext { core, queue, job }
    }

    /// The running job's own handle.
    pub fn handle(&self) -> JobHandle {
        JobHandle::new(self.job)
    }

    pub fn name(&self) -> Option<&'static str> {
        self.core.name_of(self.job)
    }

    /// Index of the queue this job runs on. Queue 0 is the thread that built
    /// the job system.
    pub fn queue_index(&self) -> usize {
        self.queue
    }

    /// Schedules `work` as a child of the running job.
    ///
    /// The running job does not count as done until the child has finished.
    pub fn spawn_child<F>(&self, work: F) -> JobHandle
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.schedule_child_job(self.handle(), work)
    }
}

impl JobScheduler for JobContext<'_> {
    fn local(&self) -> LocalQueue<'_> {
        LocalQueue {
            core: self.core,
            queue: self.queue,
        }
    }
}
