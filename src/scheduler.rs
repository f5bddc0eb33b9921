//! Scheduler core shared by the job system and its workers.
//!
//! Every operation takes the index of the caller's own queue. Queue 0 belongs
//! to the thread that built the [`JobSystem`](crate::JobSystem), queue `i + 1`
//! to worker `i`. Pushes and pops only ever touch the caller's queue; steals
//! go to a victim picked by a shared round-robin cursor.
//!
//! Execution and join protocol for a job `J`:
//!
//! 1. run `J`'s closure, if it has one;
//! 2. decrement `J.pending`;
//! 3. the thread that observes the transition to zero publishes `J`'s
//!    continuations into its own queue and repeats from step 2 on `J`'s parent.

use crate::allocator::JobRing;
use crate::context::JobContext;
use crate::handle::{JobHandle, PreparedJobHandle};
use crate::job::{Job, JobHeader, JobId, JobKind, assert_payload_fits};
use crate::queue::JobQueue;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crossbeam::deque::Steal;
use crossbeam::utils::CachePadded;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

macro_rules! record {
    ($core:expr, $counter:ident) => {
        #[cfg(feature = "metrics")]
        $core.metrics.$counter.fetch_add(1, Ordering::Relaxed);
    };
}

pub(crate) struct Scheduler {
    jobs: Box<[Job]>,
    rings: Box<[JobRing]>,
    queues: Box<[JobQueue]>,
    steal_cursor: CachePadded<AtomicUsize>,
    /// Set when the system is torn down from a thread without queue 0.
    stopping: AtomicBool,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl Scheduler {
    pub(crate) fn new(queue_count: usize, jobs_per_thread: usize, queue_capacity: usize) -> Self {
        let jobs = (0..queue_count * jobs_per_thread).map(|_| Job::new()).collect();
        let rings = (0..queue_count)
            .map(|queue| JobRing::new(queue * jobs_per_thread, jobs_per_thread))
            .collect();
        let queues = (0..queue_count)
            .map(|_| JobQueue::new(queue_capacity))
            .collect();
        Scheduler {
            jobs,
            rings,
            queues,
            steal_cursor: CachePadded::new(AtomicUsize::new(0)),
            stopping: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        }
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Asks idle workers to exit once every queue has drained.
    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    /// True when a stop was requested and no queue holds work.
    pub(crate) fn drained_for_stop(&self) -> bool {
        self.stopping.load(Ordering::Acquire) && self.queues.iter().all(JobQueue::is_empty)
    }

    #[inline]
    fn job(&self, id: JobId) -> &Job {
        &self.jobs[id.index()]
    }

    /// Allocates a job slot from `queue`'s ring and wires its parent.
    fn prepare_node(&self, queue: usize, kind: JobKind, options: JobOptions) -> JobId {
        if let Some(parent) = options.parent {
            let job = self.job(parent);
            assert!(
                job.generation() == parent.generation() && job.add_child() > 0,
                "cannot add a child to job {parent:?}: it has already finished"
            );
        }
        let header = JobHeader {
            kind,
            parent: options.parent,
            dependency: options.dependency,
            name: options.name,
        };
        self.rings[queue].allocate(&self.jobs, header)
    }

    pub(crate) fn prepare_empty(&self, queue: usize, options: JobOptions) -> JobId {
        self.prepare_node(queue, JobKind::Empty, options)
    }

    pub(crate) fn prepare_work<F>(&self, queue: usize, options: JobOptions, work: F) -> JobId
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        // Checked before the parent count or any slot is touched.
        assert_payload_fits::<F>();
        let id = self.prepare_node(queue, JobKind::Empty, options);
        // SAFETY: the slot was just allocated and is not yet published.
        unsafe { self.job(id).store_closure(work) };
        id
    }

    pub(crate) fn prepare_shutdown(&self, queue: usize) -> JobId {
        self.prepare_node(
            queue,
            JobKind::Shutdown,
            JobOptions {
                name: Some("shutdown"),
                ..JobOptions::default()
            },
        )
    }

    /// Pushes a job onto the caller's queue.
    pub(crate) fn publish(&self, queue: usize, id: JobId) {
        self.queues[queue].push(id);
    }

    /// Registers `id` behind its dependency. Returns `false` when the job
    /// must be published now.
    fn defer(&self, id: JobId) -> bool {
        match self.job(id).dependency() {
            Some(dependency) => self.job(dependency).try_add_dependent(dependency, id),
            None => false,
        }
    }

    pub(crate) fn schedule(&self, queue: usize, prepared: PreparedJobHandle) -> JobHandle {
        let id = prepared.id;
        // Once deferred the job may already be running elsewhere.
        if !self.defer(id) {
            self.publish(queue, id);
        }
        JobHandle::new(id)
    }

    /// Publishes every job that has no pending dependency with a single
    /// `bottom` update. Returns how many were pushed immediately.
    pub(crate) fn schedule_batch(
        &self,
        queue: usize,
        jobs: impl IntoIterator<Item = PreparedJobHandle>,
    ) -> usize {
        self.queues[queue].push_batch(
            jobs.into_iter()
                .map(|prepared| prepared.id)
                .filter(|&id| !self.defer(id)),
        )
    }

    pub(crate) fn pop(&self, queue: usize) -> Option<JobId> {
        let job = self.queues[queue].pop();
        if job.is_some() {
            record!(self, local_pops);
        }
        job
    }

    /// Attempts one steal from the next victim in round-robin order.
    pub(crate) fn steal(&self, queue: usize) -> Option<JobId> {
        let count = self.queues.len();
        let mut victim = self.steal_cursor.fetch_add(1, Ordering::Relaxed) % count;
        if victim == queue {
            victim = (victim + 1) % count;
        }
        match self.queues[victim].steal() {
            Steal::Success(id) => {
                record!(self, steals);
                Some(id)
            }
            // A lost race is the same as an empty victim.
            Steal::Empty | Steal::Retry => {
                record!(self, steal_misses);
                None
            }
        }
    }

    pub(crate) fn find_job(&self, queue: usize) -> Option<JobId> {
        self.pop(queue).or_else(|| self.steal(queue))
    }

    pub(crate) fn name_of(&self, id: JobId) -> Option<&'static str> {
        self.job(id).name()
    }

    pub(crate) fn is_shutdown(&self, id: JobId) -> bool {
        // SAFETY: only called on jobs the caller has just claimed.
        unsafe { self.job(id).is_shutdown() }
    }

    /// Runs a claimed job on the caller's thread, then finishes it.
    pub(crate) fn execute(&self, queue: usize, id: JobId) {
        let job = self.job(id);
        tracing::trace!(job = ?id, name = job.name(), queue, "executing job");

        let ctx = JobContext::new(self, queue, id);
        // SAFETY: the job was claimed from a queue, so this thread owns it.
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { job.run(&ctx) }));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            tracing::error!(job = ?id, name = job.name(), "job panicked: {message}");
        }

        record!(self, jobs_executed);
        self.finish(queue, id);
    }

    /// Drops one pending reference on `id` and propagates completion.
    pub(crate) fn finish(&self, queue: usize, id: JobId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let job = self.job(id);
            // Read before the decrement: the slot may be recycled after it.
            let parent = job.parent();
            let previous = job.decrement();
            debug_assert!(previous > 0, "job {id:?} finished more than once");
            if previous != 1 {
                return;
            }
            job.release_dependents(|next| {
                record!(self, continuations_released);
                self.publish(queue, next);
            });
            current = parent;
        }
    }

    pub(crate) fn is_done(&self, id: JobId) -> bool {
        self.job(id).is_done(id)
    }

    /// Waits for `id` by running other jobs on the caller's thread.
    pub(crate) fn complete(&self, queue: usize, id: JobId) {
        // Terminal jobs picked up while helping belong to the worker loop.
        let mut set_aside = Vec::new();
        while !self.is_done(id) {
            match self.find_job(queue) {
                Some(job) if self.is_shutdown(job) => set_aside.push(job),
                Some(job) => self.execute(queue, job),
                None => {
                    record!(self, idle_yields);
                    thread::yield_now();
                }
            }
        }
        for job in set_aside {
            self.publish(queue, job);
        }
    }
}

/// Bookkeeping options for a job being prepared.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct JobOptions {
    pub parent: Option<JobId>,
    pub dependency: Option<JobId>,
    pub name: Option<&'static str>,
}

/// The calling thread's view of a scheduler: the core plus the index of the
/// queue it owns.
#[doc(hidden)]
#[derive(Clone, Copy)]
pub struct LocalQueue<'a> {
    pub(crate) core: &'a Scheduler,
    pub(crate) queue: usize,
}

/// Job submission and waiting, shared by [`JobSystem`](crate::JobSystem)
/// (from the thread that built it) and [`JobContext`] (inside a job).
///
/// Closures are stored inline in the job slot. A closure larger than
/// [`JOB_PAYLOAD_SIZE`](crate::JOB_PAYLOAD_SIZE) bytes is rejected with a
/// panic when the job is prepared.
pub trait JobScheduler {
    #[doc(hidden)]
    fn local(&self) -> LocalQueue<'_>;

    /// Starts building a job running `work`.
    fn job<F>(&self, work: F) -> JobBuilder<'_, F>
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        JobBuilder {
            local: self.local(),
            work,
            options: JobOptions::default(),
        }
    }

    /// Allocates a job without publishing it.
    fn prepare_job<F>(&self, work: F) -> PreparedJobHandle
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.job(work).prepare()
    }

    /// Allocates a job with no work function, typically an umbrella parent.
    fn prepare_empty_job(&self) -> PreparedJobHandle {
        let local = self.local();
        PreparedJobHandle::new(local.core.prepare_empty(local.queue, JobOptions::default()))
    }

    /// Allocates a child of `parent`. `parent` is not done until this job is.
    fn prepare_child_job<F>(&self, parent: impl Into<JobHandle>, work: F) -> PreparedJobHandle
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.job(work).parent(parent).prepare()
    }

    /// Allocates a job that is published only once `dependency` is done.
    fn prepare_job_after<F>(&self, dependency: impl Into<JobHandle>, work: F) -> PreparedJobHandle
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.job(work).after(dependency).prepare()
    }

    /// Publishes a prepared job, or chains it behind its dependency.
    fn schedule(&self, prepared: PreparedJobHandle) -> JobHandle {
        let local = self.local();
        local.core.schedule(local.queue, prepared)
    }

    fn schedule_job<F>(&self, work: F) -> JobHandle
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.job(work).schedule()
    }

    fn schedule_child_job<F>(&self, parent: impl Into<JobHandle>, work: F) -> JobHandle
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.job(work).parent(parent).schedule()
    }

    fn schedule_job_after<F>(&self, dependency: impl Into<JobHandle>, work: F) -> JobHandle
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        self.job(work).after(dependency).schedule()
    }

    /// Publishes many prepared jobs with one update of the local queue.
    ///
    /// Jobs with an unfinished dependency are chained as usual. Returns the
    /// number of jobs pushed immediately.
    fn schedule_batch(&self, jobs: impl IntoIterator<Item = PreparedJobHandle>) -> usize {
        let local = self.local();
        local.core.schedule_batch(local.queue, jobs)
    }

    /// True once the job and all of its children have finished.
    fn is_done(&self, handle: &JobHandle) -> bool {
        self.local().core.is_done(handle.id)
    }

    /// Waits for `handle`, executing other jobs on this thread meanwhile.
    fn complete(&self, handle: &JobHandle) {
        let local = self.local();
        local.core.complete(local.queue, handle.id)
    }

    /// Runs `body` over `0..len` in chunks of at most `batch` indices.
    ///
    /// See [`parallel_for`](crate::parallel::parallel_for).
    fn parallel_for<F>(&self, len: usize, batch: usize, body: F) -> JobHandle
    where
        F: Fn(Range<usize>) + Send + Sync + 'static,
    {
        crate::parallel::parallel_for(self.local(), len, batch, body)
    }
}

/// Builder for a job with an optional name, parent and dependency.
#[must_use = "a job builder does nothing until prepared or scheduled"]
pub struct JobBuilder<'a, F> {
    local: LocalQueue<'a>,
    work: F,
    options: JobOptions,
}

impl<'a, F> JobBuilder<'a, F>
where
    F: FnOnce(&JobContext<'_>) + Send + 'static,
{
    /// Label reported in traces and panic logs.
    pub fn name(mut self, name: &'static str) -> Self {
        self.options.name = Some(name);
        self
    }

    pub fn parent(mut self, parent: impl Into<JobHandle>) -> Self {
        self.options.parent = Some(parent.into().id);
        self
    }

    /// Runs this job only after `dependency` and all its children are done.
    pub fn after(mut self, dependency: impl Into<JobHandle>) -> Self {
        self.options.dependency = Some(dependency.into().id);
        self
    }

    pub fn prepare(self) -> PreparedJobHandle {
        let LocalQueue { core, queue } = self.local;
        PreparedJobHandle::new(core.prepare_work(queue, self.options, self.work))
    }

    pub fn schedule(self) -> JobHandle {
        let LocalQueue { core, queue } = self.local;
        let prepared = self.prepare();
        core.schedule(queue, prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    // A scheduler driven entirely from the test thread, which owns queue 0.
    fn local(core: &Scheduler) -> LocalQueue<'_> {
        LocalQueue { core, queue: 0 }
    }

    struct Single(Scheduler);

    impl JobScheduler for Single {
        fn local(&self) -> LocalQueue<'_> {
            local(&self.0)
        }
    }

    fn single() -> Single {
        Single(Scheduler::new(2, 64, 64))
    }

    #[test]
    fn test_complete_runs_jobs_inline() {
        let s = single();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = s.schedule_job(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!s.is_done(&handle));
        s.complete(&handle);
        assert!(s.is_done(&handle));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parent_waits_for_children() {
        let s = single();
        let root = s.prepare_empty_job();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = hits.clone();
            s.schedule_child_job(&root, move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        let root = s.schedule(root);

        // Pop order is LIFO: the root runs first but cannot finish yet.
        let first = s.0.pop(0).unwrap();
        s.0.execute(0, first);
        assert_eq!(first, root.id);
        assert!(!s.is_done(&root));

        s.complete(&root);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_continuation_is_held_until_dependency_finishes() {
        let s = single();
        let a = s.prepare_job(|_| {});
        let b = s.prepare_job_after(&a, |_| {});
        let b_handle = s.schedule(b);

        // Only `b` exists and it is parked on `a`.
        assert!(s.0.queues[0].is_empty());

        let a = s.schedule(a);
        s.complete(&a);
        assert!(!s.0.queues[0].is_empty());
        s.complete(&b_handle);
    }

    #[test]
    fn test_dependency_already_done_publishes_immediately() {
        let s = single();
        let a = s.schedule_job(|_| {});
        s.complete(&a);
        let b = s.schedule_job_after(a, |_| {});
        assert_eq!(s.0.queues[0].len(), 1);
        s.complete(&b);
    }

    #[test]
    fn test_batch_skips_deferred_jobs() {
        let s = single();
        let gate = s.prepare_empty_job();
        let jobs = vec![
            s.prepare_job(|_| {}),
            s.prepare_job_after(&gate, |_| {}),
            s.prepare_job(|_| {}),
        ];
        assert_eq!(s.schedule_batch(jobs), 2);
        let gate = s.schedule(gate);
        s.complete(&gate);
        // The deferred job was released into the queue when the gate finished.
        while let Some(id) = s.0.find_job(0) {
            s.0.execute(0, id);
        }
        assert!(s.0.queues[0].is_empty());
    }

    #[test]
    fn test_panicking_job_still_finishes() {
        let s = single();
        let handle = s.schedule_job(|_| panic!("job failure"));
        s.complete(&handle);
        assert!(s.is_done(&handle));
    }

    #[test]
    #[should_panic(expected = "already finished")]
    fn test_child_of_finished_parent_is_fatal() {
        let s = single();
        let parent = s.schedule_job(|_| {});
        s.complete(&parent);
        let _ = s.prepare_child_job(parent, |_| {});
    }

    #[test]
    fn test_named_job_runs() {
        let s = single();
        let seen = Arc::new(AtomicBool::new(false));
        let flag = seen.clone();
        let handle = s
            .job(move |ctx| flag.store(ctx.name() == Some("named"), Ordering::SeqCst))
            .name("named")
            .schedule();
        s.complete(&handle);
        assert!(seen.load(Ordering::SeqCst));
    }
}
