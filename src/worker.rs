//! Worker threads and the thread provider they are spawned through.
//!
//! The scheduler never touches the OS directly. Threads come from a
//! [`ThreadFactory`]; [`StdThreadFactory`] is the default and uses
//! `std::thread` plus `core_affinity` for pinning. Tests can plug in their
//! own factory.

use crate::scheduler::Scheduler;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::debug;

/// Description of a worker thread to spawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSpec {
    /// Worker index, starting at 0.
    pub index: usize,
    pub name: String,
    /// Logical core to pin the thread to, if any.
    pub core: Option<usize>,
}

/// A spawned thread that can be joined.
pub trait WorkerThread: Send + Sync {
    fn id(&self) -> ThreadId;

    /// Waits for the thread to exit.
    fn join(self: Box<Self>) -> thread::Result<()>;
}

impl WorkerThread for JoinHandle<()> {
    fn id(&self) -> ThreadId {
        self.thread().id()
    }

    fn join(self: Box<Self>) -> thread::Result<()> {
        JoinHandle::join(*self)
    }
}

/// Source of OS threads for the job system.
pub trait ThreadFactory {
    /// Starts a thread running `entry`.
    fn spawn(
        &self,
        spec: ThreadSpec,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<Box<dyn WorkerThread>>;

    /// Number of logical processors available to the process.
    fn processor_count(&self) -> usize;
}

/// Spawns named `std` threads and pins them to a core when asked to.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdThreadFactory;

impl ThreadFactory for StdThreadFactory {
    fn spawn(
        &self,
        spec: ThreadSpec,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<Box<dyn WorkerThread>> {
        let core = spec.core;
        let handle = thread::Builder::new().name(spec.name).spawn(move || {
            if let Some(core) = core {
                pin_current_thread(core);
            }
            entry();
        })?;
        Ok(Box::new(handle))
    }

    fn processor_count(&self) -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

fn pin_current_thread(core: usize) {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.get(core).copied())
        .is_some_and(core_affinity::set_for_current);
    if !pinned {
        debug!(core, "could not pin worker thread, leaving it to the OS scheduler");
    }
}

/// States of the worker loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerState {
    /// Looking at the local queue.
    Idle,
    /// Local queue was empty; trying one victim.
    Stealing,
    Executing(crate::job::JobId),
    Shutdown,
}

/// Body of a worker thread owning queue `queue`.
///
/// Local pops come first, so a worker only takes a terminal job once its own
/// queue has drained. Without a terminal job, a worker also leaves when a stop
/// was requested and every queue is empty.
pub(crate) fn run(core: Arc<Scheduler>, queue: usize) {
    let span = tracing::debug_span!("worker", queue);
    let _entered = span.enter();
    debug!("worker started");

    let mut executed: u64 = 0;
    let mut state = WorkerState::Idle;
    loop {
        state = match state {
            WorkerState::Idle => match core.pop(queue) {
                Some(job) => WorkerState::Executing(job),
                None => WorkerState::Stealing,
            },
            WorkerState::Stealing => match core.steal(queue) {
                Some(job) => WorkerState::Executing(job),
                None if core.drained_for_stop() => WorkerState::Shutdown,
                None => {
                    thread::yield_now();
                    WorkerState::Idle
                }
            },
            WorkerState::Executing(job) if core.is_shutdown(job) => {
                core.finish(queue, job);
                WorkerState::Shutdown
            }
            WorkerState::Executing(job) => {
                core.execute(queue, job);
                executed += 1;
                WorkerState::Idle
            }
            WorkerState::Shutdown => break,
        };
    }

    debug!(executed, "worker stopped");
}
