//! # RustJob - Work-Stealing Job Scheduler
//!
//! A job system for expressing a frame's work as a graph of small jobs with
//! parent/child joins and "run after" dependencies, executed on a fixed pool
//! of worker threads balanced by work-stealing.
//!
//! ## Architecture
//!
//! - **Jobs**: fixed-size arena slots holding an inline closure, a parent
//!   link, continuations, and an atomic pending count. No per-job heap
//!   allocation.
//! - **Job rings**: each thread hands out slots from its own ring buffer.
//! - **Job queues**: one Chase-Lev deque per thread. The owner works LIFO at
//!   the bottom, thieves take FIFO from the top.
//! - **Handles**: generation-checked ids used to wait on jobs and to wire
//!   dependencies.
//! - **Cooperative wait**: [`JobScheduler::complete`] runs other jobs until
//!   the awaited one is done instead of blocking the thread.
//!
//! ## Example
//!
//! ```no_run
//! use rustjob::{JobScheduler, JobSystem};
//!
//! let job_system = JobSystem::new(4);
//!
//! let load = job_system.schedule_job(|_| println!("load"));
//! let simulate = job_system.schedule_job_after(load, |ctx| {
//!     for i in 0..4 {
//!         ctx.spawn_child(move |_| println!("simulate chunk {i}"));
//!     }
//! });
//!
//! job_system.complete(&simulate);
//! job_system.shutdown().unwrap();
//! ```

pub mod allocator;
pub mod context;
pub mod error;
pub mod handle;
pub mod job;
pub mod job_system;
pub mod metrics;
pub mod parallel;
pub mod queue;
pub mod scheduler;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

impl PinningStrategy {
    /// Logical processor for worker `index`, or `None` when unpinned.
    pub fn core_for(self, index: usize) -> Option<usize> {
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(index),
            PinningStrategy::AvoidSMT => Some(index * 2),
        }
    }
}

pub use context::JobContext;
pub use error::JobSystemError;
pub use handle::{JobHandle, PreparedJobHandle};
pub use job::{JOB_PAYLOAD_ALIGN, JOB_PAYLOAD_SIZE, JobId, MAX_DEPENDENTS};
pub use job_system::{JobSystem, JobSystemConfig};
pub use queue::JobQueue;
pub use scheduler::{JobBuilder, JobScheduler};
pub use worker::{StdThreadFactory, ThreadFactory, ThreadSpec, WorkerThread};
