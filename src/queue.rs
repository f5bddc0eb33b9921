//! Fixed-capacity work-stealing deque (Chase-Lev).
//!
//! The owning thread pushes and pops at `bottom` (LIFO, depth-first), any
//! thread steals at `top` (FIFO, oldest and coarsest work first). The only
//! contended word is `top`, claimed by compare-and-exchange.
//!
//! Capacity never grows. Pushing onto a full queue is a fatal assertion.

use crate::job::JobId;
use crossbeam::deque::Steal;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering, fence};

pub struct JobQueue {
    top: CachePadded<AtomicIsize>,
    bottom: CachePadded<AtomicIsize>,
    slots: Box<[AtomicU64]>,
    mask: usize,
}

impl JobQueue {
    /// Creates an empty queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "queue capacity must be a power of two, got {capacity}"
        );
        JobQueue {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            mask: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, index: isize) -> &AtomicU64 {
        &self.slots[index as usize & self.mask]
    }

    #[inline]
    fn write(&self, bottom: isize, top: isize, job: JobId) {
        assert!(
            ((bottom - top) as usize) < self.slots.len(),
            "job queue overflow: capacity is {}",
            self.slots.len()
        );
        self.slot(bottom).store(job.to_bits(), Ordering::Relaxed);
    }

    /// Pushes a job at the bottom. Owner only.
    pub fn push(&self, job: JobId) {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        self.write(bottom, top, job);
        // The slot write must be visible before the new bottom.
        fence(Ordering::Release);
        self.bottom.store(bottom + 1, Ordering::Relaxed);
    }

    /// Pushes every job from `jobs` and publishes `bottom` once. Owner only.
    ///
    /// Stealers see none of the batch until the whole batch is written.
    /// Returns the number of jobs pushed.
    pub fn push_batch(&self, jobs: impl IntoIterator<Item = JobId>) -> usize {
        let start = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        let mut bottom = start;
        for job in jobs {
            self.write(bottom, top, job);
            bottom += 1;
        }
        if bottom != start {
            fence(Ordering::Release);
            self.bottom.store(bottom, Ordering::Relaxed);
        }
        (bottom - start) as usize
    }

    /// Pops the most recently pushed job. Owner only.
    ///
    /// Returns `None` when the queue is empty or a stealer won the race for
    /// the last job.
    pub fn pop(&self) -> Option<JobId> {
        let bottom = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(bottom, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let top = self.top.load(Ordering::Relaxed);

        if top > bottom {
            self.bottom.store(top, Ordering::Relaxed);
            return None;
        }

        let job = JobId::from_bits(self.slot(bottom).load(Ordering::Relaxed));
        if top < bottom {
            return Some(job);
        }

        // Last element: race the stealers for it.
        let won = self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(top + 1, Ordering::Relaxed);
        won.then_some(job)
    }

    /// Steals the oldest job. Any thread.
    ///
    /// `Steal::Retry` means another thread claimed the slot first; callers
    /// treat it the same as `Steal::Empty`.
    pub fn steal(&self) -> Steal<JobId> {
        let top = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);

        if top >= bottom {
            return Steal::Empty;
        }

        let job = JobId::from_bits(self.slot(top).load(Ordering::Relaxed));
        match self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => Steal::Success(job),
            Err(_) => Steal::Retry,
        }
    }

    /// Number of queued jobs. Advisory only under concurrency.
    pub fn len(&self) -> usize {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        (bottom - top).max(0) as usize
    }

    /// Advisory only under concurrency.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
