use crate::job::{Job, JobHeader, JobId};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A ring-buffer allocator for job slots.
///
/// Each queue owns one ring: a contiguous range of the job arena handed out
/// in round-robin order. Allocation is a counter bump, there is no free.
/// A slot comes back into use once the ring wraps around, so a thread must
/// not have more than `capacity` of its jobs pending at once.
pub struct JobRing {
    base: u32,
    mask: usize,
    cursor: CachePadded<AtomicUsize>,
}

impl JobRing {
    /// Creates a ring covering `base..base + capacity` of the arena.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or `base` does not fit a
    /// 32-bit slot index.
    pub fn new(base: usize, capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "job ring capacity must be a power of two, got {capacity}"
        );
        Self {
            base: u32::try_from(base).expect("job arena exceeds u32 indices"),
            mask: capacity - 1,
            cursor: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Hands out the next slot of the ring, resetting it under a fresh
    /// generation with `header` and a pending count of one.
    ///
    /// Only the thread owning this ring may allocate from it. The cursor is
    /// atomic solely so the ring can live in shared state.
    pub(crate) fn allocate(&self, arena: &[Job], header: JobHeader) -> JobId {
        let count = self.cursor.load(Ordering::Relaxed);
        self.cursor.store(count.wrapping_add(1), Ordering::Relaxed);

        let index = self.base + (count & self.mask) as u32;
        let job = &arena[index as usize];
        debug_assert!(
            job.pending() <= 0,
            "job slot {index} reused while its job is still pending; \
             too many jobs in flight for this thread's ring"
        );

        let generation = match job.generation().wrapping_add(1) {
            0 => 1,
            generation => generation,
        };
        // SAFETY: the previous job in this slot has finished (caller
        // contract) and the slot is not yet visible to any other thread.
        unsafe { job.reset(generation, header) };
        JobId::new(index, generation)
    }

    /// Returns the number of allocations made so far.
    pub fn allocated(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Returns the number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}
