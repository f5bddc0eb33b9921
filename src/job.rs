//! Job slots and their completion bookkeeping.
//!
//! A job is a fixed-size slot in the scheduler's arena. It stores the work
//! closure inline, a back-reference to its parent, an optional dependency
//! recorded at prepare time, a short list of continuations to publish when
//! it finishes, and the atomic pending count used for joins.
//!
//! Slots are never freed. They are recycled by the ring allocator, and each
//! reuse bumps the slot's generation so that a [`JobId`] held past its
//! job's lifetime can be recognised as stale.

use crate::context::JobContext;
use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

/// Inline payload capacity of a job, in bytes.
pub const JOB_PAYLOAD_SIZE: usize = 192;

/// Alignment guaranteed for the inline payload.
pub const JOB_PAYLOAD_ALIGN: usize = 16;

/// Maximum number of jobs that may run after a single job.
pub const MAX_DEPENDENTS: usize = 4;

const SEALED: u32 = 1 << 31;

/// Written into a claimed dependent slot whose registration turned out to
/// target an older generation. Never a valid id: arena indices stay below
/// `u32::MAX`.
const VACANT: u64 = u64::MAX;

/// Address of a job slot: arena index plus the generation it was handed out with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId {
    index: u32,
    generation: u32,
}

impl JobId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        JobId { index, generation }
    }

    /// Index of the slot in the arena.
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the id into a non-zero word. Generations start at 1.
    pub(crate) fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        JobId {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

type Trampoline = unsafe fn(*mut u8, &JobContext<'_>);
type DropFn = unsafe fn(*mut u8);

/// What a job does when it is executed.
#[derive(Clone, Copy)]
pub(crate) enum JobKind {
    /// Synchronization node with no work function.
    Empty,
    /// Closure stored in the payload.
    Work { call: Trampoline, drop: DropFn },
    /// Terminal job: the worker that takes it exits its loop.
    Shutdown,
}

/// Bookkeeping written by the preparing thread before the job is published.
pub(crate) struct JobHeader {
    pub kind: JobKind,
    pub parent: Option<JobId>,
    pub dependency: Option<JobId>,
    pub name: Option<&'static str>,
}

impl Default for JobHeader {
    fn default() -> Self {
        Self::empty()
    }
}

impl JobHeader {
    const fn empty() -> Self {
        JobHeader {
            kind: JobKind::Empty,
            parent: None,
            dependency: None,
            name: None,
        }
    }
}

#[repr(C, align(16))]
struct Payload([MaybeUninit<u8>; JOB_PAYLOAD_SIZE]);

const _: () = assert!(mem::align_of::<Payload>() == JOB_PAYLOAD_ALIGN);

/// One slot of the job arena.
///
/// Only `pending`, `generation` and the dependent list are shared between
/// threads. The header and payload belong to whichever thread currently owns
/// the job: the preparing thread until publication, then the executing one.
#[repr(C, align(64))]
pub(crate) struct Job {
    generation: AtomicU32,
    pending: AtomicI32,
    dependent_state: AtomicU32,
    dependents: [AtomicU64; MAX_DEPENDENTS],
    header: UnsafeCell<JobHeader>,
    payload: UnsafeCell<Payload>,
}

// SAFETY: the UnsafeCell contents are only touched by the job's single owner,
// with ownership transferred through the queues' release/acquire edges.
unsafe impl Sync for Job {}

unsafe fn call_closure<F>(payload: *mut u8, ctx: &JobContext<'_>)
where
    F: FnOnce(&JobContext<'_>) + Send + 'static,
{
    let work = unsafe { ptr::read(payload.cast::<F>()) };
    work(ctx);
}

unsafe fn drop_closure<F>(payload: *mut u8) {
    unsafe { ptr::drop_in_place(payload.cast::<F>()) };
}

/// Panics unless a closure of type `F` fits the inline payload.
pub(crate) fn assert_payload_fits<F>() {
    assert!(
        mem::size_of::<F>() <= JOB_PAYLOAD_SIZE,
        "job payload of {} bytes exceeds the inline capacity of {} bytes",
        mem::size_of::<F>(),
        JOB_PAYLOAD_SIZE
    );
    assert!(
        mem::align_of::<F>() <= JOB_PAYLOAD_ALIGN,
        "job payload alignment {} exceeds the supported alignment of {}",
        mem::align_of::<F>(),
        JOB_PAYLOAD_ALIGN
    );
}

impl Job {
    pub(crate) fn new() -> Self {
        Job {
            generation: AtomicU32::new(0),
            pending: AtomicI32::new(0),
            dependent_state: AtomicU32::new(0),
            dependents: std::array::from_fn(|_| AtomicU64::new(0)),
            header: UnsafeCell::new(JobHeader::empty()),
            payload: UnsafeCell::new(Payload([MaybeUninit::uninit(); JOB_PAYLOAD_SIZE])),
        }
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn pending(&self) -> i32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Hands the slot out again under a new generation with `pending == 1`.
    ///
    /// # Safety
    ///
    /// The caller must own the slot: its previous job has finished and no
    /// other thread will touch the header or payload until publication.
    pub(crate) unsafe fn reset(&self, generation: u32, header: JobHeader) {
        unsafe {
            self.drop_payload();
            *self.header.get() = header;
        }
        // A registrant that sees the fresh dependent state also sees the new
        // generation.
        self.generation.store(generation, Ordering::Release);
        for slot in &self.dependents {
            slot.store(0, Ordering::Relaxed);
        }
        self.dependent_state.store(0, Ordering::Release);
        self.pending.store(1, Ordering::Release);
    }

    /// Moves `work` into the payload.
    ///
    /// # Safety
    ///
    /// Same ownership requirement as [`Job::reset`]. `F` must satisfy
    /// [`assert_payload_fits`].
    pub(crate) unsafe fn store_closure<F>(&self, work: F)
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        unsafe {
            let payload = (*self.payload.get()).0.as_mut_ptr().cast::<F>();
            payload.write(work);
            (*self.header.get()).kind = JobKind::Work {
                call: call_closure::<F>,
                drop: drop_closure::<F>,
            };
        }
    }

    /// Parent recorded at prepare time. Immutable once published.
    pub(crate) fn parent(&self) -> Option<JobId> {
        // SAFETY: field-level read of a value only written before publication.
        unsafe { (*self.header.get()).parent }
    }

    /// Dependency recorded at prepare time. Immutable once published.
    pub(crate) fn dependency(&self) -> Option<JobId> {
        // SAFETY: as for `parent`.
        unsafe { (*self.header.get()).dependency }
    }

    pub(crate) fn name(&self) -> Option<&'static str> {
        // SAFETY: as for `parent`.
        unsafe { (*self.header.get()).name }
    }

    /// # Safety
    ///
    /// The caller must have claimed the job from a queue.
    pub(crate) unsafe fn is_shutdown(&self) -> bool {
        unsafe { matches!((*self.header.get()).kind, JobKind::Shutdown) }
    }

    /// Runs the work closure, if any. The closure is consumed.
    ///
    /// # Safety
    ///
    /// The caller must have claimed the job from a queue.
    pub(crate) unsafe fn run(&self, ctx: &JobContext<'_>) {
        let kind = unsafe { mem::replace(&mut (*self.header.get()).kind, JobKind::Empty) };
        if let JobKind::Work { call, .. } = kind {
            unsafe { call((*self.payload.get()).0.as_mut_ptr().cast(), ctx) };
        }
    }

    unsafe fn drop_payload(&self) {
        let kind = unsafe { mem::replace(&mut (*self.header.get()).kind, JobKind::Empty) };
        if let JobKind::Work { drop, .. } = kind {
            unsafe { drop((*self.payload.get()).0.as_mut_ptr().cast()) };
        }
    }

    /// Registers one more live child. Returns the previous pending count.
    pub(crate) fn add_child(&self) -> i32 {
        self.pending.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrements the pending count. Returns the previous value; exactly one
    /// caller observes `1`.
    pub(crate) fn decrement(&self) -> i32 {
        self.pending.fetch_sub(1, Ordering::AcqRel)
    }

    /// True once the job addressed by `id` has finished or its slot has been
    /// recycled.
    pub(crate) fn is_done(&self, id: JobId) -> bool {
        let pending = self.pending.load(Ordering::Acquire);
        self.generation.load(Ordering::Acquire) != id.generation || pending <= 0
    }

    /// Adds `continuation` to the list published when this job finishes.
    ///
    /// Returns `false` if the job addressed by `id` has already finished, in
    /// which case the caller publishes the continuation itself.
    pub(crate) fn try_add_dependent(&self, id: JobId, continuation: JobId) -> bool {
        let mut state = self.dependent_state.load(Ordering::Acquire);
        loop {
            if state & SEALED != 0 || self.generation.load(Ordering::Acquire) != id.generation {
                return false;
            }
            let count = state as usize;
            assert!(
                count < MAX_DEPENDENTS,
                "job {:?} already has {} dependents",
                id,
                MAX_DEPENDENTS
            );
            match self.dependent_state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // The slot may have been recycled between the check and
                    // the CAS. Give the claimed entry up rather than attach to
                    // the wrong job.
                    if self.generation.load(Ordering::Acquire) != id.generation {
                        self.dependents[count].store(VACANT, Ordering::Release);
                        return false;
                    }
                    self.dependents[count].store(continuation.to_bits(), Ordering::Release);
                    return true;
                }
                Err(current) => state = current,
            }
        }
    }

    /// Seals the dependent list and hands every registered continuation to
    /// `publish`. Called once by the thread that drove `pending` to zero.
    pub(crate) fn release_dependents(&self, mut publish: impl FnMut(JobId)) {
        let state = self.dependent_state.fetch_or(SEALED, Ordering::AcqRel);
        let count = (state & !SEALED) as usize;
        for slot in &self.dependents[..count] {
            // A registrant may sit between its CAS and its store.
            let backoff = crossbeam::utils::Backoff::new();
            let bits = loop {
                let bits = slot.swap(0, Ordering::Acquire);
                if bits != 0 {
                    break bits;
                }
                backoff.snooze();
            };
            if bits != VACANT {
                publish(JobId::from_bits(bits));
            }
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        // Closures that were prepared but never executed.
        unsafe { self.drop_payload() };
    }
}
