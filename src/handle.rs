//! Handles to scheduled and prepared jobs.
//!
//! Handles never own the job slot. They are generation-checked ids: once the
//! slot behind a handle is recycled the handle simply reads as done.

use crate::job::JobId;

/// A reference to a published job, used to wait on it or to express
/// dependencies and parent/child relationships.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub(crate) id: JobId,
}

impl JobHandle {
    pub(crate) fn new(id: JobId) -> Self {
        JobHandle { id }
    }

    /// Returns the slot id this handle refers to.
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl From<&JobHandle> for JobHandle {
    fn from(handle: &JobHandle) -> Self {
        *handle
    }
}

/// A job that has been allocated and configured but is not yet visible to
/// any worker.
///
/// Children and continuations may be wired onto it through [`handle`]
/// before it is handed to `schedule`.
///
/// [`handle`]: PreparedJobHandle::handle
#[must_use = "a prepared job does nothing until it is scheduled"]
#[derive(Debug, PartialEq, Eq)]
pub struct PreparedJobHandle {
    pub(crate) id: JobId,
}

impl PreparedJobHandle {
    pub(crate) fn new(id: JobId) -> Self {
        PreparedJobHandle { id }
    }

    /// The handle this job will have once scheduled.
    pub fn handle(&self) -> JobHandle {
        JobHandle::new(self.id)
    }
}

impl From<&PreparedJobHandle> for JobHandle {
    fn from(prepared: &PreparedJobHandle) -> Self {
        prepared.handle()
    }
}
