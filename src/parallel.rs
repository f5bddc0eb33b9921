//! Data-parallel loops built on child jobs.

use crate::handle::{JobHandle, PreparedJobHandle};
use crate::scheduler::{JobOptions, LocalQueue};
use std::ops::Range;
use std::sync::Arc;

/// Splits `0..len` into chunks of at most `batch` indices and runs `body`
/// on each chunk as a child of one umbrella job.
///
/// The chunks are published as a single batch. The returned handle is done
/// once every chunk has run. `body` is shared between chunks through one
/// `Arc`, so only the chunk range is stored per job.
///
/// Every chunk takes a slot from the calling thread's ring, so
/// `len / batch` must stay below the ring capacity.
pub(crate) fn parallel_for<F>(local: LocalQueue<'_>, len: usize, batch: usize, body: F) -> JobHandle
where
    F: Fn(Range<usize>) + Send + Sync + 'static,
{
    let LocalQueue { core, queue } = local;
    let batch = batch.max(1);
    let root = core.prepare_empty(
        queue,
        JobOptions {
            name: Some("parallel_for"),
            ..JobOptions::default()
        },
    );

    let body = Arc::new(body);
    let chunks = (0..len).step_by(batch).map(|start| {
        let range = start..start.saturating_add(batch).min(len);
        let body = Arc::clone(&body);
        let options = JobOptions {
            parent: Some(root),
            name: Some("parallel_for_chunk"),
            ..JobOptions::default()
        };
        PreparedJobHandle::new(core.prepare_work(queue, options, move |_| body(range)))
    });
    core.schedule_batch(queue, chunks);

    core.schedule(queue, PreparedJobHandle::new(root))
}
