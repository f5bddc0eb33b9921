//! Error types surfaced by job system construction and teardown.
//!
//! The scheduling hot path never returns errors: capacity violations are
//! assertions and lost steal races are reported as "no job".

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobSystemError {
    /// A configuration value was rejected before any thread was spawned.
    #[error("invalid job system config `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The thread factory failed to start a worker.
    #[error("failed to spawn worker {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },

    /// One or more workers panicked outside of a job.
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked { count: usize },
}

pub type Result<T, E = JobSystemError> = std::result::Result<T, E>;
