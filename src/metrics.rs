#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional scheduler counters, enabled with the `metrics` feature.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs whose work function has run (including ones that panicked).
    pub jobs_executed: AtomicU64,
    /// Successful pops from a thread's own queue.
    pub local_pops: AtomicU64,
    /// Successful steals from another queue.
    pub steals: AtomicU64,
    /// Steal attempts that found the victim empty or lost the race.
    pub steal_misses: AtomicU64,
    /// Continuations published after their dependency finished.
    pub continuations_released: AtomicU64,
    /// Times a waiting thread found no work and yielded.
    pub idle_yields: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_executed: AtomicU64::new(0),
            local_pops: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            steal_misses: AtomicU64::new(0),
            continuations_released: AtomicU64::new(0),
            idle_yields: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            local_pops: self.local_pops.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            steal_misses: self.steal_misses.load(Ordering::Relaxed),
            continuations_released: self.continuations_released.load(Ordering::Relaxed),
            idle_yields: self.idle_yields.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_executed: u64,
    pub local_pops: u64,
    pub steals: u64,
    pub steal_misses: u64,
    pub continuations_released: u64,
    pub idle_yields: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fraction of executed jobs that were obtained by stealing.
    pub fn steal_ratio(&self) -> f64 {
        let claimed = self.local_pops + self.steals;
        if claimed == 0 {
            0.0
        } else {
            self.steals as f64 / claimed as f64
        }
    }
}
