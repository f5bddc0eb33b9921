use rustjob::{JobScheduler, JobSystem, JobSystemConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[test]
fn test_ten_thousand_jobs_under_umbrella() {
    let config = JobSystemConfig {
        jobs_per_thread: 16384,
        queue_capacity: 16384,
        ..JobSystemConfig::with_workers(4)
    };
    let job_system = JobSystem::with_config(config).expect("start");
    let counter = Arc::new(AtomicUsize::new(0));

    let umbrella = job_system.prepare_empty_job();
    for _ in 0..10_000 {
        let counter = counter.clone();
        job_system.schedule_child_job(&umbrella, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    let umbrella = job_system.schedule(umbrella);
    job_system.complete(&umbrella);

    assert_eq!(counter.load(Ordering::SeqCst), 10_000);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_parent_done_only_after_children() {
    let job_system = JobSystem::new(2);
    let counter = Arc::new(AtomicUsize::new(0));

    let parent = job_system.prepare_job(|_| {});
    for _ in 0..3 {
        let counter = counter.clone();
        job_system.schedule_child_job(&parent, move |_| {
            std::thread::sleep(Duration::from_millis(2));
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    let parent = job_system.schedule(parent);
    job_system.complete(&parent);

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(job_system.is_done(&parent));
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_dependent_observes_write() {
    let job_system = JobSystem::new(4);

    for _ in 0..100 {
        let cell = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(usize::MAX));

        let writer = cell.clone();
        let a = job_system.schedule_job(move |_| {
            writer.store(1, Ordering::Relaxed);
        });
        let (reader, out) = (cell.clone(), seen.clone());
        let b = job_system.schedule_job_after(a, move |_| {
            out.store(reader.load(Ordering::Relaxed), Ordering::SeqCst);
        });
        job_system.complete(&b);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_stalled_owner_queue_is_drained_by_thieves() {
    let job_system = JobSystem::new(4);
    let executed = Arc::new(AtomicUsize::new(0));
    let timed_out = Arc::new(AtomicBool::new(false));

    let (count, flag) = (executed.clone(), timed_out.clone());
    let owner = job_system.schedule_job(move |ctx| {
        for _ in 0..100 {
            let count = count.clone();
            ctx.schedule_job(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        // Never service the local queue again; the other workers must steal.
        let start = Instant::now();
        while count.load(Ordering::SeqCst) < 100 {
            if start.elapsed() > Duration::from_secs(10) {
                flag.store(true, Ordering::SeqCst);
                return;
            }
            std::thread::yield_now();
        }
    });

    job_system.complete(&owner);
    assert!(!timed_out.load(Ordering::SeqCst), "stalled queue was not drained");
    assert_eq!(executed.load(Ordering::SeqCst), 100);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
#[should_panic(expected = "exceeds the inline capacity")]
fn test_oversized_payload_is_rejected() {
    let job_system = JobSystem::new(1);
    let big = [7u8; 256];
    let _ = job_system.prepare_job(move |_| {
        std::hint::black_box(&big);
    });
}
