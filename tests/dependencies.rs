use rustjob::{JobContext, JobScheduler, JobSystem, MAX_DEPENDENTS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared sequence used to order events across threads.
#[derive(Default)]
struct Stamps {
    clock: AtomicUsize,
    violations: AtomicUsize,
}

impl Stamps {
    fn tick(&self) -> usize {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[test]
fn test_dependency_starts_after_dependency_and_children_finish() {
    let job_system = JobSystem::new(4);
    let stamps = Arc::new(Stamps::default());

    for _ in 0..50 {
        let finished = Arc::new(AtomicUsize::new(0));
        let children_done = Arc::new(AtomicUsize::new(0));

        let (s, f, c) = (stamps.clone(), finished.clone(), children_done.clone());
        let a = job_system.schedule_job(move |ctx| {
            for _ in 0..3 {
                let (s, f, c) = (s.clone(), f.clone(), c.clone());
                ctx.spawn_child(move |_| {
                    std::thread::sleep(Duration::from_micros(200));
                    c.fetch_add(1, Ordering::SeqCst);
                    f.fetch_max(s.tick(), Ordering::SeqCst);
                });
            }
            f.fetch_max(s.tick(), Ordering::SeqCst);
        });

        let (s, f, c) = (stamps.clone(), finished.clone(), children_done.clone());
        let b = job_system.schedule_job_after(a, move |_| {
            let started = s.tick();
            if c.load(Ordering::SeqCst) != 3 || f.load(Ordering::SeqCst) >= started {
                s.violations.fetch_add(1, Ordering::SeqCst);
            }
        });
        job_system.complete(&b);
    }

    assert_eq!(stamps.violations.load(Ordering::SeqCst), 0);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_several_continuations_on_one_job() {
    let job_system = JobSystem::new(3);
    let release = Arc::new(AtomicBool::new(false));
    let ran = Arc::new(AtomicUsize::new(0));

    let gate = release.clone();
    let a = job_system.schedule_job(move |_| {
        while !gate.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
    });

    let after: Vec<_> = (0..MAX_DEPENDENTS)
        .map(|_| {
            let ran = ran.clone();
            job_system.schedule_job_after(a, move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    release.store(true, Ordering::SeqCst);
    for handle in &after {
        job_system.complete(handle);
    }
    assert_eq!(ran.load(Ordering::SeqCst), MAX_DEPENDENTS);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_continuation_can_be_prepared_before_dependency_is_published() {
    let job_system = JobSystem::new(2);
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let l = log.clone();
    let first = job_system.job(move |_| l.lock().unwrap().push("first")).name("first").prepare();
    let l = log.clone();
    let second = job_system
        .job(move |ctx: &JobContext<'_>| l.lock().unwrap().push(ctx.name().unwrap_or("?")))
        .name("second")
        .after(&first)
        .schedule();

    job_system.schedule(first);
    job_system.complete(&second);

    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_dependency_inside_job() {
    let job_system = JobSystem::new(2);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let o = order.clone();
    let root = job_system.schedule_job(move |ctx| {
        let o1 = o.clone();
        let load = ctx.schedule_job(move |_| o1.lock().unwrap().push(1));
        let o2 = o.clone();
        let simulate = ctx.schedule_job_after(load, move |_| o2.lock().unwrap().push(2));
        ctx.complete(&simulate);
        o.lock().unwrap().push(3);
    });
    job_system.complete(&root);

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    job_system.shutdown().expect("Shutdown failed");
}
