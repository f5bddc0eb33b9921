use rustjob::{JobScheduler, JobSystem, JobSystemConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    println!("RustJob - Work-Stealing Job System\n");

    let num_threads = 4;
    let job_system = match JobSystem::with_config(JobSystemConfig::with_workers(num_threads)) {
        Ok(job_system) => job_system,
        Err(err) => {
            eprintln!("failed to start job system: {err}");
            std::process::exit(1);
        }
    };
    println!("Initialized job system with {} worker threads\n", num_threads);

    // Example 1: Simple job execution
    println!("Example 1: Simple job execution");
    let handle = job_system.job(|ctx| {
        println!("  Hello from job {:?} on queue {}", ctx.name(), ctx.queue_index());
    })
    .name("hello")
    .schedule();
    job_system.complete(&handle);
    println!("  Job completed\n");

    // Example 2: Parent/child join
    println!("Example 2: Parallel computation under one parent");
    let sum = Arc::new(AtomicUsize::new(0));
    let num_jobs = 100;

    let start = Instant::now();
    let root = job_system.prepare_empty_job();
    for i in 0..num_jobs {
        let sum_clone = sum.clone();
        job_system.schedule_child_job(&root, move |_| {
            // Simulate some work
            let mut _local_sum = 0;
            for j in 0..1000 {
                _local_sum += j;
            }
            sum_clone.fetch_add(i, Ordering::SeqCst);
        });
    }
    let root = job_system.schedule(root);
    job_system.complete(&root);

    let expected_sum: usize = (0..num_jobs).sum();
    println!("  Executed {} jobs in {:?}", num_jobs, start.elapsed());
    println!("  Sum result: {} (expected: {})\n", sum.load(Ordering::SeqCst), expected_sum);

    // Example 3: Dependencies
    println!("Example 3: Frame pipeline with dependencies");
    let input = job_system.schedule_job(|_| println!("  [1] read input"));
    let simulate = job_system.schedule_job_after(input, |ctx| {
        println!("  [2] simulate");
        for i in 0..4 {
            ctx.spawn_child(move |_| println!("      simulate chunk {i}"));
        }
    });
    let render = job_system.schedule_job_after(simulate, |_| println!("  [3] render"));
    job_system.complete(&render);
    println!();

    // Example 4: High-throughput test
    println!("Example 4: High-throughput parallel_for");
    let len = 1_000_000;
    let total = Arc::new(AtomicUsize::new(0));
    let t = total.clone();
    let start = Instant::now();
    let handle = job_system.parallel_for(len, 1024, move |range| {
        t.fetch_add(range.len(), Ordering::Relaxed);
    });
    job_system.complete(&handle);
    let duration = start.elapsed();
    println!("  Processed {} indices in {:?}", total.load(Ordering::SeqCst), duration);
    println!(
        "  Throughput: {:.2} million indices/sec\n",
        len as f64 / duration.as_secs_f64() / 1_000_000.0
    );

    #[cfg(feature = "metrics")]
    println!("Metrics: {:?}\n", job_system.metrics());

    match job_system.shutdown() {
        Ok(()) => println!("Job system shut down successfully"),
        Err(err) => eprintln!("Shutdown failed: {err}"),
    }
}
