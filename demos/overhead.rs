//! Measures per-task overhead two ways: respawning a copy of the job on the
//! same worker each iteration, and deferring the same task back to its own
//! worker.
//!
//! Usage: `overhead [iterations] [jobs_multiplier] [concurrency]`

use rabid::{Executor, Join};
use std::{sync::Arc, thread, time::Instant};

fn spawn_copies(iterations: usize, jobs: usize, concurrency: usize) -> std::time::Duration {
    let executor = Executor::new(concurrency);
    let join = Arc::new(Join::new(jobs as isize));

    fn step(remaining: usize, join: Arc<Join>) {
        if remaining > 0 {
            rabid::spawn(rabid::current(), move || {
                step(remaining - 1, join.clone())
            });
        } else {
            join.notify();
        }
    }

    let started = Instant::now();
    for job in 0..jobs {
        let join = join.clone();
        executor.inject(job % concurrency, move || step(iterations, join.clone()));
    }
    join.wait();
    started.elapsed()
}

fn defer_in_place(iterations: usize, jobs: usize, concurrency: usize) -> std::time::Duration {
    let executor = Executor::new(concurrency);
    let join = Arc::new(Join::new(jobs as isize));

    let started = Instant::now();
    for job in 0..jobs {
        let join = join.clone();
        let mut remaining = iterations;
        executor.inject(job % concurrency, move || {
            if remaining > 0 {
                remaining -= 1;
                rabid::defer(rabid::current());
            } else {
                join.notify();
            }
        });
    }
    join.wait();
    started.elapsed()
}

fn main() {
    let mut args = std::env::args().skip(1);
    let mut arg = move || args.next().and_then(|arg| arg.parse::<usize>().ok());

    let iterations = arg().unwrap_or(10_000);
    let jobs_multiplier = arg();
    let concurrency = arg()
        .unwrap_or_else(|| thread::available_parallelism().map(usize::from).unwrap_or(1));
    let jobs = concurrency * jobs_multiplier.unwrap_or(concurrency * concurrency);

    let copied = spawn_copies(iterations, jobs, concurrency);
    println!("spawn copies: {} usec", copied.as_micros());

    let deferred = defer_in_place(iterations, jobs, concurrency);
    println!("defer in place: {} usec", deferred.as_micros());
}
