use rabid::{Executor, Join};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

fn trace_init() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .without_time()
        .try_init();
}

#[test]
fn single_injected_task_runs() {
    trace_init();
    let counter = Arc::new(AtomicUsize::new(0));

    let executor = Executor::new(1);
    let count = counter.clone();
    executor.inject(0, move || {
        count.fetch_add(1, Relaxed);
    });
    drop(executor);

    assert_eq!(counter.load(Relaxed), 1);
}

#[test]
fn injection_is_not_a_worker_operation() {
    trace_init();
    assert!(!rabid::available());

    let executor = Executor::new(1);
    let on_worker = Arc::new(AtomicUsize::new(0));
    let join = Arc::new(Join::new(1));

    let (seen, notify) = (on_worker.clone(), join.clone());
    executor.inject(0, move || {
        if rabid::available() && rabid::current() == 0 && rabid::concurrency() == 1 {
            seen.fetch_add(1, Relaxed);
        }
        notify.notify();
    });

    join.wait();
    assert!(!rabid::available());
    assert_eq!(on_worker.load(Relaxed), 1);
}

// Fan out from worker 0 to every worker, with two inline/addressed
// follow-ups per chain and a join notification at the end.
#[test]
fn fan_out_and_follow_up() {
    trace_init();
    let executor = Executor::default();
    let h = executor.concurrency();

    let count = Arc::new(AtomicUsize::new(0));
    let follow = Arc::new(AtomicUsize::new(0));
    let affinity = Arc::new(AtomicUsize::new(0));
    let join = Arc::new(Join::new(h as isize));

    {
        let (count, follow, affinity, join) = (
            count.clone(),
            follow.clone(),
            affinity.clone(),
            join.clone(),
        );
        executor.inject(0, move || {
            for i in 0..h {
                let count = count.clone();
                let follow_inline = follow.clone();
                let follow_routed = follow.clone();
                let affinity = affinity.clone();
                let join = join.clone();
                rabid::spawn(i, move || {
                    if rabid::current() == i {
                        affinity.fetch_add(1, Relaxed);
                    }
                    count.fetch_add(1, Relaxed);
                })
                .then(move |_| {
                    follow_inline.fetch_add(1, Relaxed);
                })
                .then_on((i + 1) % h, move |_| {
                    follow_routed.fetch_add(1, Relaxed);
                })
                .then_on((i + 1) % h, move |_| join.notify());
            }
        });
    }

    join.wait();
    assert_eq!(count.load(Relaxed), h);
    assert_eq!(follow.load(Relaxed), 2 * h);
    // Every spawned body ran on the worker it was addressed to.
    assert_eq!(affinity.load(Relaxed), h);
}

// A deferred task re-runs, function included, on the worker it deferred to;
// its successors fire exactly once.
#[test]
fn defer_moves_the_task() {
    trace_init();
    let executor = Executor::new(2);

    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let fired = Arc::new(AtomicUsize::new(0));
    let join = Arc::new(Join::new(1));

    let future = {
        let (runs, seen) = (runs.clone(), seen.clone());
        executor.inject(0, move || {
            let run = runs.fetch_add(1, Relaxed);
            seen.lock().unwrap().push(rabid::current());
            if run == 0 {
                rabid::defer((rabid::current() + 1) % rabid::concurrency());
            }
        })
    };
    {
        let (fired, join) = (fired.clone(), join.clone());
        future.then(move |_| {
            fired.fetch_add(1, Relaxed);
            join.notify();
        });
    }

    join.wait();
    assert_eq!(runs.load(Relaxed), 2);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(fired.load(Relaxed), 1);
}

// A deferral requested before completing a promise mid-body must survive
// the inline evaluation of the promise's successors.
#[test]
fn defer_survives_inline_successors() {
    trace_init();
    let executor = Executor::new(2);

    let runs = Arc::new(AtomicUsize::new(0));
    let inline = Arc::new(AtomicUsize::new(0));
    let join = Arc::new(Join::new(1));

    let promise = rabid::Promise::new();
    {
        let inline = inline.clone();
        promise.then(move |value: &usize| {
            inline.fetch_add(*value, Relaxed);
        });
    }

    {
        let (runs, join) = (runs.clone(), join.clone());
        let mut promise = Some(promise);
        executor.inject(0, move || {
            let run = runs.fetch_add(1, Relaxed);
            if run == 0 {
                rabid::defer(1);
                if let Some(promise) = promise.take() {
                    // Runs the chained successor inline, on this worker.
                    promise.complete(5);
                }
            } else {
                join.notify();
            }
        });
    }

    join.wait();
    assert_eq!(runs.load(Relaxed), 2);
    assert_eq!(inline.load(Relaxed), 5);
}

// An executor left idle long enough for every worker to park must still
// pick up an injected task promptly.
#[test]
fn wakes_from_sleep() {
    trace_init();
    let executor = Executor::new(2);
    thread::sleep(Duration::from_millis(100));

    let join = Arc::new(Join::new(1));
    let started = Instant::now();
    let notify = join.clone();
    executor.inject(0, move || notify.notify());
    join.wait();

    // Wakeup takes microseconds; the generous bound is for loaded CI boxes.
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "sleeping workers were not woken promptly ({:?})",
        started.elapsed(),
    );
}

#[test]
fn repeated_sleep_wake_cycles() {
    trace_init();
    let executor = Executor::new(1);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let join = Arc::new(Join::new(1));
        let (count, notify) = (counter.clone(), join.clone());
        thread::sleep(Duration::from_millis(10));
        executor.inject(0, move || {
            count.fetch_add(1, Relaxed);
            notify.notify();
        });
        join.wait();
    }

    assert_eq!(counter.load(Relaxed), 10);
}

// The overhead benchmark's inner loop: a job that iterates by deferring to
// its own worker.
#[test]
fn defer_iteration_loop() {
    trace_init();
    let executor = Executor::new(2);
    let concurrency = executor.concurrency();
    let iterations = 1_000_usize;
    let jobs = concurrency * 4;

    let total = Arc::new(AtomicUsize::new(0));
    let join = Arc::new(Join::new(jobs as isize));

    for job in 0..jobs {
        let (total, join) = (total.clone(), join.clone());
        let mut remaining = iterations;
        executor.inject(job % concurrency, move || {
            total.fetch_add(1, Relaxed);
            remaining -= 1;
            if remaining > 0 {
                rabid::defer(rabid::current());
            } else {
                join.notify();
            }
        });
    }

    join.wait();
    assert_eq!(total.load(Relaxed), iterations * jobs);
}

// A job that hops to the next worker by respawning a copy of itself.
#[test]
fn rotating_spawn_loop() {
    trace_init();

    fn hop(remaining: usize, counter: Arc<AtomicUsize>, join: Arc<Join>) {
        counter.fetch_add(1, Relaxed);
        if remaining == 0 {
            join.notify();
            return;
        }
        let next = (rabid::current() + 1) % rabid::concurrency();
        rabid::spawn(next, move || {
            hop(remaining - 1, counter.clone(), join.clone())
        });
    }

    let executor = Executor::new(3);
    let counter = Arc::new(AtomicUsize::new(0));
    let join = Arc::new(Join::new(1));

    let depth = 300;
    let (count, notify) = (counter.clone(), join.clone());
    executor.inject(0, move || hop(depth, count.clone(), notify.clone()));

    join.wait();
    assert_eq!(counter.load(Relaxed), depth + 1);
}

// Chains built outside the runtime complete values produced inside it.
#[test]
fn futures_cross_the_boundary() {
    trace_init();
    let executor = Executor::new(2);

    let result = Arc::new(AtomicUsize::new(0));
    let join = Arc::new(Join::new(1));

    let future = executor.inject(0, || 6_usize);
    let (sink, notify) = (result.clone(), join.clone());
    future
        .then(|value| value * 7)
        .then(move |value| {
            sink.store(*value, Relaxed);
            notify.notify();
        });

    join.wait();
    assert_eq!(result.load(Relaxed), 42);
}

#[test]
fn shutdown_with_work_in_flight_leaks_nothing() {
    trace_init();

    struct CountsDrops(Arc<AtomicUsize>);
    impl Drop for CountsDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Relaxed);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let created = 64_usize;
    {
        let executor = Executor::new(2);
        for i in 0..created {
            let payload = CountsDrops(drops.clone());
            executor.inject(i % 2, move || {
                let _ = &payload;
            });
        }
        // Some of these run, some may be cut off by shutdown; either way
        // every payload must be dropped by the time the executor is gone.
    }
    assert_eq!(drops.load(Relaxed), created);
}
