//! Rabid
//!
//! Rabid is a user-space concurrency runtime for throughput-oriented,
//! in-memory workloads. It pins one worker per hardware thread and expresses
//! mutual exclusion as *thread affinity*: data is owned by a worker, and work
//! migrates to the data rather than the reverse.
//!
//! The unit of work is a small reference-counted *task* carrying a function,
//! an optional captured argument, a result cell, and a list of successor
//! tasks. Tasks flow between workers over a precomputed N×N mesh of
//! single-producer, single-consumer lock-free buffers; a sleeping worker is
//! woken by the first producer that consumes the wakeup sentinel it parked in
//! its inbound buffers, so the hot path never enters the kernel.
//!
//! # Using the runtime
//!
//! Construct an [`Executor`], hand it work with [`Executor::inject`], and
//! continue from inside tasks with [`spawn`], [`Future::then`],
//! [`Future::then_on`], or [`defer`]:
//!
//! ```
//! use std::sync::Arc;
//!
//! let executor = rabid::Executor::new(2);
//! let done = Arc::new(rabid::Join::new(1));
//!
//! let join = done.clone();
//! executor.inject(0, move || {
//!     // runs on worker 0; compute on worker 1, then continue back here.
//!     let join = join.clone();
//!     rabid::spawn(1, || 21)
//!         .then_on(0, move |half| {
//!             assert_eq!(half * 2, 42);
//!             join.notify();
//!         });
//! });
//!
//! done.wait();
//! ```
//!
//! # Out-of-runtime futures
//!
//! [`Promise`] and [`Future`] also work standalone: successors chained onto an
//! unaddressed task evaluate inline on whichever thread publishes the value.
//!
//! ```
//! let promise = rabid::Promise::new();
//! let doubled = promise.then(|value: &i32| value * 2);
//! doubled.then(|value| assert_eq!(*value, 84));
//! promise.complete(42);
//! ```

#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

#[cfg(not(test))]
macro_rules! test_dbg {
    ($x:expr) => {
        $x
    };
}

#[cfg(test)]
macro_rules! test_dbg {
    ($x:expr) => {
        match $x {
            x => {
                const EXPR: &str = stringify!($x);
                tracing::event!(tracing::Level::DEBUG, { EXPR } = ?format_args!("{x:#?}"));
                x
            }
        }
    };
}

#[cfg(not(test))]
macro_rules! test_println {
    ($($arg:tt)*) => {};
}

#[cfg(test)]
macro_rules! test_println {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*);
    };
}

mod executor;
mod future;
mod idle;
mod interconnect;
pub(crate) mod loom;
mod tagged;
mod task;
pub(crate) mod typeinfo;

pub use executor::{available, concurrency, current, defer, spawn, Executor};
pub use future::{Future, Promise};
pub use idle::{Idle, Join, SignalIdle};
