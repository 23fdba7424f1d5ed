//! Idle strategies and the `Join` latch.
//!
//! A worker that has seen two consecutive empty passes over its inbound
//! buffers parks itself in its [`Idle`] strategy. The only integration point
//! between the runtime and blocking the OS is this trait: swap in a custom
//! implementation with [`Executor::with_idle`](crate::Executor::with_idle)
//! to spin, to poll an event source, or to do anything else while a worker
//! has no work.

use crate::loom::sync::{Condvar, Mutex};
use core::fmt;

/// How a worker waits when it has no work, and how producers wake it.
pub trait Idle: Send + Sync {
    /// Blocks the calling worker until an interrupt is observed or the
    /// worker is disabled.
    ///
    /// Returns `true` if the worker should keep running, `false` if it
    /// should exit. An interrupt delivered before or during the wait makes
    /// it return `true` even if the worker has been disabled in the
    /// meantime, so a worker always drains the work that woke it before it
    /// shuts down.
    fn wait(&self) -> bool;

    /// Signals the waiter. Called by producers that consumed the worker's
    /// wakeup sentinel; must be callable from any thread and must never
    /// fail. Repeated interrupts coalesce into a single wakeup.
    fn interrupt(&self);

    /// Enables or disables the waiter. Disabling wakes a parked worker;
    /// `wait` is the only place the flag is observed.
    fn enable(&self, enabled: bool);
}

/// The default [`Idle`] strategy: a latched signal over a mutex and condvar.
///
/// `interrupt` latches a flag so that a wakeup delivered while the worker is
/// still draining is consumed by the worker's *next* `wait` instead of being
/// lost; `wait` arms once per call by clearing the latch on return.
pub struct SignalIdle {
    state: Mutex<State>,
    signal: Condvar,
}

#[derive(Debug)]
struct State {
    signaled: bool,
    enabled: bool,
}

// === impl SignalIdle ===

impl SignalIdle {
    /// Returns a new, enabled, unsignaled idle strategy.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                signaled: false,
                enabled: true,
            }),
            signal: Condvar::new(),
        }
    }
}

impl Default for SignalIdle {
    fn default() -> Self {
        Self::new()
    }
}

impl Idle for SignalIdle {
    fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.enabled && !state.signaled {
            state = self.signal.wait(state).unwrap();
        }
        // Consume the latch; a latched signal outranks disablement so that
        // pending work is drained before exit.
        let keep_running = test_dbg!(state.signaled || state.enabled);
        state.signaled = false;
        keep_running
    }

    fn interrupt(&self) {
        let mut state = self.state.lock().unwrap();
        state.signaled = true;
        drop(state);
        self.signal.notify_one();
    }

    fn enable(&self, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        state.enabled = enabled;
        drop(state);
        self.signal.notify_one();
    }
}

impl fmt::Debug for SignalIdle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalIdle")
            .field("state", &self.state)
            .finish()
    }
}

/// A counted latch: [`wait`](Join::wait) blocks until
/// [`notify`](Join::notify) has been called `count` times.
///
/// Fan-out drivers hand a `Join` to their leaf tasks and wait on it from a
/// non-worker thread.
///
/// ```
/// use std::sync::Arc;
///
/// let executor = rabid::Executor::new(2);
/// let join = Arc::new(rabid::Join::new(2));
/// for worker in 0..2 {
///     let join = join.clone();
///     executor.inject(worker, move || join.notify());
/// }
/// join.wait();
/// ```
pub struct Join {
    remaining: Mutex<isize>,
    done: Condvar,
}

// === impl Join ===

impl Join {
    /// Returns a latch that opens after `count` notifications.
    pub fn new(count: isize) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    /// Records one completion, waking waiters when the count is exhausted.
    pub fn notify(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining -= 1;
        if *remaining <= 0 {
            self.done.notify_all();
        }
    }

    /// Blocks until the count is exhausted.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        while *remaining > 0 {
            remaining = self.done.wait(remaining).unwrap();
        }
    }
}

impl fmt::Debug for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join")
            .field("remaining", &self.remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::{self, thread};
    use std::sync::Arc;

    #[test]
    fn interrupt_before_wait_is_latched() {
        loom::model(|| {
            let idle = SignalIdle::new();
            idle.interrupt();
            // The latched signal is consumed without blocking.
            assert!(idle.wait());
        });
    }

    #[test]
    fn repeated_interrupts_coalesce() {
        loom::model(|| {
            let idle = SignalIdle::new();
            idle.interrupt();
            idle.interrupt();
            assert!(idle.wait());
            // Both interrupts were consumed by the single wait; a disabled,
            // unsignaled waiter exits.
            idle.enable(false);
            assert!(!idle.wait());
        });
    }

    #[test]
    fn signal_outranks_disable() {
        loom::model(|| {
            let idle = SignalIdle::new();
            idle.interrupt();
            idle.enable(false);
            // One more pass to drain whatever caused the interrupt...
            assert!(idle.wait());
            // ...then exit.
            assert!(!idle.wait());
        });
    }

    #[test]
    fn cross_thread_wakeup() {
        loom::model(|| {
            let idle = Arc::new(SignalIdle::new());
            let waker = {
                let idle = idle.clone();
                thread::spawn(move || idle.interrupt())
            };
            assert!(idle.wait());
            waker.join().unwrap();
        });
    }

    #[test]
    fn join_counts_down() {
        loom::model(|| {
            let join = Arc::new(Join::new(2));
            let notifiers: Vec<_> = (0..2)
                .map(|_| {
                    let join = join.clone();
                    thread::spawn(move || join.notify())
                })
                .collect();
            join.wait();
            for notifier in notifiers {
                notifier.join().unwrap();
            }
        });
    }

    #[test]
    fn join_of_zero_is_open() {
        loom::model(|| {
            Join::new(0).wait();
        });
    }
}
