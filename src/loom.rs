//! Re-exports either `loom`'s checked concurrency primitives or the std/core
//! equivalents, depending on whether we are building with `--cfg loom`.

#[cfg(loom)]
pub(crate) use self::loom_impl::*;

#[cfg(not(loom))]
pub(crate) use self::std_impl::*;

#[cfg(loom)]
mod loom_impl {
    pub(crate) use loom::{cell, sync};

    #[cfg(test)]
    pub(crate) use loom::{model, thread};
}

#[cfg(not(loom))]
mod std_impl {
    pub(crate) mod sync {
        pub(crate) use std::sync::{Condvar, Mutex};

        pub(crate) mod atomic {
            pub(crate) use core::sync::atomic::*;
        }
    }

    #[cfg(test)]
    pub(crate) use std::thread;

    pub(crate) mod cell {
        /// A mirror of `loom::cell::UnsafeCell`, so that code under test can
        /// use the closure-based access API unconditionally.
        #[derive(Debug)]
        pub(crate) struct UnsafeCell<T>(core::cell::UnsafeCell<T>);

        impl<T> UnsafeCell<T> {
            pub(crate) fn new(data: T) -> Self {
                Self(core::cell::UnsafeCell::new(data))
            }

            #[inline(always)]
            pub(crate) fn with<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*const T) -> R,
            {
                f(self.0.get())
            }

            #[inline(always)]
            pub(crate) fn with_mut<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*mut T) -> R,
            {
                f(self.0.get())
            }
        }
    }

    /// Runs `f` once, the way `loom::model` would run it under exhaustive
    /// interleaving when `--cfg loom` is set.
    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        let filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy();
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(filter)
            .without_time()
            .try_init();
        f()
    }
}
