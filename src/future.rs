//! Promise and future handles over the continuation graph.
//!
//! A [`Promise`] and the [`Future`]s derived from it are owning handles on
//! the same reference-counted task. The promise side publishes the value
//! exactly once; the future side chains successor tasks that consume it.
//! Neither handle blocks: a future has no `get`; results are always
//! consumed by continuations.
//!
//! Where a continuation runs is chosen per successor: [`Future::then`]
//! evaluates it inline on whichever thread publishes the predecessor's
//! value, while [`Future::then_on`] routes it through the interconnect to a
//! chosen worker.

use crate::task::{self, TaskRef};
use core::{fmt, marker::PhantomData};

/// The writing end of a value that does not exist yet.
///
/// Dropping a promise without completing it releases any queued successors
/// unevaluated.
pub struct Promise<T> {
    task: TaskRef,
    _value: PhantomData<fn(T)>,
}

/// A handle on a task's eventual output, used to chain successors.
///
/// Futures are cheap reference-counted handles and may be cloned freely;
/// all clones refer to the same task.
pub struct Future<T> {
    task: TaskRef,
    _value: PhantomData<fn(T)>,
}

// === impl Promise ===

impl<T> Promise<T>
where
    T: Send + Sync + 'static,
{
    /// Returns a new, uncompleted promise.
    pub fn new() -> Self {
        Self {
            task: task::promise_cell::<T>(),
            _value: PhantomData,
        }
    }

    /// Returns a future for this promise's value.
    pub fn future(&self) -> Future<T> {
        Future {
            task: self.task.clone(),
            _value: PhantomData,
        }
    }

    /// Chains `function` to run on this promise's value; shorthand for
    /// [`Promise::future`] followed by [`Future::then`].
    pub fn then<F, R>(&self, function: F) -> Future<R>
    where
        F: FnMut(&T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        self.future().then(function)
    }

    /// Publishes `value`, dispatching every successor chained so far (and
    /// immediately dispatching any chained later).
    ///
    /// Consuming `self` is what makes completion exactly-once.
    pub fn complete(self, value: T) {
        let Self { task, _value } = self;
        task::complete_promise(task, value);
    }
}

impl<T> Default for Promise<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("task", &self.task).finish()
    }
}

// === impl Future ===

impl<T> Future<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(task: TaskRef) -> Self {
        Self {
            task,
            _value: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn task_ref(&self) -> &TaskRef {
        &self.task
    }

    /// Chains `function` to run on this future's value, inline on the
    /// thread that publishes it. Returns a future for `function`'s output.
    pub fn then<F, R>(&self, function: F) -> Future<R>
    where
        F: FnMut(&T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        self.chain(task::continuation::<F, T, R>(function, None))
    }

    /// Chains `function` to run on this future's value on `worker`.
    ///
    /// The continuation travels the interconnect when the value is
    /// published, so the publication must happen on a worker of the same
    /// executor.
    pub fn then_on<F, R>(&self, worker: usize, function: F) -> Future<R>
    where
        F: FnMut(&T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        self.chain(task::continuation::<F, T, R>(function, Some(worker)))
    }

    fn chain<R>(&self, succ: TaskRef) -> Future<R>
    where
        R: Send + Sync + 'static,
    {
        let future = Future {
            task: succ.clone(),
            _value: PhantomData,
        };
        self.task.header().chain(succ);
        future
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future").field("task", &self.task).finish()
    }
}
