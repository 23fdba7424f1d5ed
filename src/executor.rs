//! The executor: workers, their event loops, and the thread model.
//!
//! There is no central scheduler. Each worker owns one mesh node and loops:
//! drain every inbound buffer round-robin, evaluate what was drained, and,
//! after two consecutive empty passes, park in its idle strategy. Before
//! parking it leaves a [`Tag::Reverse`] sentinel in every inbound buffer;
//! the first producer that publishes into one of those buffers consumes the
//! sentinel in the same atomic step and runs it, interrupting the idle
//! strategy. Wakeup therefore costs one cross-core cache-line transfer and
//! no kernel calls on the hot path.
//!
//! All runtime state lives in the [`Executor`] value. The only thread-local
//! is a pointer shadowing the current worker's context while its loop runs;
//! [`spawn`], [`defer`], [`current`], [`concurrency`], and [`available`]
//! read it.

use crate::{
    future::Future,
    idle::{Idle, SignalIdle},
    interconnect::{Connection, Direct, Node},
    tagged::{Tag, TaggedPtr},
    task::{self, Header, TaskRef},
};
use core::{fmt, ptr::NonNull};
use std::{
    cell::{Cell, RefCell},
    sync::Arc,
    thread,
};

std::thread_local! {
    static CURRENT: Cell<*const Context> = Cell::new(core::ptr::null());
}

/// Per-worker state. Lives on the worker thread's stack for the duration of
/// the event loop; `CURRENT` shadows a pointer to it while the loop runs.
struct Context {
    mesh: Arc<Direct>,
    index: usize,
    idle: Arc<dyn Idle>,
    /// Reverse sentinels reclaimed from drains, reused when re-arming idle
    /// instead of allocating fresh ones.
    sentinels: RefCell<Vec<TaskRef>>,
    /// Destination requested by [`defer`] during the current evaluation.
    deferred: Cell<Option<usize>>,
}

// === impl Context ===

impl Context {
    fn new(mesh: Arc<Direct>, index: usize, idle: Arc<dyn Idle>) -> Self {
        Self {
            mesh,
            index,
            idle,
            sentinels: RefCell::new(Vec::new()),
            deferred: Cell::new(None),
        }
    }

    /// The worker event loop: drain, run, arm idle, sleep, repeat, until
    /// the idle strategy says to exit.
    fn run(&self) {
        let node = self.mesh.node(self.index);
        let mut prepare_idle = false;
        loop {
            let mut processed = 0_usize;
            for connection in node.connections() {
                let sentinel = self.make_sentinel(prepare_idle);
                for msg in connection.receive(sentinel) {
                    match msg.tag() {
                        Tag::Normal => {
                            let task = unsafe { claim(msg) };
                            task.evaluate();
                            processed += 1;
                        }
                        _ => {
                            // One of our own wakeup sentinels came back
                            // unconsumed; keep it for reuse.
                            self.cache_sentinel(unsafe { claim(msg) });
                        }
                    }
                }
            }
            if processed == 0 {
                if prepare_idle {
                    tracing::trace!("sleeping");
                    if !self.idle.wait() {
                        break;
                    }
                    tracing::trace!("woken");
                    prepare_idle = false;
                } else {
                    // First empty pass: arm the sentinels, sleep only if the
                    // next pass is empty too.
                    prepare_idle = true;
                }
            } else {
                tracing::trace!(processed, "drained");
                prepare_idle = false;
            }
        }
        self.shutdown(&node);
    }

    /// The sentinel to leave in an inbound buffer while draining it: null
    /// for a plain drain, a Reverse-tagged interrupt task when arming idle.
    fn make_sentinel(&self, prepare_idle: bool) -> TaggedPtr {
        if !prepare_idle {
            return TaggedPtr::NULL;
        }
        let sentinel = self.sentinels.borrow_mut().pop().unwrap_or_else(|| {
            tracing::trace!("allocating wakeup sentinel");
            task::interrupt_task(self.idle.clone())
        });
        TaggedPtr::new(sentinel.into_raw().as_ptr(), Tag::Reverse)
    }

    fn cache_sentinel(&self, sentinel: TaskRef) {
        let mut cache = self.sentinels.borrow_mut();
        // One per connection covers the deepest arming pass; anything more
        // is released.
        if cache.len() < self.mesh.workers() {
            cache.push(sentinel);
        }
    }

    /// Sends an addressed task out over this worker's node.
    fn send(&self, task: TaskRef) {
        let dest = task
            .header()
            .address()
            .expect("only addressed tasks travel the interconnect");
        assert!(
            dest < self.mesh.workers(),
            "worker {dest} out of range (mesh has {})",
            self.mesh.workers(),
        );
        let msg = TaggedPtr::new(task.into_raw().as_ptr(), Tag::Normal);
        send_with_wake(self.mesh.node(self.index).connection(dest), msg);
    }

    /// Releases whatever is still inbound, plus the sentinel cache. Messages
    /// drained here are dropped, not evaluated; shutdown is cooperative and
    /// anything still in flight was cut off by it.
    fn shutdown(&self, node: &Node<'_>) {
        for connection in node.connections() {
            drop(connection.receive(TaggedPtr::NULL));
        }
        self.sentinels.borrow_mut().clear();
        test_println!("worker {} released residual messages", self.index);
        tracing::debug!("worker exited");
    }
}

/// Claims the reference a drained message carries.
///
/// # Safety
///
/// `msg` must be non-null and own a reference (i.e. come out of a buffer).
unsafe fn claim(msg: TaggedPtr) -> TaskRef {
    TaskRef::from_raw(NonNull::new_unchecked(msg.ptr() as *mut Header))
}

/// Publishes `msg` on `connection`; if a Reverse wakeup sentinel was parked
/// there, consumes it in the same atomic step and then runs it, waking the
/// destination worker.
fn send_with_wake(connection: Connection<'_>, msg: TaggedPtr) {
    let mut wake = TaggedPtr::NULL;
    connection.send(msg, |prior| {
        if prior.tag() == Tag::Reverse {
            wake = prior;
            TaggedPtr::NULL
        } else {
            wake = TaggedPtr::NULL;
            prior
        }
    });
    if !wake.is_null() {
        tracing::trace!("consumed wakeup sentinel");
        unsafe { claim(wake) }.evaluate();
    }
}

fn with_context<R>(f: impl FnOnce(Option<&Context>) -> R) -> R {
    CURRENT.with(|current| {
        let ptr = current.get();
        f(if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        })
    })
}

// === static operations (valid on worker threads) ===

/// Whether the calling thread is a worker of a running [`Executor`].
pub fn available() -> bool {
    with_context(|context| context.is_some())
}

/// The index of the worker bound to the calling thread.
///
/// # Panics
///
/// If the calling thread is not a worker.
pub fn current() -> usize {
    with_context(|context| {
        context
            .expect("rabid::current is only meaningful on a worker thread")
            .index
    })
}

/// The number of workers in the executor the calling thread belongs to.
///
/// # Panics
///
/// If the calling thread is not a worker.
pub fn concurrency() -> usize {
    with_context(|context| {
        context
            .expect("rabid::concurrency is only meaningful on a worker thread")
            .mesh
            .workers()
    })
}

/// Allocates a task running `function` on worker `dest` and sends it,
/// returning a future for its output.
///
/// # Panics
///
/// If the calling thread is not a worker (use [`Executor::inject`] from
/// outside the runtime) or `dest` is out of range.
pub fn spawn<F, R>(dest: usize, function: F) -> Future<R>
where
    F: FnMut() -> R + Send + 'static,
    R: Send + Sync + 'static,
{
    with_context(|context| {
        let context = context
            .expect("rabid::spawn requires a worker thread; use Executor::inject from outside");
        let task = task::thunk(function, Some(dest));
        let future = Future::new(task.clone());
        context.send(task);
        future
    })
}

/// Marks the currently evaluating task to be re-sent to `dest` after its
/// function returns, instead of completing: a moved tail call. The whole
/// task (function included) runs again on `dest`; successors fire once,
/// when a run finishes without deferring.
///
/// Valid at most once per task invocation.
///
/// # Panics
///
/// If the calling thread is not a worker or `dest` is out of range.
pub fn defer(dest: usize) {
    with_context(|context| {
        let context = context.expect("rabid::defer is only meaningful on a worker thread");
        assert!(
            dest < context.mesh.workers(),
            "worker {dest} out of range (mesh has {})",
            context.mesh.workers(),
        );
        let stale = context.deferred.replace(Some(dest));
        debug_assert!(
            stale.is_none(),
            "defer may be called at most once per task invocation",
        );
    });
}

/// Takes the deferral requested during the current evaluation, if any.
pub(crate) fn take_deferred() -> Option<usize> {
    with_context(|context| context.and_then(|context| context.deferred.take()))
}

/// Evaluates `task` inline on the calling thread.
///
/// On a worker, the deferral slot is saved and cleared around the
/// evaluation: a deferral requested by an enclosing task (one that
/// completed a promise mid-body, dispatching this one) must not be consumed
/// by this task's finish.
pub(crate) fn evaluate_now(task: TaskRef) {
    let saved = with_context(|context| context.map(|context| context.deferred.take()));
    task.evaluate();
    if let Some(saved) = saved {
        with_context(|context| {
            if let Some(context) = context {
                context.deferred.set(saved);
            }
        });
    }
}

/// Sends `task` through the calling worker, or hands it back if the calling
/// thread is not a worker.
pub(crate) fn send_from_current(task: TaskRef) -> Result<(), TaskRef> {
    with_context(|context| match context {
        Some(context) => {
            context.send(task);
            Ok(())
        }
        None => Err(task),
    })
}

// === thread model ===

/// One OS thread per worker; owns each thread's idle strategy. Dropping
/// disables every idle strategy and joins every thread.
struct ThreadModel {
    threads: Vec<WorkerThread>,
}

struct WorkerThread {
    idle: Arc<dyn Idle>,
    handle: Option<thread::JoinHandle<()>>,
}

// === impl ThreadModel ===

impl ThreadModel {
    fn new(mesh: &Arc<Direct>, idles: Vec<Arc<dyn Idle>>) -> Self {
        let cores = core_affinity::get_core_ids().unwrap_or_default();
        let threads = idles
            .into_iter()
            .enumerate()
            .map(|(index, idle)| {
                let mesh = mesh.clone();
                let worker_idle = idle.clone();
                let core = cores.get(index).copied();
                let handle = thread::Builder::new()
                    .name(format!("rabid-worker-{index}"))
                    .spawn(move || {
                        if let Some(core) = core {
                            core_affinity::set_for_current(core);
                        }
                        let span = tracing::debug_span!("worker", index);
                        let _entered = span.enter();
                        let context = Context::new(mesh, index, worker_idle);
                        let _reset = CurrentGuard::set(&context);
                        context.run();
                    })
                    .expect("failed to spawn worker thread");
                WorkerThread {
                    idle,
                    handle: Some(handle),
                }
            })
            .collect();
        Self { threads }
    }
}

impl Drop for ThreadModel {
    fn drop(&mut self) {
        for thread in &self.threads {
            thread.idle.enable(false);
        }
        for thread in &mut self.threads {
            if let Some(handle) = thread.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Clears `CURRENT` when the worker's loop unwinds or returns.
struct CurrentGuard;

impl CurrentGuard {
    fn set(context: &Context) -> Self {
        CURRENT.with(|current| current.set(context as *const Context));
        Self
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(core::ptr::null()));
    }
}

// === executor ===

/// The runtime: a mesh of lock-free buffers, one pinned worker thread per
/// mesh node, and the entry points for handing them work.
///
/// Dropping the executor shuts it down cooperatively: every worker is
/// disabled, drains the work that has already reached it, and exits; the
/// drop then joins the worker threads and releases anything still parked in
/// the mesh.
pub struct Executor {
    mesh: Arc<Direct>,
    _execution: ThreadModel,
}

// === impl Executor ===

impl Executor {
    /// Starts an executor with `workers` workers using the default
    /// [`SignalIdle`] strategy.
    ///
    /// # Panics
    ///
    /// If `workers` is zero.
    pub fn new(workers: usize) -> Self {
        Self::with_idle(workers, |_| SignalIdle::new())
    }

    /// Starts an executor whose workers use the idle strategy produced per
    /// worker index by `idle`.
    pub fn with_idle<I>(workers: usize, mut idle: impl FnMut(usize) -> I) -> Self
    where
        I: Idle + 'static,
    {
        let mesh = Arc::new(Direct::new(workers));
        let idles = (0..workers)
            .map(|index| Arc::new(idle(index)) as Arc<dyn Idle>)
            .collect();
        let execution = ThreadModel::new(&mesh, idles);
        tracing::debug!(workers, "executor started");
        Self {
            mesh,
            _execution: execution,
        }
    }

    /// The number of workers.
    pub fn concurrency(&self) -> usize {
        self.mesh.workers()
    }

    /// Allocates a task running `function` on worker `dest` and sends it
    /// from outside the runtime, returning a future for its output.
    ///
    /// The task is published through the destination's own loopback buffer,
    /// so injection is safe from any non-worker thread (and wakes `dest` if
    /// it is asleep).
    ///
    /// # Panics
    ///
    /// If `dest` is out of range.
    pub fn inject<F, R>(&self, dest: usize, function: F) -> Future<R>
    where
        F: FnMut() -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        assert!(
            dest < self.mesh.workers(),
            "worker {dest} out of range (mesh has {})",
            self.mesh.workers(),
        );
        let task = task::thunk(function, Some(dest));
        let future = Future::new(task.clone());
        let msg = TaggedPtr::new(task.into_raw().as_ptr(), Tag::Normal);
        send_with_wake(self.mesh.connection(dest, dest), msg);
        future
    }
}

impl Default for Executor {
    /// Starts an executor with one worker per hardware thread.
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        Self::new(workers)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("mesh", &self.mesh)
            .finish()
    }
}
