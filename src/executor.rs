//! Fixed-size worker pool executor.
//!
//! Workers are OS threads, started eagerly at construction and named
//! `{pool}-worker-{i}`. Producers enqueue into the multi-lane task queue and
//! release one gate permit per task; workers consume permits, sweep the
//! lanes (their own lane first, then stealing), and run what they find,
//! up to `batch` tasks per permit before revisiting the gate.
//!
//! # Shutdown state machine
//!
//! ```text
//!         shutdown()           shutdown_now()
//! Running ───────────▶ Shutdown ──────────▶ Stop
//!    │                                        ▲
//!    └──────────── shutdown_now() ────────────┘
//! ```
//!
//! Transitions are monotonic CAS, lower to higher only; repeated calls are
//! no-ops. `Shutdown` rejects new submissions but lets queued tasks drain;
//! `Stop` rejects submissions and discards queued tasks, returning them to
//! the caller. The wake-up that pulls parked workers out of the gate during
//! shutdown is internal control flow — it is never surfaced as an error.
//!
//! # Fault policy
//!
//! A worker catches every unwind out of a task, wraps it in a
//! [`Fault`], and forwards it to the injected error handler; the worker
//! then continues with the next task.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::{ExecutorConfig, StdThreadFactory, ThreadFactory};
use crate::error::{ConfigError, ExecuteError, Fault};
use crate::queue::multilane::MultiLaneQueue;
use crate::sync::gate::ParkGate;
use crate::sync::latch::CountDownLatch;

/// A unit of work accepted by the executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handler invoked with faults caught in worker threads.
pub type FaultHandler = Arc<dyn Fn(Fault) + Send + Sync>;

/// Handler invoked with tasks rejected after shutdown. Receives the task
/// itself so it can be requeued elsewhere.
pub type RejectHandler = Arc<dyn Fn(Task) + Send + Sync>;

const RUNNING: u32 = 0;
const SHUTDOWN: u32 = 1;
const STOP: u32 = 2;

/// Identity source for pools, used by the worker-thread marker below.
static POOL_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Set on worker threads so `await_termination` can recognize a call
    /// from inside the pool it is waiting on.
    static WORKER_MARK: Cell<Option<WorkerMark>> = const { Cell::new(None) };
}

#[derive(Clone, Copy)]
struct WorkerMark {
    pool: usize,
    /// Whether this worker's termination was already counted (a worker that
    /// calls `await_termination` counts itself down early).
    counted: bool,
}

struct Inner {
    id: usize,
    name: String,
    pool_size: usize,
    batch: usize,
    spin: u32,
    state: AtomicU32,
    queue: MultiLaneQueue<Task>,
    gate: ParkGate,
    terminations: CountDownLatch,
    on_error: FaultHandler,
    on_reject: Option<RejectHandler>,
}

/// Fixed-size worker pool. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.inner.name)
            .field("pool_size", &self.inner.pool_size)
            .field("state", &self.inner.state.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor with `pool_size` workers and default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroPoolSize`] when `pool_size` is zero, or a
    /// spawn error from the thread factory.
    pub fn new(pool_size: usize) -> Result<Self, ConfigError> {
        Self::builder().pool_size(pool_size).build()
    }

    /// Starts building an executor from the default configuration.
    #[must_use]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Submits a task for execution on some worker.
    ///
    /// Per-producer FIFO holds: two tasks submitted from the same thread run
    /// in submission order. Tasks from different threads may interleave.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Rejected`] when the executor is shut down;
    /// the task itself is handed to the injected rejection handler.
    pub fn execute<F>(&self, task: F) -> Result<(), ExecuteError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(task))
    }

    pub(crate) fn submit(&self, task: Task) -> Result<(), ExecuteError> {
        let inner = &*self.inner;
        if inner.state.load(Ordering::Acquire) != RUNNING {
            return Err(self.reject(task));
        }
        inner.queue.push(task);
        inner.gate.release(1);
        Ok(())
    }

    fn reject(&self, task: Task) -> ExecuteError {
        if let Some(handler) = &self.inner.on_reject {
            handler(task);
        }
        ExecuteError::Rejected {
            pool: self.inner.name.clone(),
        }
    }

    /// Initiates an orderly shutdown: no new submissions are accepted, but
    /// queued tasks drain before workers exit. Idempotent.
    pub fn shutdown(&self) {
        if self.advance_state(SHUTDOWN) {
            debug!(pool = %self.inner.name, "shutdown: draining queued tasks");
            self.wake_all_workers();
        }
    }

    /// Stops the pool: no new submissions, queued tasks are discarded and
    /// returned. Parked workers are woken so they can observe the stop; a
    /// task may legally call this from inside the pool.
    ///
    /// The returned tasks preserve per-producer submission order; order
    /// across lanes (producing threads) is unspecified. Repeated calls
    /// return whatever was queued since the previous drain — normally
    /// nothing.
    pub fn shutdown_now(&self) -> Vec<Task> {
        if self.advance_state(STOP) {
            debug!(pool = %self.inner.name, "stop: discarding queued tasks");
            self.wake_all_workers();
        }
        let drained = self.inner.queue.drain();
        if !drained.is_empty() {
            trace!(pool = %self.inner.name, count = drained.len(), "drained pending tasks");
        }
        drained
    }

    /// Advances the state machine to `target`. Returns `false` when the
    /// state was already at or past `target`.
    fn advance_state(&self, target: u32) -> bool {
        let state = &self.inner.state;
        let mut current = state.load(Ordering::Acquire);
        while current < target {
            match state.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// One gate release per worker: the gate wakes at most one waiter per
    /// call, so a single bulk release would leave workers parked.
    fn wake_all_workers(&self) {
        for _ in 0..self.inner.pool_size {
            self.inner.gate.release(1);
        }
    }

    /// True once `shutdown` or `shutdown_now` has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != RUNNING
    }

    /// True once every worker has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminations.count() == 0
    }

    /// Blocks until all workers have exited or `timeout` elapses; returns
    /// `true` iff termination completed in time.
    ///
    /// May be called from inside a task: the calling worker counts its own
    /// termination first so it cannot deadlock waiting on itself.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.count_down_calling_worker();
        self.inner.terminations.wait_timeout(timeout)
    }

    fn count_down_calling_worker(&self) {
        WORKER_MARK.with(|mark| {
            if let Some(m) = mark.get() {
                if m.pool == self.inner.id && !m.counted {
                    mark.set(Some(WorkerMark {
                        counted: true,
                        ..m
                    }));
                    self.inner.terminations.count_down();
                }
            }
        });
    }

    /// Number of worker threads.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

/// Builder injecting the executor's capabilities.
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    thread_factory: Arc<dyn ThreadFactory>,
    on_error: FaultHandler,
    on_reject: Option<RejectHandler>,
}

impl ExecutorBuilder {
    fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            thread_factory: Arc::new(StdThreadFactory),
            on_error: default_fault_handler(),
            on_reject: None,
        }
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = pool_size;
        self
    }

    /// Sets the pool name; workers become `{name}-worker-{i}`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the per-permit worker batch.
    #[must_use]
    pub fn batch(mut self, batch: usize) -> Self {
        self.config.batch = batch;
        self
    }

    /// Sets the pre-park spin count.
    #[must_use]
    pub fn spin(mut self, spin: u32) -> Self {
        self.config.spin = spin;
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects the thread factory used to start workers.
    #[must_use]
    pub fn thread_factory(mut self, factory: impl ThreadFactory) -> Self {
        self.thread_factory = Arc::new(factory);
        self
    }

    /// Injects the handler for faults caught in workers.
    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(Fault) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(handler);
        self
    }

    /// Injects the handler receiving tasks rejected after shutdown.
    #[must_use]
    pub fn on_reject(mut self, handler: impl Fn(Task) + Send + Sync + 'static) -> Self {
        self.on_reject = Some(Arc::new(handler));
        self
    }

    /// Validates the configuration and starts the workers.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when validation fails or a worker thread
    /// cannot be spawned. On a partial spawn failure the already-started
    /// workers are stopped.
    pub fn build(self) -> Result<Executor, ConfigError> {
        self.config.validate()?;
        let ExecutorConfig {
            pool_size,
            name,
            batch,
            spin,
        } = self.config;

        let inner = Arc::new(Inner {
            id: POOL_ID.fetch_add(1, Ordering::Relaxed),
            name,
            pool_size,
            batch,
            spin,
            state: AtomicU32::new(RUNNING),
            queue: MultiLaneQueue::new(MultiLaneQueue::<Task>::lane_count_for(pool_size)),
            gate: ParkGate::new(),
            terminations: CountDownLatch::new(pool_size),
            on_error: self.on_error,
            on_reject: self.on_reject,
        });
        let executor = Executor {
            inner: Arc::clone(&inner),
        };

        for index in 0..pool_size {
            let worker_name = format!("{}-worker-{}", inner.name, index);
            let worker = Arc::clone(&inner);
            let spawned = self.thread_factory.spawn(
                worker_name,
                Box::new(move || {
                    WORKER_MARK.with(|mark| {
                        mark.set(Some(WorkerMark {
                            pool: worker.id,
                            counted: false,
                        }));
                    });
                    let _guard = ExitGuard {
                        inner: Arc::clone(&worker),
                        index,
                    };
                    worker_loop(&worker, index);
                }),
            );
            if let Err(err) = spawned {
                // Count the workers that never started, then stop the rest.
                for _ in index..pool_size {
                    inner.terminations.count_down();
                }
                executor.shutdown_now();
                return Err(ConfigError::Spawn(err));
            }
        }
        Ok(executor)
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_fault_handler() -> FaultHandler {
    Arc::new(|fault| {
        tracing::error!(context = fault.context(), message = fault.message(), "unhandled fault");
    })
}

/// Decrements the termination latch exactly once per worker, on any exit
/// path — including an unwind out of the injected error handler.
struct ExitGuard {
    inner: Arc<Inner>,
    index: usize,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let counted = WORKER_MARK.with(|mark| mark.get().is_some_and(|m| m.counted));
        if !counted {
            self.inner.terminations.count_down();
        }
        WORKER_MARK.with(|mark| mark.set(None));
        trace!(pool = %self.inner.name, worker = self.index, "worker exited");
    }
}

fn worker_loop(inner: &Arc<Inner>, index: usize) {
    trace!(pool = %inner.name, worker = index, "worker started");
    'run: loop {
        inner.gate.acquire(inner.spin);
        if inner.state.load(Ordering::Acquire) == STOP {
            break;
        }
        // Sweep phase: up to `batch` tasks per permit, own lane first.
        let mut ran = 0;
        let mut swept_empty = false;
        while ran < inner.batch {
            if inner.state.load(Ordering::Acquire) == STOP {
                break 'run;
            }
            match inner.queue.pop(index) {
                Some(task) => {
                    run_task(inner, task);
                    ran += 1;
                }
                None => {
                    swept_empty = true;
                    break;
                }
            }
        }
        // An empty sweep during Shutdown means this worker's share of the
        // drain is done.
        if swept_empty && inner.state.load(Ordering::Acquire) >= SHUTDOWN {
            break;
        }
    }
}

fn run_task(inner: &Inner, task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        (inner.on_error)(Fault::new("task", payload));
    }
}
