//! Pluggable execution strategies for actors.
//!
//! A strategy answers one question — "run this closure somewhere" — and
//! fixes the dispatch batch for actors bound to it. The batch caps how many
//! consecutive messages one actor may handle before yielding its worker by
//! re-submitting the rest of its mailbox, trading locality (bursts stay on
//! one thread) against monopolizing a worker.

use crate::executor::Executor;

/// Default dispatch batch for pool-backed strategies.
pub const DEFAULT_ACTOR_BATCH: usize = 1024;

/// A place to run closures, plus the actor dispatch batch it imposes.
///
/// Implementations are monomorphized into the actor dispatch loop; the
/// handler call path never goes through a vtable.
pub trait Strategy: Send + Sync + 'static {
    /// Maximum consecutive handler invocations before an actor yields.
    fn batch(&self) -> usize;

    /// Runs `f` somewhere — inline, on a pool, wherever the strategy says.
    fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static;
}

/// Runs closures inline on the calling thread.
///
/// Turns an actor into a pure trampoline: `send` on an idle actor handles
/// the message (and any messages enqueued meanwhile) before returning,
/// without growing the stack. The batch is effectively unlimited because
/// there is no worker to yield to.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Strategy for Sequential {
    fn batch(&self) -> usize {
        usize::MAX
    }

    fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        f();
    }
}

/// Submits closures to a work-stealing fork-join pool (rayon's global pool),
/// amortizing submission across its worker-local deques.
#[derive(Debug, Clone, Copy)]
pub struct WorkStealing {
    batch: usize,
}

impl WorkStealing {
    /// Creates the strategy with the given dispatch batch.
    #[must_use]
    pub fn new(batch: usize) -> Self {
        Self { batch }
    }
}

impl Default for WorkStealing {
    fn default() -> Self {
        Self::new(DEFAULT_ACTOR_BATCH)
    }
}

impl Strategy for WorkStealing {
    fn batch(&self) -> usize {
        self.batch
    }

    fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        rayon::spawn(f);
    }
}

/// Submits closures to a [`Executor`] pool.
#[derive(Debug, Clone)]
pub struct PoolStrategy {
    pool: Executor,
    batch: usize,
}

impl PoolStrategy {
    /// Binds the strategy to `pool` with the default batch.
    #[must_use]
    pub fn new(pool: Executor) -> Self {
        Self::with_batch(pool, DEFAULT_ACTOR_BATCH)
    }

    /// Binds the strategy to `pool` with an explicit dispatch batch.
    #[must_use]
    pub fn with_batch(pool: Executor, batch: usize) -> Self {
        Self { pool, batch }
    }
}

impl Strategy for PoolStrategy {
    fn batch(&self) -> usize {
        self.batch
    }

    fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // A shut-down pool rejects the closure through its rejection
        // handler; the dispatch closure reclaims its message chain when
        // dropped unexecuted, so nothing dangles.
        let _ = self.pool.execute(f);
    }
}
