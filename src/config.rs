//! Executor configuration and injected capabilities.
//!
//! Everything here is injection, not parsing: there is no CLI, no config
//! file, and no persistent state. Callers construct an [`ExecutorConfig`]
//! (or rely on its defaults), and the builder validates it before any
//! thread is started.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::error::ConfigError;

/// Default maximum number of tasks a worker runs per gate permit.
pub const DEFAULT_BATCH: usize = 1024;

/// Default number of empty-poll spin cycles before a worker parks.
pub const DEFAULT_SPIN: u32 = 64;

/// Monotonic counter backing default pool names.
static POOL_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Returns a fresh default pool name of the form `strand-{n}`.
pub(crate) fn next_pool_name() -> String {
    format!("strand-{}", POOL_SEQ.fetch_add(1, Ordering::Relaxed))
}

/// Tuning knobs for an [`Executor`](crate::Executor).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads, started eagerly. Must be greater than zero.
    pub pool_size: usize,
    /// Pool name; workers are named `{name}-worker-{i}`.
    pub name: String,
    /// Maximum consecutive tasks a worker runs before re-entering the park
    /// gate, so other workers get a chance to park or drain.
    pub batch: usize,
    /// Empty-poll spin cycles a worker burns before parking. Trades latency
    /// for CPU; the right value is workload- and platform-dependent.
    pub spin: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: thread::available_parallelism().map_or(1, usize::from),
            name: next_pool_name(),
            batch: DEFAULT_BATCH,
            spin: DEFAULT_SPIN,
        }
    }
}

impl ExecutorConfig {
    /// Validates the configuration for basic sanity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroPoolSize`] or [`ConfigError::ZeroBatch`]
    /// when the corresponding field is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        Ok(())
    }
}

/// Starts worker threads on behalf of an executor.
///
/// Injected so embedders can pin workers, adjust stack sizes, or route
/// spawning through their own supervision. The runtime only requires that
/// `body` eventually runs on a dedicated thread.
pub trait ThreadFactory: Send + Sync + 'static {
    /// Spawns a worker thread named `name` running `body`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the thread cannot be started.
    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()>;
}

/// The default factory: `std::thread::Builder` with the worker name set and
/// the join handle detached (workers are observed through the termination
/// latch, not joined).
#[derive(Debug, Clone, Copy, Default)]
pub struct StdThreadFactory;

impl ThreadFactory for StdThreadFactory {
    fn spawn(&self, name: String, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        thread::Builder::new().name(name).spawn(body).map(drop)
    }
}
