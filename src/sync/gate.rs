//! Counting park gate for idle workers.
//!
//! The gate is the only place a worker thread blocks. Producers `release`
//! one permit per submitted task; workers `acquire` a permit before each
//! poll sweep and park when none is available.
//!
//! # Contract
//!
//! - `release(1)` increments the permit count and wakes **at most one**
//!   parked waiter per call. Waking every worker for every task would
//!   stampede the pool; waking one is enough because each woken worker
//!   re-validates queue emptiness itself.
//! - `acquire` consumes one permit, or spins briefly and then parks until a
//!   permit is published. Spurious wake-ups are acceptable — callers treat a
//!   returned acquire as a hint, not a task reservation.
//!
//! # Lost-wakeup protocol
//!
//! A releaser that observes `waiters == 0` skips the mutex and condvar
//! entirely; the permit it published is picked up by the next `acquire`
//! fast path. A waiter registers itself in `waiters` *before* taking the
//! lock and re-checks the permit count under the lock before every wait, so
//! a permit published between registration and wait is never missed.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// Spin cycles spent yielding to the OS scheduler after the busy-spin phase.
const YIELD_LIMIT: u32 = 16;

/// Counting wait/wake gate. See the module docs for the contract.
pub(crate) struct ParkGate {
    /// Available permits. Never negative: `acquire` only decrements a
    /// positive count.
    permits: AtomicI64,
    /// Number of threads registered to park. Checked by `release` to skip
    /// the lock when nobody is waiting.
    waiters: AtomicUsize,
    lock: Mutex<()>,
    available: Condvar,
}

impl ParkGate {
    pub(crate) fn new() -> Self {
        Self {
            permits: AtomicI64::new(0),
            waiters: AtomicUsize::new(0),
            lock: Mutex::new(()),
            available: Condvar::new(),
        }
    }

    /// Publishes `n` permits and wakes at most one parked waiter.
    pub(crate) fn release(&self, n: usize) {
        // SeqCst pairs with the waiter's SeqCst registration: in the total
        // order either this release sees the registered waiter, or the
        // waiter's under-lock re-check sees the permit. Weaker orderings
        // admit a lost wakeup (store-load reordering across the two cells).
        self.permits.fetch_add(n as i64, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) == 0 {
            // Nobody parked or preparing to park; the permit is published
            // and the next acquire fast path consumes it.
            return;
        }
        // Acquire the mutex before notifying so a waiter between its permit
        // re-check and its wait cannot miss the signal.
        let _guard = self.lock.lock();
        self.available.notify_one();
    }

    /// Attempts to consume one permit without blocking.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut current = self.permits.load(Ordering::SeqCst);
        while current > 0 {
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Consumes one permit, spinning for `spin` cycles before parking.
    ///
    /// Returns when a permit was consumed or after a wake-up; the caller
    /// re-validates queue emptiness either way.
    pub(crate) fn acquire(&self, spin: u32) {
        let mut backoff = 0;
        loop {
            if self.try_acquire() {
                return;
            }
            if backoff < spin {
                std::hint::spin_loop();
                backoff += 1;
            } else if backoff < spin + YIELD_LIMIT {
                std::thread::yield_now();
                backoff += 1;
            } else {
                self.park();
                return;
            }
        }
    }

    fn park(&self) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock();
        loop {
            if self.try_acquire() {
                break;
            }
            self.available.wait(&mut guard);
        }
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn permits(&self) -> i64 {
        self.permits.load(Ordering::Acquire)
    }
}
