//! Count-down latch tracking worker terminations.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A one-shot count-down latch.
///
/// The executor creates one latch per pool with `pool_size` counts; every
/// worker decrements it exactly once on exit. `is_terminated` is defined as
/// the latch having reached zero.
pub(crate) struct CountDownLatch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CountDownLatch {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrements the count, waking all waiters when it reaches zero.
    ///
    /// Decrementing an already-zero latch is a no-op; the count never
    /// underflows.
    pub(crate) fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Current count.
    pub(crate) fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` iff the latch reached zero within the timeout.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}
