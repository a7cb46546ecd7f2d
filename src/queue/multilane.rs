//! Multi-lane task queue with lane stealing.
//!
//! A single MPSC queue under `N` producers serializes them all on one head
//! pointer. Sharding into `L` lanes keyed by a stable per-thread token cuts
//! head contention to roughly `N / L` while keeping each producer's tasks in
//! one lane, which is what preserves per-producer FIFO. Global FIFO across
//! lanes is deliberately given up.
//!
//! Consumers start at their own lane and, when it is empty, probe the others
//! in XOR order (`base ^ 1`, `base ^ 2`, …). A consumer claims a lane with a
//! CAS on the lane's claim token before draining it, which makes it that
//! lane's unique consumer for the duration of one pop; the next attempt
//! restarts at the consumer's own lane for locality.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;

use super::node::NodeQueue;

/// Process-wide source of producer tokens.
static NEXT_PRODUCER_TOKEN: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static PRODUCER_TOKEN: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// Returns this thread's lane-selection token.
///
/// Tokens are assigned once per thread from a monotonic counter, so a given
/// producer always lands in the same lane — the property per-producer FIFO
/// rests on. (A time-derived token would not be stable.)
pub(crate) fn producer_token() -> usize {
    PRODUCER_TOKEN.with(|token| {
        let mut t = token.get();
        if t == usize::MAX {
            t = NEXT_PRODUCER_TOKEN.fetch_add(1, Ordering::Relaxed);
            token.set(t);
        }
        t
    })
}

/// Largest power of two that is `<= n`. Requires `n >= 1`.
pub(crate) fn floor_pow2(n: usize) -> usize {
    debug_assert!(n >= 1);
    1 << (usize::BITS - 1 - n.leading_zeros())
}

struct Lane<T> {
    queue: NodeQueue<T>,
    /// Consumer claim token: the CAS winner is the lane's unique consumer
    /// until it releases the claim.
    claim: CachePadded<AtomicBool>,
}

/// Array of MPSC lanes with consumer-side stealing.
pub(crate) struct MultiLaneQueue<T> {
    lanes: Box<[Lane<T>]>,
    mask: usize,
}

impl<T> MultiLaneQueue<T> {
    /// Creates a queue with `lanes` lanes. `lanes` must be a power of two.
    pub(crate) fn new(lanes: usize) -> Self {
        assert!(lanes.is_power_of_two(), "lane count must be a power of two");
        let lanes: Box<[Lane<T>]> = (0..lanes)
            .map(|_| Lane {
                queue: NodeQueue::new(),
                claim: CachePadded::new(AtomicBool::new(false)),
            })
            .collect();
        Self {
            mask: lanes.len() - 1,
            lanes,
        }
    }

    /// Lane count for a pool: the largest power of two not exceeding
    /// `min(pool_size, available CPUs)`.
    pub(crate) fn lane_count_for(pool_size: usize) -> usize {
        let cpus = thread::available_parallelism().map_or(1, usize::from);
        floor_pow2(pool_size.min(cpus).max(1))
    }

    /// Enqueues into the producing thread's lane.
    pub(crate) fn push(&self, value: T) {
        let lane = producer_token() & self.mask;
        self.lanes[lane].queue.push(value);
    }

    /// Dequeues one value, probing from `base`'s lane outward.
    ///
    /// A lane whose claim is held by another consumer is skipped: whatever
    /// it holds is already being drained. `None` therefore means "nothing
    /// claimable right now", not "provably empty" — callers revalidate
    /// before parking.
    pub(crate) fn pop(&self, base: usize) -> Option<T> {
        let base = base & self.mask;
        for offset in 0..self.lanes.len() {
            let lane = &self.lanes[base ^ offset];
            if lane
                .claim
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            // SAFETY: the claim token makes this thread the lane's unique
            // consumer until the release below.
            let value = unsafe { lane.queue.pop() };
            lane.claim.store(false, Ordering::Release);
            if value.is_some() {
                return value;
            }
        }
        None
    }

    /// Drains every lane, lane by lane.
    ///
    /// Values keep their per-lane (hence per-producer) order; order across
    /// lanes follows lane index, not submission time.
    pub(crate) fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        for lane in &*self.lanes {
            while lane
                .claim
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                std::hint::spin_loop();
            }
            // SAFETY: claim held, unique consumer.
            while let Some(value) = unsafe { lane.queue.pop() } {
                drained.push(value);
            }
            lane.claim.store(false, Ordering::Release);
        }
        drained
    }

    /// Snapshot emptiness across all lanes.
    pub(crate) fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.queue.is_empty())
    }
}
