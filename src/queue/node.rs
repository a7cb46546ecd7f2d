//! Linked node and single-lane MPSC queue.
//!
//! The queue is a non-intrusive linked chain with a two-phase enqueue:
//!
//! 1. `XCHG` the `head` pointer to the freshly allocated node — this
//!    linearizes all producers and makes the push wait-free;
//! 2. release-store the previous head's `next` to the new node — no CAS is
//!    needed because the swap made this producer the unique writer of that
//!    `next` field.
//!
//! The price of skipping a CAS per enqueue is a transient `null` in `next`:
//! a consumer that observes `head != tail` while `tail.next` is still null
//! is seeing a producer between its two phases, and must spin until the
//! release store lands (bounded by exactly one store).
//!
//! ```text
//!  tail (sentinel)          head (most recent)
//!    │                         │
//!    ▼                         ▼
//!  [ n0 ]──next──▶[ n1 ]──▶[ n2 ]──▶ null
//!          oldest unread … newest
//! ```
//!
//! Consumption is single-consumer: callers serialize `pop` externally (the
//! multi-lane queue does so with a per-lane claim token). Each consumed
//! node's payload slot is taken before the node is freed, and the consumed
//! node becomes the new sentinel.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

pub(crate) struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

/// Multi-producer single-consumer linked queue of `T`.
///
/// `head` and `tail` live on separate cache lines: producers hammer `head`
/// with swaps while the consumer advances `tail`, and sharing a line would
/// put every push and pop in the same coherence traffic.
pub(crate) struct NodeQueue<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
}

// SAFETY: nodes are heap-allocated and reached only through the atomic
// pointers; payload hand-off is ordered by the release/acquire pair on
// `next`. `T: Send` is required because payloads cross threads.
unsafe impl<T: Send> Send for NodeQueue<T> {}
unsafe impl<T: Send> Sync for NodeQueue<T> {}

impl<T> NodeQueue<T> {
    pub(crate) fn new() -> Self {
        let sentinel = Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: None,
        }));
        Self {
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
        }
    }

    /// Enqueues `value`. Wait-free; safe from any number of threads.
    pub(crate) fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: Some(value),
        }));
        let prev = self.head.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` was the head an instant ago. The consumer frees a
        // node only after observing its `next` non-null, so `prev` stays
        // alive until this store completes; the swap made us its sole
        // `next` writer.
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Dequeues the oldest value, or `None` when the queue is empty.
    ///
    /// # Safety
    ///
    /// At most one thread may be inside `pop` at a time. Callers serialize
    /// consumers externally (claim token, single dispatcher thread, …).
    pub(crate) unsafe fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Acquire);
        let mut next = (*tail).next.load(Ordering::Acquire);
        if next.is_null() {
            if self.head.load(Ordering::Acquire) == tail {
                return None;
            }
            // head != tail: a producer swapped head but has not linked
            // `next` yet. The link lands after one release store.
            loop {
                std::hint::spin_loop();
                next = (*tail).next.load(Ordering::Acquire);
                if !next.is_null() {
                    break;
                }
            }
        }
        // Taking the payload (rather than freeing the node that carries it)
        // lets the consumed node serve as the next sentinel.
        let value = (*next).value.take();
        debug_assert!(value.is_some(), "non-sentinel node must carry a value");
        self.tail.store(next, Ordering::Release);
        drop(Box::from_raw(tail));
        value
    }

    /// True when no unread node is reachable. The answer is a snapshot: a
    /// concurrent push can invalidate it immediately.
    pub(crate) fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }
}

impl<T> Drop for NodeQueue<T> {
    fn drop(&mut self) {
        // Exclusive access: walk the chain from the sentinel and free every
        // node, dropping any unconsumed payloads with it.
        let mut node = *self.tail.get_mut();
        while !node.is_null() {
            // SAFETY: each node in the chain is owned by the queue and
            // visited exactly once.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
        }
    }
}
