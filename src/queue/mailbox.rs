//! Counted MPSC mailbox queue for external actor frameworks.
//!
//! This is the single-lane queue of [`node`](super::node) plus message
//! accounting: a pair of monotonic counters tracks how many messages have
//! ever been enqueued (`head_count`) and dequeued (`tail_count`), so that
//! `head_count - tail_count` is the current queue depth. Bounded mailboxes
//! admit a message by reserving a slot in `head_count` with a CAS — the
//! admission test and the reservation are one atomic step, so the depth
//! never exceeds the bound.
//!
//! The counters live beside the queue rather than on the nodes: a producer
//! must never dereference a chain node another consumer may have freed, and
//! the counter pair carries exactly the same invariant
//! (`head.count - tail.count` = messages enqueued) without touching the
//! chain.
//!
//! Intended for embedding as the message queue of an actor framework:
//! `enqueue` from any sender, `dequeue` from the dispatcher, and `clean_up`
//! into a dead-letter queue when the owning actor terminates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use tracing::trace;

use super::node::NodeQueue;
use crate::error::OverflowError;

/// MPSC message queue with a count-difference admission test.
pub struct MailboxQueue<M> {
    queue: NodeQueue<M>,
    /// Messages ever admitted. Producers reserve admission here.
    head_count: CachePadded<AtomicU64>,
    /// Messages ever consumed.
    tail_count: CachePadded<AtomicU64>,
    /// Consumer claim token; `dequeue` is logically single-consumer.
    consumer: AtomicBool,
    /// Maximum queue depth; `0` means unbounded.
    bound: usize,
}

impl<M: Send> MailboxQueue<M> {
    /// Creates an unbounded mailbox queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_bound(0)
    }

    /// Creates a mailbox queue admitting at most `bound` messages.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero; a mailbox that can never admit a message
    /// is a configuration error, not a queue.
    #[must_use]
    pub fn bounded(bound: usize) -> Self {
        assert!(bound > 0, "mailbox bound must be greater than zero");
        Self::with_bound(bound)
    }

    fn with_bound(bound: usize) -> Self {
        Self {
            queue: NodeQueue::new(),
            head_count: CachePadded::new(AtomicU64::new(0)),
            tail_count: CachePadded::new(AtomicU64::new(0)),
            consumer: AtomicBool::new(false),
            bound,
        }
    }

    /// Enqueues `message`, or rejects it when the mailbox is at its bound.
    ///
    /// # Errors
    ///
    /// Returns [`OverflowError`] carrying the rejected message; the mailbox
    /// is unchanged by a rejected enqueue.
    pub fn enqueue(&self, message: M) -> Result<(), OverflowError<M>> {
        if self.bound == 0 {
            self.head_count.fetch_add(1, Ordering::AcqRel);
        } else {
            let mut admitted = self.head_count.load(Ordering::Acquire);
            loop {
                let consumed = self.tail_count.load(Ordering::Acquire);
                if admitted.wrapping_sub(consumed) >= self.bound as u64 {
                    return Err(OverflowError::new(message, self.bound));
                }
                // Admission and reservation in one step: winning this CAS
                // is what makes the depth bound exact under racing senders.
                match self.head_count.compare_exchange_weak(
                    admitted,
                    admitted + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(observed) => admitted = observed,
                }
            }
        }
        self.queue.push(message);
        Ok(())
    }

    /// Dequeues the oldest message, or `None` when the queue is empty.
    pub fn dequeue(&self) -> Option<M> {
        while self
            .consumer
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        // SAFETY: the claim token above makes this thread the unique
        // consumer until the release below.
        let value = unsafe { self.queue.pop() };
        if value.is_some() {
            self.tail_count.fetch_add(1, Ordering::AcqRel);
        }
        self.consumer.store(false, Ordering::Release);
        value
    }

    /// Current queue depth.
    ///
    /// A racing enqueue that has reserved admission but not yet linked its
    /// node is already counted; the figure is a snapshot either way.
    #[must_use]
    pub fn number_of_messages(&self) -> usize {
        let admitted = self.head_count.load(Ordering::Acquire);
        let consumed = self.tail_count.load(Ordering::Acquire);
        admitted.checked_sub(consumed).unwrap_or(0) as usize
    }

    /// True when at least one linked message is waiting.
    #[must_use]
    pub fn has_messages(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Drains every pending message into `dead_letters`, returning how many
    /// were moved. Messages the dead-letter queue rejects are dropped.
    pub fn clean_up(&self, dead_letters: &Self) -> usize {
        let mut drained = 0;
        while let Some(message) = self.dequeue() {
            drained += 1;
            if dead_letters.enqueue(message).is_err() {
                trace!("dead-letter queue full, message dropped");
            }
        }
        if drained > 0 {
            trace!(drained, "mailbox cleaned up");
        }
        drained
    }
}
