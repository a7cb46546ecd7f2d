//! Actor mailboxes: serialized message handlers over a lock-free chain.
//!
//! An actor binds a handler to a stream of messages with two guarantees:
//! at most one thread runs the handler at any instant, and everything one
//! invocation writes is visible to the next, even when the next runs on a
//! different worker.
//!
//! # Protocol
//!
//! The whole actor state is one atomic `head` pointer to the most recently
//! enqueued message node; `null` means the actor is idle. `send` swaps the
//! new node into `head`:
//!
//! - the producer that swapped out `null` found the actor idle and owns
//!   scheduling — it submits the dispatch closure through the strategy;
//! - every other producer saw a non-null previous head, links
//!   `prev.next = node`, and relies on the running dispatcher to follow the
//!   link.
//!
//! The dispatcher handles a node, reads `next`, and either continues (batch
//! quota remaining), re-submits the rest of the chain (quota exhausted — the
//! yield that keeps one actor from monopolizing a worker), or tries to park
//! with `CAS(head, node, null)`. A failed park CAS means a producer raced
//! the dispatch: it saw our non-null head and did *not* schedule, so the
//! dispatcher spin-waits for the producer's `next` link (at most one release
//! store away) and keeps going.
//!
//! # Memory model
//!
//! The head swap linearizes producers; per-producer send order is preserved
//! and cross-producer order is the swap order. Each `next` link is a
//! release store read with acquire ordering by the dispatcher, and the park
//! CAS is acquire/release on `head`, so handler invocation `k` happens
//! before invocation `k + 1` across any worker hand-off. The handler itself
//! is `FnMut` state behind an `UnsafeCell`; the serialization above is
//! exactly what makes handing out `&mut` sound.
//!
//! # Bounded actors
//!
//! Bounded actors add two monotonic counters: `enqueued`, reserved by a CAS
//! at admission, and `dispatched`, advanced (release) just before each
//! handler invocation. Their difference is the queue depth; a send that
//! would push it to `bound` hands the message to the overflow handler
//! instead. The counters live off the node chain so producers never touch
//! nodes the dispatcher may already have freed.

use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Fault;
use crate::strategy::Strategy;

struct MsgNode<A> {
    next: AtomicPtr<MsgNode<A>>,
    /// Taken just before the handler runs; `None` only on consumed nodes.
    value: Option<A>,
}

type ErrorHandler = Box<dyn Fn(Fault) + Send + Sync>;
type OverflowHandler<A> = Box<dyn Fn(A) + Send + Sync>;

struct ActorInner<A, H, S> {
    /// Most recently enqueued node; null ⇔ idle (no dispatch scheduled).
    head: AtomicPtr<MsgNode<A>>,
    /// Messages ever admitted (bounded actors only).
    enqueued: AtomicU64,
    /// Messages ever handed to the handler; the admission floor.
    dispatched: AtomicU64,
    /// Maximum queued messages; zero = unbounded.
    bound: usize,
    /// Exclusive access is serialized by the head protocol.
    handler: UnsafeCell<H>,
    on_error: ErrorHandler,
    on_overflow: Option<OverflowHandler<A>>,
    strategy: S,
}

// SAFETY: messages are moved through the chain, never shared (`A: Send`);
// the handler is only ever touched by the single active dispatcher
// (`H: Send` suffices — the head protocol provides the exclusion that
// `Sync` would otherwise demand); the strategy is shared across senders.
unsafe impl<A: Send, H: Send, S: Send> Send for ActorInner<A, H, S> {}
unsafe impl<A: Send, H: Send, S: Sync> Sync for ActorInner<A, H, S> {}

impl<A, H, S> Drop for ActorInner<A, H, S> {
    fn drop(&mut self) {
        // A non-null head means a dispatch closure is scheduled or running,
        // and that closure holds an `Arc` to this inner — so it cannot be
        // dropping. By the time we get here the actor is idle.
        debug_assert!(self.head.get_mut().is_null());
    }
}

/// Something messages of type `A` can be sent to.
pub trait ActorRef<A>: Send + Sync {
    /// Enqueues `message`, scheduling the actor if it was idle.
    fn send(&self, message: A);

    /// Derives a reference accepting `B` by mapping into `A` on the sender's
    /// thread. The adapter forwards to the same underlying mailbox, so all
    /// ordering and serialization guarantees carry over.
    fn contramap<B, F>(self, map: F) -> Contramap<Self, F>
    where
        Self: Sized,
        F: Fn(B) -> A + Send + Sync,
    {
        Contramap { target: self, map }
    }
}

/// A mapping adapter created by [`ActorRef::contramap`].
pub struct Contramap<R, F> {
    target: R,
    map: F,
}

impl<A, B, R, F> ActorRef<B> for Contramap<R, F>
where
    R: ActorRef<A>,
    F: Fn(B) -> A + Send + Sync,
{
    fn send(&self, message: B) {
        self.target.send((self.map)(message));
    }
}

/// An actor: a message handler bound to a lock-free mailbox.
///
/// Cheap to clone; clones share the mailbox. Dropping the last clone while
/// the actor is idle releases the handler; a scheduled dispatch keeps the
/// actor alive until its chain is drained.
pub struct Actor<A, H, S> {
    inner: Arc<ActorInner<A, H, S>>,
}

impl<A, H, S> Clone for Actor<A, H, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, H, S> std::fmt::Debug for Actor<A, H, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("bound", &self.inner.bound)
            .field("idle", &self.inner.head.load(Ordering::Acquire).is_null())
            .finish_non_exhaustive()
    }
}

impl<A, H, S> Actor<A, H, S>
where
    A: Send + 'static,
    H: FnMut(A) + Send + 'static,
    S: Strategy,
{
    /// Creates an unbounded actor.
    ///
    /// `handler` runs for every message, serialized; panics out of it are
    /// caught and forwarded to `on_error`, and dispatch continues.
    pub fn unbounded(
        strategy: S,
        handler: H,
        on_error: impl Fn(Fault) + Send + Sync + 'static,
    ) -> Self {
        Self::build(0, strategy, handler, Box::new(on_error), None)
    }

    /// Creates an actor admitting at most `bound` queued messages.
    ///
    /// A send that would exceed the bound hands the message to
    /// `on_overflow` (exactly once per rejected message) and leaves the
    /// actor unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    pub fn bounded(
        bound: usize,
        strategy: S,
        handler: H,
        on_error: impl Fn(Fault) + Send + Sync + 'static,
        on_overflow: impl Fn(A) + Send + Sync + 'static,
    ) -> Self {
        assert!(bound > 0, "actor bound must be greater than zero");
        Self::build(
            bound,
            strategy,
            handler,
            Box::new(on_error),
            Some(Box::new(on_overflow)),
        )
    }

    fn build(
        bound: usize,
        strategy: S,
        handler: H,
        on_error: ErrorHandler,
        on_overflow: Option<OverflowHandler<A>>,
    ) -> Self {
        Self {
            inner: Arc::new(ActorInner {
                head: AtomicPtr::new(ptr::null_mut()),
                enqueued: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                bound,
                handler: UnsafeCell::new(handler),
                on_error,
                on_overflow,
                strategy,
            }),
        }
    }

    /// Enqueues `message` and, if the actor was idle, schedules it.
    pub fn send(&self, message: A) {
        if self.inner.bound != 0 && !self.admit() {
            if let Some(on_overflow) = &self.inner.on_overflow {
                on_overflow(message);
            }
            return;
        }
        self.push(message);
    }

    /// Reserves one admission slot; `false` means the mailbox is full.
    fn admit(&self) -> bool {
        let inner = &*self.inner;
        let mut enqueued = inner.enqueued.load(Ordering::Acquire);
        loop {
            let dispatched = inner.dispatched.load(Ordering::Acquire);
            if enqueued.wrapping_sub(dispatched) >= inner.bound as u64 {
                return false;
            }
            // Check and reservation are one CAS: the depth cannot overshoot.
            match inner.enqueued.compare_exchange_weak(
                enqueued,
                enqueued + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => enqueued = observed,
            }
        }
    }

    fn push(&self, message: A) {
        let node = Box::into_raw(Box::new(MsgNode {
            next: AtomicPtr::new(ptr::null_mut()),
            value: Some(message),
        }));
        let prev = self.inner.head.swap(node, Ordering::AcqRel);
        if prev.is_null() {
            // The actor was idle: this producer owns scheduling.
            let pending = Pending {
                inner: Arc::clone(&self.inner),
                node,
            };
            self.inner.strategy.submit(move || pending.dispatch());
        } else {
            // SAFETY: the dispatcher frees a node only after reading a
            // non-null `next` from it or after winning the park CAS; our
            // swap already made the park CAS on `prev` impossible, so
            // `prev` is alive until this store lands.
            unsafe { (*prev).next.store(node, Ordering::Release) };
        }
    }
}

impl<A, H, S> ActorRef<A> for Actor<A, H, S>
where
    A: Send + 'static,
    H: FnMut(A) + Send + 'static,
    S: Strategy,
{
    fn send(&self, message: A) {
        Actor::send(self, message);
    }
}

/// A scheduled dispatch: the oldest unhandled node plus the actor it
/// belongs to.
///
/// Dropping a `Pending` whose closure never ran (a stopped pool discarding
/// tasks, or an unwind out of the injected error handler) reclaims the
/// whole remaining chain with the same park protocol, so messages are
/// dropped rather than leaked and the admission window reopens.
struct Pending<A, H, S> {
    inner: Arc<ActorInner<A, H, S>>,
    node: *mut MsgNode<A>,
}

// SAFETY: the node pointer is owned (the chain hand-off is ordered by the
// head swap), and `Arc<ActorInner>` requires the same bounds it imposes.
unsafe impl<A: Send, H: Send, S: Send + Sync> Send for Pending<A, H, S> {}

impl<A, H, S> Pending<A, H, S>
where
    A: Send + 'static,
    H: FnMut(A) + Send + 'static,
    S: Strategy,
{
    /// Runs the dispatch loop. See the module docs for the protocol.
    fn dispatch(mut self) {
        let inner = Arc::clone(&self.inner);
        // SAFETY: at most one dispatcher is active per actor — producers
        // only schedule when they swap out a null head, and the previous
        // dispatcher must have parked (CAS to null) for that to happen —
        // so this `&mut` is exclusive.
        let handler = unsafe { &mut *inner.handler.get() };
        let mut quota = inner.strategy.batch();
        loop {
            let node = self.node;
            // SAFETY: `node` is the oldest live node and we own its payload.
            let message =
                unsafe { (*node).value.take().expect("unconsumed node carries a message") };
            if inner.bound != 0 {
                // Advance the admission floor before invoking: the release
                // pairs with the acquire in `admit`, and doubles as the
                // republication point for handler state across hand-offs.
                inner.dispatched.fetch_add(1, Ordering::AcqRel);
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                (inner.on_error)(Fault::new("handler", payload));
            }

            // SAFETY: `node` stays ours until freed below.
            let mut next = unsafe { (*node).next.load(Ordering::Acquire) };
            if next.is_null() {
                match inner.head.compare_exchange(
                    node,
                    ptr::null_mut(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        // Parked: the actor is idle and the next send
                        // re-schedules it.
                        self.node = ptr::null_mut();
                        // SAFETY: chain fully consumed; nothing points here.
                        unsafe { drop(Box::from_raw(node)) };
                        return;
                    }
                    Err(_) => {
                        // A producer swapped head after our `next` read and
                        // did not schedule; its link is one release store
                        // away.
                        next = unsafe { spin_for_link(node) };
                    }
                }
            }
            self.node = next;
            // SAFETY: `next` is linked, so no producer can still touch
            // `node`; the payload was taken above.
            unsafe { drop(Box::from_raw(node)) };

            if quota > 1 {
                quota -= 1;
            } else {
                // Batch exhausted: yield this worker and hand the rest of
                // the chain back to the strategy.
                let continuation = self;
                inner.strategy.submit(move || continuation.dispatch());
                return;
            }
        }
    }
}

impl<A, H, S> Drop for Pending<A, H, S> {
    fn drop(&mut self) {
        if self.node.is_null() {
            return;
        }
        // Discarded without running (or unwound): walk the chain with the
        // dispatch protocol, dropping payloads instead of handling them.
        let mut node = self.node;
        loop {
            // SAFETY: same ownership argument as `dispatch`.
            unsafe {
                if (*node).value.take().is_some() && self.inner.bound != 0 {
                    self.inner.dispatched.fetch_add(1, Ordering::AcqRel);
                }
                let next = (*node).next.load(Ordering::Acquire);
                if !next.is_null() {
                    drop(Box::from_raw(node));
                    node = next;
                    continue;
                }
                match self.inner.head.compare_exchange(
                    node,
                    ptr::null_mut(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        drop(Box::from_raw(node));
                        return;
                    }
                    Err(_) => {
                        let next = spin_for_link(node);
                        drop(Box::from_raw(node));
                        node = next;
                    }
                }
            }
        }
    }
}

/// Waits out the producer's two-phase enqueue: after a failed park CAS the
/// `next` link is at most one release store away.
///
/// # Safety
///
/// `node` must be alive and owned by the calling dispatcher.
unsafe fn spin_for_link<A>(node: *mut MsgNode<A>) -> *mut MsgNode<A> {
    loop {
        std::hint::spin_loop();
        let next = (*node).next.load(Ordering::Acquire);
        if !next.is_null() {
            return next;
        }
    }
}
