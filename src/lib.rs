//! Strand: a high-throughput actor runtime on a fixed worker thread pool.
//!
//! Two tightly coupled primitives make up the runtime:
//!
//! - an [`Executor`]: a bounded set of pre-started OS worker threads fed by
//!   a multi-lane lock-free task queue, with a counting park gate for
//!   wait/wake and a monotonic shutdown state machine;
//! - [`Actor`] mailboxes: per-actor lock-free message chains binding a
//!   user handler to a stream of messages, with at most one worker running
//!   a given actor at any instant and a happens-before edge between
//!   consecutive handler invocations even across worker hand-offs.
//!
//! A [`Strategy`] glues the two together — it decides where an actor's
//! dispatch closures run (inline, on a [`PoolStrategy`] pool, or on a
//! work-stealing pool) and how many messages an actor may burst through
//! before yielding its worker. The standalone [`MailboxQueue`] exposes the
//! same counted MPSC queue the bounded actors use, as an
//! `enqueue`/`dequeue`/`clean_up` primitive for external actor frameworks.
//!
//! # Example
//!
//! ```
//! use strand::{Actor, Executor, PoolStrategy};
//! use std::sync::mpsc;
//!
//! let pool = Executor::new(2).expect("pool");
//! let (done, finished) = mpsc::channel();
//!
//! let counter = Actor::unbounded(
//!     PoolStrategy::new(pool.clone()),
//!     {
//!         let mut total = 0u64;
//!         move |n: u64| {
//!             total += n;
//!             if total >= 10 {
//!                 done.send(total).expect("report");
//!             }
//!         }
//!     },
//!     |fault| eprintln!("handler fault: {fault}"),
//! );
//!
//! for n in 1..=4 {
//!     counter.send(n);
//! }
//! assert_eq!(finished.recv().expect("sum"), 10);
//!
//! pool.shutdown();
//! assert!(pool.await_termination(std::time::Duration::from_secs(5)));
//! ```
//!
//! # Guarantees
//!
//! - Per-producer FIFO: tasks (and messages) from one thread run in
//!   submission order. Global FIFO across producers is *not* guaranteed.
//! - At-most-one dispatch: one thread at a time runs a given actor's
//!   handler, and invocation `k` happens-before invocation `k + 1`.
//! - Producers never block; workers block only in the park gate; faults are
//!   funneled to injected handlers, never swallowed.

#![warn(missing_docs)]

pub mod actor;
pub mod config;
pub mod error;
pub mod executor;
pub mod queue;
pub mod strategy;

pub(crate) mod sync;

pub use actor::{Actor, ActorRef, Contramap};
pub use config::{ExecutorConfig, StdThreadFactory, ThreadFactory};
pub use error::{ConfigError, ExecuteError, Fault, OverflowError};
pub use executor::{Executor, ExecutorBuilder, FaultHandler, RejectHandler, Task};
pub use queue::mailbox::MailboxQueue;
pub use strategy::{PoolStrategy, Sequential, Strategy, WorkStealing};
