//! Lock-free node queues.
//!
//! Three layers share one building block: the atomic linked [`node`] chain.
//! [`node::NodeQueue`] is the single-lane MPSC queue, [`multilane`] shards it
//! by producer thread for the executor, and [`mailbox`] adds message
//! accounting for bounded admission.

pub mod mailbox;
pub(crate) mod multilane;
pub(crate) mod node;
