//! Blocking coordination primitives used at the edges of the runtime.
//!
//! Everything on the hot path is lock-free; these primitives exist only
//! where a thread genuinely has nothing to do — a worker with an empty
//! queue parks in the [`gate`], and callers of `await_termination` wait on
//! the [`latch`].

pub(crate) mod gate;
pub(crate) mod latch;
