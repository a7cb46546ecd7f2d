//! Error types and fault propagation strategy.
//!
//! The runtime distinguishes synchronous programmer-facing errors from
//! asynchronous faults:
//!
//! - **Synchronous errors** ([`ConfigError`], [`ExecuteError`]) are returned
//!   to the caller as typed `Result`s.
//! - **Asynchronous faults** ([`Fault`]) are panics caught at a dispatch
//!   boundary (a worker running a task, or an actor running its handler) and
//!   funneled through the injected error handler. The runtime never logs a
//!   fault in place of delivering it, never terminates the process, and never
//!   swallows a fault silently.
//! - **Overflow** ([`OverflowError`]) carries the rejected message back to
//!   the producer so nothing is lost without notice.
//!
//! Internal cancellation — the wake-up used to pull parked workers out of the
//! gate during shutdown — is pure control flow and has no error type.

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Errors raised while validating configuration or constructing an executor.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The pool size was zero; an executor needs at least one worker.
    #[error("pool size must be greater than zero")]
    ZeroPoolSize,

    /// The worker batch was zero; workers must run at least one task per
    /// gate permit to make progress.
    #[error("worker batch must be greater than zero")]
    ZeroBatch,

    /// The thread factory failed to start a worker.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised synchronously by [`Executor::execute`](crate::Executor::execute).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecuteError {
    /// The executor has been shut down and no longer accepts submissions.
    ///
    /// The rejected task itself is handed to the injected rejection handler,
    /// which may requeue it elsewhere; this error only signals the outcome.
    #[error("executor `{pool}` is shut down")]
    Rejected {
        /// Name of the rejecting pool.
        pool: String,
    },
}

/// A panic payload caught at a dispatch boundary.
///
/// Workers catch every unwind out of a task, and actors catch every unwind
/// out of their message handler. The payload is wrapped in a `Fault` and
/// forwarded to the injected error handler; processing then continues.
pub struct Fault {
    payload: Box<dyn Any + Send + 'static>,
    context: &'static str,
}

impl Fault {
    pub(crate) fn new(context: &'static str, payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { payload, context }
    }

    /// Where the fault was caught: `"task"` or `"handler"`.
    #[must_use]
    pub fn context(&self) -> &'static str {
        self.context
    }

    /// Best-effort rendering of the panic message.
    ///
    /// Panics raised via `panic!("…")` carry a `&str` or `String` payload;
    /// anything else renders as an opaque placeholder.
    #[must_use]
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "non-string panic payload"
        }
    }

    /// Consumes the fault, returning the raw panic payload.
    #[must_use]
    pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("context", &self.context)
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault: {}", self.context, self.message())
    }
}

/// A message rejected by a bounded mailbox at admission.
///
/// Carries the rejected message so the producer can recover it; the mailbox
/// itself is left unchanged by a rejected enqueue.
pub struct OverflowError<M> {
    message: M,
    bound: usize,
}

impl<M> OverflowError<M> {
    pub(crate) fn new(message: M, bound: usize) -> Self {
        Self { message, bound }
    }

    /// The bound that was exceeded.
    #[must_use]
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Borrows the rejected message.
    #[must_use]
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Consumes the error, returning the rejected message.
    #[must_use]
    pub fn into_message(self) -> M {
        self.message
    }
}

impl<M> fmt::Debug for OverflowError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverflowError")
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

impl<M> fmt::Display for OverflowError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mailbox bound of {} messages exceeded", self.bound)
    }
}

impl<M> std::error::Error for OverflowError<M> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_message_from_str_panic() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let fault = Fault::new("task", payload);
        assert_eq!(fault.message(), "boom");
        assert_eq!(fault.context(), "task");
    }

    #[test]
    fn test_fault_message_from_string_panic() {
        let n = 7;
        let payload = std::panic::catch_unwind(|| panic!("boom {n}")).unwrap_err();
        let fault = Fault::new("handler", payload);
        assert_eq!(fault.message(), "boom 7");
    }

    #[test]
    fn test_fault_message_from_opaque_payload() {
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
        let fault = Fault::new("task", payload);
        assert_eq!(fault.message(), "non-string panic payload");
        assert_eq!(*fault.into_payload().downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_overflow_error_round_trips_message() {
        let err = OverflowError::new("lost", 3);
        assert_eq!(err.bound(), 3);
        assert_eq!(*err.message(), "lost");
        assert_eq!(err.into_message(), "lost");
    }

    #[test]
    fn test_overflow_error_display_has_bound() {
        let err = OverflowError::new((), 5);
        assert!(err.to_string().contains('5'));
    }
}
