//! Error types for the worker pool.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of the pool itself. Failures of the work being executed
//! never show up here: they are captured per item as a
//! [`JobFailure`](crate::JobFailure) inside the item's
//! [`Outcome`](crate::Outcome).
//!
//! ## Error Cases
//! - `InvalidConfig`: The pool was constructed with unusable parameters.
//! - `IllegalState`: A lifecycle operation was called in the wrong state (for
//!   example, `start` twice, or `submit` before `start`).
//! - `QueueFull`: The intake queue had no room for a non-blocking or timed
//!   submission.
//! - `Closed`: The pool has been stopped or drained and accepts no more work.
//! - `ShutdownTimeout`: Workers did not exit within the configured shutdown
//!   timeout and were aborted.

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the worker pool.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Construction parameters were rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A lifecycle operation was called in a state that does not allow it.
    #[error("Illegal state: {context}")]
    IllegalState { context: String },

    /// The intake queue is at capacity.
    #[error("Intake queue is full")]
    QueueFull,

    /// The pool no longer accepts work.
    #[error("Worker pool is closed")]
    Closed,

    /// Workers were still running when the shutdown timeout elapsed.
    #[error("Shutdown timed out with {remaining} worker(s) still running")]
    ShutdownTimeout { remaining: usize },
}

/// A submission the pool refused, handed back together with the reason.
///
/// The pool never retries or drops a rejected item on its own: whoever
/// submitted it gets it back and decides what to do next.
#[derive(thiserror::Error)]
#[error("{reason}")]
pub struct Rejected<W> {
    item: W,
    reason: Error,
}

impl<W> Rejected<W> {
    pub(crate) const fn new(item: W, reason: Error) -> Self {
        Self { item, reason }
    }

    /// The reason the submission was refused.
    pub const fn reason(&self) -> &Error {
        &self.reason
    }

    /// Consumes the rejection, returning the refused item.
    pub fn into_inner(self) -> W {
        self.item
    }

    /// Splits the rejection into the refused item and the reason.
    pub fn into_parts(self) -> (W, Error) {
        (self.item, self.reason)
    }
}

// Items are usually closures or futures, so don't require `W: Debug`.
impl<W> fmt::Debug for Rejected<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<W> From<Rejected<W>> for Error {
    fn from(rejected: Rejected<W>) -> Self {
        rejected.reason
    }
}
