// src/error.rs

//! Error types. An empty queue is not an error: `poll` simply returns `None`.

use core::fmt;

use thiserror::Error;

/// Error returned when a queue cannot be built for the requested capacity.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CapacityError {
  /// A capacity of zero was requested.
  #[error("queue capacity must be greater than zero")]
  Zero,
  /// The requested capacity cannot be rounded up to a usable power of two.
  #[error("queue capacity {requested} exceeds the maximum of {max}")]
  TooLarge {
    /// The capacity that was asked for.
    requested: usize,
    /// The largest capacity a queue can be built with.
    max: usize,
  },
}

/// Returned by `offer` when the queue has no free slot.
///
/// The queue is left untouched and the rejected item is handed back.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
  /// Consumes the error, returning the item that could not be enqueued.
  #[inline]
  pub fn into_inner(self) -> T {
    self.0
  }
}

impl<T> fmt::Debug for Full<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Full(..)")
  }
}

impl<T> fmt::Display for Full<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("queue full")
  }
}

impl<T> std::error::Error for Full<T> {}

/// Returned by a blocking wait that was cancelled through an
/// [`Interrupter`](crate::blocking::Interrupter).
///
/// No element is consumed by an interrupted call.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("blocking wait was interrupted")]
pub struct Interrupted;
