//! The contract every queue handle implements.
//!
//! A queue is built as a producer handle and a consumer handle. Sides that
//! admit several threads hand out `Clone` handles; single-writer sides do not,
//! so cardinality is checked by the compiler rather than by convention.
//!
//! Nothing here blocks. A full queue is reported by [`QueueProducer::offer`]
//! returning [`Full`], an empty one by [`QueueConsumer::poll`] returning `None`.

use crate::error::Full;

/// Read-only view of a queue's occupancy, available from every handle.
pub trait QueueView {
  /// Number of slots. Always a power of two, fixed for the queue's lifetime.
  fn capacity(&self) -> usize;

  /// Number of elements currently enqueued.
  ///
  /// Best-effort: under concurrent mutation the value may be stale by the
  /// time it is returned. It is exact whenever the queue is quiescent and is
  /// always within `0..=capacity()`.
  fn len(&self) -> usize;

  /// Returns `true` if [`len`](QueueView::len) is zero. Same caveats apply.
  #[inline]
  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns `true` if [`len`](QueueView::len) equals the capacity.
  #[inline]
  fn is_full(&self) -> bool {
    self.len() == self.capacity()
  }

  /// Free slots: `capacity() - len()`, with the same caveats as `len`.
  #[inline]
  fn remaining_capacity(&self) -> usize {
    self.capacity().saturating_sub(self.len())
  }
}

/// Result of [`QueueProducer::fill`].
#[must_use = "a rejected item is handed back and is dropped if ignored"]
#[derive(Debug, PartialEq, Eq)]
pub struct Filled<T> {
  /// Items successfully enqueued.
  pub inserted: usize,
  /// An item the supplier produced but the queue had no room for.
  pub rejected: Option<T>,
}

/// The producing end of a queue.
pub trait QueueProducer<T>: QueueView {
  /// Enqueues `item` without blocking.
  ///
  /// On success the item is visible to every later `poll`/`drain` on the
  /// consumer side. If the queue is full the queue is left unchanged and the
  /// item comes back inside [`Full`].
  fn offer(&mut self, item: T) -> Result<(), Full<T>>;

  /// Like [`offer`](QueueProducer::offer), but allowed to fail while the
  /// queue still has room, for example after losing a race with another
  /// producer. Never waits. Callers that must enqueue retry in a loop.
  #[inline]
  fn relaxed_offer(&mut self, item: T) -> Result<(), Full<T>> {
    self.offer(item)
  }

  /// Pulls items from `supplier` and offers them until `limit` have been
  /// inserted, the supplier returns `None`, or the queue fills up.
  ///
  /// The item that hit a full queue is returned in [`Filled::rejected`].
  fn fill<F>(&mut self, mut supplier: F, limit: usize) -> Filled<T>
  where
    F: FnMut() -> Option<T>,
    Self: Sized,
  {
    let mut inserted = 0;
    while inserted < limit {
      let Some(item) = supplier() else {
        break;
      };
      if let Err(Full(item)) = self.offer(item) {
        tracing::trace!(inserted, limit, "fill stopped on a full queue");
        return Filled {
          inserted,
          rejected: Some(item),
        };
      }
      inserted += 1;
    }
    Filled {
      inserted,
      rejected: None,
    }
  }
}

/// The consuming end of a queue.
pub trait QueueConsumer<T>: QueueView {
  /// Dequeues the oldest element visible to this consumer, or `None`
  /// immediately if there is none.
  fn poll(&mut self) -> Option<T>;

  /// Polls until the queue is observed empty, handing every element to
  /// `sink`. Returns the number of elements consumed.
  ///
  /// Elements offered while the drain runs may or may not be included.
  fn drain<F>(&mut self, mut sink: F) -> usize
  where
    F: FnMut(T),
    Self: Sized,
  {
    let mut consumed = 0;
    while let Some(item) = self.poll() {
      sink(item);
      consumed += 1;
    }
    consumed
  }

  /// Like [`drain`](QueueConsumer::drain) but stops after `limit` elements,
  /// leaving the rest in the queue.
  fn drain_limited<F>(&mut self, mut sink: F, limit: usize) -> usize
  where
    F: FnMut(T),
    Self: Sized,
  {
    let mut consumed = 0;
    while consumed < limit {
      match self.poll() {
        Some(item) => {
          sink(item);
          consumed += 1;
        }
        None => break,
      }
    }
    consumed
  }

  /// Discards every element currently visible and returns how many were
  /// dropped.
  ///
  /// Not atomic with respect to producers: an element offered concurrently
  /// may or may not survive. Capacity is unchanged.
  fn clear(&mut self) -> usize {
    let mut cleared = 0;
    while self.poll().is_some() {
      cleared += 1;
    }
    tracing::trace!(cleared, "queue cleared");
    cleared
  }
}
