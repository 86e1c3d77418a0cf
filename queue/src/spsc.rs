//! Single-producer / single-consumer ring queue.
//!
//! Wait-free on both sides: each counter has exactly one writer, so there is
//! no compare-and-swap anywhere. The producer writes a slot and then
//! release-stores the advanced tail; the consumer acquire-loads the tail, reads
//! the slot, and release-stores the advanced head so the producer can reuse it.
//!
//! Each handle keeps a private copy of the other side's counter and only
//! re-reads the shared one when that copy says "full" (producer) or "empty"
//! (consumer), which keeps cross-core traffic off the common path.
//!
//! ```
//! use fibre_queue::{spsc, QueueConsumer, QueueProducer};
//!
//! let (mut tx, mut rx) = spsc::queue::<u32>(8).unwrap();
//! tx.offer(1).unwrap();
//! assert_eq!(rx.poll(), Some(1));
//! assert_eq!(rx.poll(), None);
//! ```

use crate::config::QueueConfig;
use crate::error::{CapacityError, Full};
use crate::internal::cache_padded::CachePadded;
use crate::queue::{QueueConsumer, QueueProducer, QueueView};
use crate::ring::{self, Geometry, ValueCell};

use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct SpscRing<T> {
  /// Next position to read. Written only by the consumer.
  head: CachePadded<AtomicUsize>,
  /// Next position to write. Written only by the producer.
  tail: CachePadded<AtomicUsize>,
  geometry: Geometry,
  buffer: Box<[ValueCell<T>]>,
}

// Slots are only touched by the side that currently owns them, and ownership
// is handed over through the head/tail release/acquire pairs.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
  #[inline(always)]
  fn cell(&self, position: usize) -> *mut MaybeUninit<T> {
    self.buffer[self.geometry.index(position)].get()
  }
}

impl<T> fmt::Debug for SpscRing<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpscRing")
      .field("capacity", &self.geometry.capacity())
      .field("head", &self.head.load(Ordering::Relaxed))
      .field("tail", &self.tail.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl<T> Drop for SpscRing<T> {
  fn drop(&mut self) {
    let tail = *self.tail.get_mut();
    let mut head = *self.head.get_mut();
    while head != tail {
      unsafe { (*self.cell(head)).assume_init_drop() };
      head = head.wrapping_add(1);
    }
  }
}

/// The producing end of an SPSC queue. Not `Clone`, not `Sync`.
#[derive(Debug)]
pub struct Producer<T> {
  ring: Arc<SpscRing<T>>,
  tail: usize,
  cached_head: usize,
  // Keeps the handle !Sync: only one thread may produce.
  _not_sync: PhantomData<*mut ()>,
}

/// The consuming end of an SPSC queue. Not `Clone`, not `Sync`.
#[derive(Debug)]
pub struct Consumer<T> {
  ring: Arc<SpscRing<T>>,
  head: usize,
  cached_tail: usize,
  _not_sync: PhantomData<*mut ()>,
}

unsafe impl<T: Send> Send for Producer<T> {}
unsafe impl<T: Send> Send for Consumer<T> {}

/// Creates an SPSC queue holding at least `capacity` elements.
///
/// # Errors
///
/// [`CapacityError`] if `capacity` is zero or too large.
pub fn queue<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  with_config(&QueueConfig::new(capacity))
}

/// Creates an SPSC queue from `config`.
///
/// Neither side ever retries, so `config.backoff` is not used.
pub fn with_config<T>(
  config: &QueueConfig,
) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  let geometry = Geometry::new(config.capacity)?;
  tracing::debug!(
    kind = "spsc",
    requested = config.capacity,
    capacity = geometry.capacity(),
    "queue created"
  );
  let ring = Arc::new(SpscRing {
    head: CachePadded::new(AtomicUsize::new(0)),
    tail: CachePadded::new(AtomicUsize::new(0)),
    geometry,
    buffer: ring::cells(geometry.capacity()),
  });
  Ok((
    Producer {
      ring: ring.clone(),
      tail: 0,
      cached_head: 0,
      _not_sync: PhantomData,
    },
    Consumer {
      ring,
      head: 0,
      cached_tail: 0,
      _not_sync: PhantomData,
    },
  ))
}

impl<T> QueueView for Producer<T> {
  #[inline]
  fn capacity(&self) -> usize {
    self.ring.geometry.capacity()
  }

  fn len(&self) -> usize {
    let head = self.ring.head.load(Ordering::Acquire);
    ring::occupancy(head, self.tail, self.capacity())
  }
}

impl<T> QueueProducer<T> for Producer<T> {
  fn offer(&mut self, item: T) -> Result<(), Full<T>> {
    let capacity = self.ring.geometry.capacity();
    let tail = self.tail;

    if tail.wrapping_sub(self.cached_head) == capacity {
      // Acquire pairs with the consumer's release of `head`: the slot we are
      // about to overwrite has been fully read.
      self.cached_head = self.ring.head.load(Ordering::Acquire);
      if tail.wrapping_sub(self.cached_head) == capacity {
        return Err(Full(item));
      }
    }

    unsafe { (*self.ring.cell(tail)).write(item) };
    self.tail = tail.wrapping_add(1);
    self.ring.tail.store(self.tail, Ordering::Release);
    Ok(())
  }
}

impl<T> Consumer<T> {
  /// Returns the head element without removing it.
  ///
  /// The reference stays valid until the next `poll`, which needs `&mut self`.
  pub fn peek(&self) -> Option<&T> {
    let head = self.head;
    if self.cached_tail == head && self.ring.tail.load(Ordering::Acquire) == head {
      return None;
    }
    Some(unsafe { (*self.ring.cell(head)).assume_init_ref() })
  }
}

impl<T> QueueView for Consumer<T> {
  #[inline]
  fn capacity(&self) -> usize {
    self.ring.geometry.capacity()
  }

  fn len(&self) -> usize {
    let tail = self.ring.tail.load(Ordering::Acquire);
    ring::occupancy(self.head, tail, self.capacity())
  }
}

impl<T> QueueConsumer<T> for Consumer<T> {
  fn poll(&mut self) -> Option<T> {
    let head = self.head;

    if head == self.cached_tail {
      self.cached_tail = self.ring.tail.load(Ordering::Acquire);
      if head == self.cached_tail {
        return None;
      }
    }

    let item = unsafe { (*self.ring.cell(head)).assume_init_read() };
    self.head = head.wrapping_add(1);
    self.ring.head.store(self.head, Ordering::Release);
    Some(item)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::Filled;

  #[derive(Debug)]
  struct DropCounter(Arc<AtomicUsize>);
  impl Drop for DropCounter {
    fn drop(&mut self) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn offer_fails_exactly_when_full() {
    let (mut tx, mut rx) = queue::<u32>(8).unwrap();
    for i in 1..=8 {
      assert!(tx.offer(i).is_ok());
    }
    assert!(tx.is_full());
    assert_eq!(tx.offer(9), Err(Full(9)));
    assert_eq!(rx.poll(), Some(1));
    assert_eq!(rx.len(), 7);
    assert_eq!(tx.len(), 7);
    assert!(tx.offer(9).is_ok());
  }

  #[test]
  fn capacity_is_normalized() {
    let (tx, rx) = queue::<u8>(5).unwrap();
    assert_eq!(tx.capacity(), 8);
    assert_eq!(rx.capacity(), 8);
    assert_eq!(queue::<u8>(0).unwrap_err(), CapacityError::Zero);
  }

  #[test]
  fn producer_cache_refreshes_after_consumer_progress() {
    let (mut tx, mut rx) = queue::<usize>(2).unwrap();
    // Several full laps so both cached counters go stale repeatedly.
    for lap in 0..10 {
      tx.offer(lap * 2).unwrap();
      tx.offer(lap * 2 + 1).unwrap();
      assert!(tx.offer(usize::MAX).is_err());
      assert_eq!(rx.poll(), Some(lap * 2));
      assert_eq!(rx.poll(), Some(lap * 2 + 1));
      assert_eq!(rx.poll(), None);
    }
  }

  #[test]
  fn peek_is_idempotent() {
    let (mut tx, mut rx) = queue::<String>(4).unwrap();
    assert!(rx.peek().is_none());
    tx.offer("a".to_string()).unwrap();
    tx.offer("b".to_string()).unwrap();
    assert_eq!(rx.peek().map(String::as_str), Some("a"));
    assert_eq!(rx.peek().map(String::as_str), Some("a"));
    assert_eq!(rx.len(), 2);
    assert_eq!(rx.poll().as_deref(), Some("a"));
    assert_eq!(rx.peek().map(String::as_str), Some("b"));
  }

  #[test]
  fn clear_resets_occupancy_but_not_capacity() {
    let (mut tx, mut rx) = queue::<u32>(4).unwrap();
    let filled = tx.fill(|| Some(1), 4);
    assert_eq!(
      filled,
      Filled {
        inserted: 4,
        rejected: None
      }
    );
    assert_eq!(rx.clear(), 4);
    assert!(rx.is_empty());
    assert_eq!(rx.capacity(), 4);
    assert!(tx.offer(5).is_ok());
    assert_eq!(rx.poll(), Some(5));
  }

  #[test]
  fn leftover_items_are_dropped_with_the_queue() {
    let drops = Arc::new(AtomicUsize::new(0));
    let (mut tx, mut rx) = queue(4).unwrap();
    for _ in 0..3 {
      tx.offer(DropCounter(drops.clone())).unwrap();
    }
    drop(rx.poll());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    drop(tx);
    drop(rx);
    assert_eq!(drops.load(Ordering::SeqCst), 3);
  }
}
