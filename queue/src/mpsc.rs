//! Multi-producer / single-consumer ring queue.
//!
//! Producers are lock-free: each one claims the next position by
//! compare-and-swapping the shared tail, writes its element into the claimed
//! slot, and then publishes it by release-storing the slot's sequence. The
//! consumer is wait-free and never touches the tail; it only looks at the
//! sequence of the slot under its own head.
//!
//! A producer can be preempted between winning its claim and publishing. The
//! consumer does not wait for it: `poll` reports `None` until the slot is
//! published, even if later positions already are. Every claim is always
//! followed by a publish, so the element shows up shortly afterwards and
//! nothing is lost.
//!
//! ```
//! use fibre_queue::{mpsc, QueueConsumer, QueueProducer};
//!
//! let (tx, mut rx) = mpsc::queue::<u64>(1024).unwrap();
//! let handles: Vec<_> = (0..4)
//!   .map(|p| {
//!     let mut tx = tx.clone();
//!     std::thread::spawn(move || {
//!       for i in 0..10 {
//!         while tx.offer(p * 100 + i).is_err() {}
//!       }
//!     })
//!   })
//!   .collect();
//! handles.into_iter().for_each(|h| h.join().unwrap());
//! assert_eq!(rx.drain(|_| {}), 40);
//! ```

use crate::config::{BackoffConfig, QueueConfig};
use crate::error::{CapacityError, Full};
use crate::internal::backoff::Backoff;
use crate::internal::cache_padded::CachePadded;
use crate::queue::{QueueConsumer, QueueProducer, QueueView};
use crate::ring::{self, Geometry, Slot, SlotState};

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct MpscRing<T> {
  /// Next position a producer may claim.
  tail: CachePadded<AtomicUsize>,
  /// Next position the consumer reads. Mirrors the consumer's private head
  /// so producers can compute `len()`.
  head: CachePadded<AtomicUsize>,
  geometry: Geometry,
  backoff: BackoffConfig,
  slots: Box<[Slot<T>]>,
}

unsafe impl<T: Send> Send for MpscRing<T> {}
unsafe impl<T: Send> Sync for MpscRing<T> {}

impl<T> MpscRing<T> {
  #[inline(always)]
  fn slot(&self, position: usize) -> &Slot<T> {
    &self.slots[self.geometry.index(position)]
  }
}

impl<T> fmt::Debug for MpscRing<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MpscRing")
      .field("capacity", &self.geometry.capacity())
      .field("head", &self.head.load(Ordering::Relaxed))
      .field("tail", &self.tail.load(Ordering::Relaxed))
      .field("backoff", &self.backoff)
      .finish_non_exhaustive()
  }
}

impl<T> Drop for MpscRing<T> {
  fn drop(&mut self) {
    let tail = *self.tail.get_mut();
    let mut head = *self.head.get_mut();
    // With every handle gone, every claim has been published.
    while head != tail {
      let index = self.geometry.index(head);
      let slot = &mut self.slots[index];
      debug_assert_eq!(
        SlotState::of(head, *slot.sequence.get_mut(), tail),
        SlotState::Published
      );
      unsafe { slot.drop_value() };
      head = head.wrapping_add(1);
    }
  }
}

/// A producing end of an MPSC queue. Clone it to add producers.
#[derive(Debug)]
pub struct Producer<T> {
  ring: Arc<MpscRing<T>>,
}

impl<T> Clone for Producer<T> {
  fn clone(&self) -> Self {
    Producer {
      ring: self.ring.clone(),
    }
  }
}

/// The consuming end of an MPSC queue. Not `Clone`, not `Sync`.
#[derive(Debug)]
pub struct Consumer<T> {
  ring: Arc<MpscRing<T>>,
  head: usize,
  _not_sync: PhantomData<*mut ()>,
}

unsafe impl<T: Send> Send for Consumer<T> {}

/// Creates an MPSC queue holding at least `capacity` elements.
///
/// # Errors
///
/// [`CapacityError`] if `capacity` is zero or too large.
pub fn queue<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  with_config(&QueueConfig::new(capacity))
}

/// Creates an MPSC queue from `config`. `config.backoff` paces producers that
/// lose a claim race.
pub fn with_config<T>(
  config: &QueueConfig,
) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  let geometry = Geometry::sequenced(config.capacity)?;
  tracing::debug!(
    kind = "mpsc",
    requested = config.capacity,
    capacity = geometry.capacity(),
    "queue created"
  );
  let ring = Arc::new(MpscRing {
    tail: CachePadded::new(AtomicUsize::new(0)),
    head: CachePadded::new(AtomicUsize::new(0)),
    geometry,
    backoff: config.backoff,
    slots: ring::sequenced_slots(geometry.capacity()),
  });
  Ok((
    Producer { ring: ring.clone() },
    Consumer {
      ring,
      head: 0,
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
    let tail = self.ring.tail.load(Ordering::Acquire);
    ring::occupancy(head, tail, self.capacity())
  }
}

impl<T> Producer<T> {
  /// Claims, writes and publishes the next position.
  ///
  /// With `persist` unset the first lost race gives up, so the call can fail
  /// while the ring still has room.
  fn push(&self, item: T, persist: bool) -> Result<(), Full<T>> {
    let ring = &*self.ring;
    let mut backoff = Backoff::new(ring.backoff);
    let mut tail = ring.tail.load(Ordering::Relaxed);

    loop {
      let slot = ring.slot(tail);
      let sequence = slot.sequence.load(Ordering::Acquire);
      let lag = ring::distance(sequence, tail);

      if lag == 0 {
        // The slot is free for `tail`; race the other producers for it.
        match ring.tail.compare_exchange_weak(
          tail,
          tail.wrapping_add(1),
          Ordering::Relaxed,
          Ordering::Relaxed,
        ) {
          Ok(_) => {
            unsafe { slot.write(item) };
            slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
            return Ok(());
          }
          Err(_) if !persist => return Err(Full(item)),
          Err(current) => {
            tail = current;
            backoff.spin();
          }
        }
      } else if lag < 0 {
        // Still holds the element from one lap ago: the consumer is a full
        // ring behind.
        return Err(Full(item));
      } else if !persist {
        return Err(Full(item));
      } else {
        // Another producer claimed `tail` since we loaded it.
        tail = ring.tail.load(Ordering::Relaxed);
      }
    }
  }
}

impl<T> QueueProducer<T> for Producer<T> {
  #[inline]
  fn offer(&mut self, item: T) -> Result<(), Full<T>> {
    self.push(item, true)
  }

  /// Makes a single claim attempt. Losing the race to another producer is
  /// reported as `Full` without retrying.
  #[inline]
  fn relaxed_offer(&mut self, item: T) -> Result<(), Full<T>> {
    self.push(item, false)
  }
}

#[cfg(test)]
impl<T> Producer<T> {
  /// Wins the next position without publishing it, like a producer that is
  /// preempted right after its CAS.
  pub(crate) fn claim_unpublished(&self) -> usize {
    self.ring.tail.fetch_add(1, Ordering::Relaxed)
  }

  /// Finishes a claim made by [`Producer::claim_unpublished`].
  pub(crate) fn publish_claimed(&self, position: usize, item: T) {
    let slot = self.ring.slot(position);
    unsafe { slot.write(item) };
    slot
      .sequence
      .store(position.wrapping_add(1), Ordering::Release);
  }
}

impl<T> Consumer<T> {
  /// Returns the head element without removing it.
  ///
  /// `None` if the head position is empty or claimed but not yet published.
  pub fn peek(&self) -> Option<&T> {
    let slot = self.ring.slot(self.head);
    if slot.sequence.load(Ordering::Acquire) != self.head.wrapping_add(1) {
      return None;
    }
    // Only this consumer frees published slots, and that needs `&mut self`.
    Some(unsafe { slot.get() })
  }

  #[cfg(test)]
  fn head_state(&self) -> SlotState {
    let sequence = self.ring.slot(self.head).sequence.load(Ordering::Acquire);
    let tail = self.ring.tail.load(Ordering::Acquire);
    SlotState::of(self.head, sequence, tail)
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
    let ring = &*self.ring;
    let head = self.head;
    let slot = ring.slot(head);

    if slot.sequence.load(Ordering::Acquire) != head.wrapping_add(1) {
      // Empty, or claimed and not yet published. Either way, don't wait.
      return None;
    }

    let item = unsafe { slot.read() };
    slot
      .sequence
      .store(head.wrapping_add(ring.geometry.capacity()), Ordering::Release);
    self.head = head.wrapping_add(1);
    ring.head.store(self.head, Ordering::Release);
    Some(item)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;
  use std::thread;

  #[test]
  fn bounded_and_fifo_for_a_single_producer() {
    let (mut tx, mut rx) = queue::<u32>(8).unwrap();
    for i in 1..=8 {
      tx.offer(i).unwrap();
    }
    assert_eq!(tx.offer(9).unwrap_err().into_inner(), 9);
    assert_eq!(rx.poll(), Some(1));
    assert_eq!(rx.len(), 7);
    let mut seen = Vec::new();
    assert_eq!(rx.drain(|v| seen.push(v)), 7);
    assert_eq!(seen, (2..=8).collect::<Vec<_>>());
  }

  #[test]
  fn claimed_but_unpublished_slot_reads_as_empty_until_published() {
    let (mut tx, mut rx) = queue::<u32>(4).unwrap();

    // A producer that won position 0 and was preempted before writing.
    let claimed = tx.claim_unpublished();
    tx.offer(7).unwrap();

    assert_eq!(rx.head_state(), SlotState::Claimed);
    assert_eq!(rx.poll(), None);
    assert!(rx.peek().is_none());
    assert_eq!(rx.len(), 2);

    tx.publish_claimed(claimed, 6);

    assert_eq!(rx.head_state(), SlotState::Published);
    assert_eq!(rx.poll(), Some(6));
    assert_eq!(rx.poll(), Some(7));
    assert_eq!(rx.head_state(), SlotState::Empty);
  }

  #[test]
  fn relaxed_offer_without_contention_behaves_like_offer() {
    let (mut tx, mut rx) = queue::<u32>(4).unwrap();
    for i in 0..4 {
      assert!(tx.relaxed_offer(i).is_ok());
    }
    assert_eq!(tx.relaxed_offer(9), Err(Full(9)));
    assert_eq!(rx.poll(), Some(0));
    assert!(tx.relaxed_offer(4).is_ok());
    let mut out = Vec::new();
    rx.drain(|v| out.push(v));
    assert_eq!(out, vec![1, 2, 3, 4]);
  }

  #[test]
  fn relaxed_offer_retried_by_callers_loses_nothing() {
    let (tx, mut rx) = queue::<usize>(8).unwrap();
    let producers: Vec<_> = (0..4)
      .map(|p| {
        let mut tx = tx.clone();
        thread::spawn(move || {
          for i in 0..500 {
            let mut item = p * 500 + i;
            while let Err(Full(back)) = tx.relaxed_offer(item) {
              item = back;
              thread::yield_now();
            }
          }
        })
      })
      .collect();
    drop(tx);

    let mut seen = HashSet::new();
    while seen.len() < 2000 {
      match rx.poll() {
        Some(v) => assert!(seen.insert(v), "duplicate {}", v),
        None => thread::yield_now(),
      }
    }
    for p in producers {
      p.join().unwrap();
    }
    assert_eq!(rx.poll(), None);
  }

  #[test]
  fn peek_does_not_consume() {
    let (mut tx, mut rx) = queue::<u32>(2).unwrap();
    tx.offer(11).unwrap();
    assert_eq!(rx.peek(), Some(&11));
    assert_eq!(rx.peek(), Some(&11));
    assert_eq!(rx.len(), 1);
    assert_eq!(rx.poll(), Some(11));
    assert_eq!(rx.peek(), None);
  }

  #[test]
  fn four_producers_no_loss_no_duplication() {
    let (tx, mut rx) = queue::<usize>(1024).unwrap();
    let producers: Vec<_> = (0..4)
      .map(|p| {
        let mut tx = tx.clone();
        thread::spawn(move || {
          for i in 0..250 {
            tx.offer(p * 250 + i).unwrap();
          }
        })
      })
      .collect();
    drop(tx);

    let mut seen = HashSet::new();
    while seen.len() < 1000 {
      if let Some(v) = rx.poll() {
        assert!(seen.insert(v), "duplicate {}", v);
      } else {
        thread::yield_now();
      }
    }
    for p in producers {
      p.join().unwrap();
    }
    assert_eq!(seen.len(), 1000);
    assert_eq!(rx.poll(), None);
  }

  #[test]
  fn wraps_many_laps_under_contention() {
    let (tx, mut rx) = queue::<(usize, usize)>(4).unwrap();
    let per_producer = 5_000;
    let producers: Vec<_> = (0..3)
      .map(|p| {
        let mut tx = tx.clone();
        thread::spawn(move || {
          for i in 0..per_producer {
            let mut item = (p, i);
            while let Err(Full(back)) = tx.offer(item) {
              item = back;
              thread::yield_now();
            }
          }
        })
      })
      .collect();
    drop(tx);

    let mut next = [0usize; 3];
    let mut received = 0;
    while received < 3 * per_producer {
      match rx.poll() {
        Some((p, i)) => {
          assert_eq!(next[p], i, "producer {} reordered", p);
          next[p] += 1;
          received += 1;
        }
        None => thread::yield_now(),
      }
    }
    for p in producers {
      p.join().unwrap();
    }
  }
}
