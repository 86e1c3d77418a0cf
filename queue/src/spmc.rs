//! Single-producer / multi-consumer ring queue.
//!
//! The mirror image of [`mpsc`](crate::mpsc): the producer writes and
//! publishes slots without contention, while consumers race for the shared
//! head with compare-and-swap. A consumer only claims a position whose slot is
//! already published, so a successful claim can read at once.
//!
//! The one wait on the consumer side comes from [`Consumer::peek`]. Peeking
//! clones the head element in place, so the slot is pinned for the duration
//! of the clone and a consumer that claims a pinned slot backs off until the
//! pin is released.

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

struct PinnedSlot<T> {
  slot: Slot<T>,
  /// Number of `peek` calls currently cloning this slot's element.
  pins: AtomicUsize,
}

/// Releases a pin on drop, so a panicking `Clone` cannot wedge consumers.
struct PinGuard<'a>(&'a AtomicUsize);

impl Drop for PinGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::Release);
  }
}

struct SpmcRing<T> {
  /// Next position a consumer may claim.
  head: CachePadded<AtomicUsize>,
  /// Next position the producer writes. Mirrors the producer's private tail.
  tail: CachePadded<AtomicUsize>,
  geometry: Geometry,
  backoff: BackoffConfig,
  slots: Box<[PinnedSlot<T>]>,
}

unsafe impl<T: Send> Send for SpmcRing<T> {}
unsafe impl<T: Send> Sync for SpmcRing<T> {}

impl<T> SpmcRing<T> {
  #[inline(always)]
  fn slot(&self, position: usize) -> &PinnedSlot<T> {
    &self.slots[self.geometry.index(position)]
  }

  /// Reads the element at a position this thread has just claimed and frees
  /// the slot for the next lap.
  ///
  /// # Safety
  /// `position` was claimed by a successful CAS on `head` and its slot was
  /// published.
  unsafe fn take_claimed(&self, position: usize) -> T {
    let pinned = self.slot(position);
    let mut backoff = Backoff::new(self.backoff);
    // SeqCst pairs with the pin/head check in `peek`: either that peek sees
    // our claim and backs off, or we see its pin and wait for the clone.
    while pinned.pins.load(Ordering::SeqCst) != 0 {
      backoff.snooze();
    }
    let item = pinned.slot.read();
    pinned.slot.sequence.store(
      position.wrapping_add(self.geometry.capacity()),
      Ordering::Release,
    );
    item
  }
}

impl<T> fmt::Debug for SpmcRing<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpmcRing")
      .field("capacity", &self.geometry.capacity())
      .field("head", &self.head.load(Ordering::Relaxed))
      .field("tail", &self.tail.load(Ordering::Relaxed))
      .field("backoff", &self.backoff)
      .finish_non_exhaustive()
  }
}

impl<T> Drop for SpmcRing<T> {
  fn drop(&mut self) {
    let tail = *self.tail.get_mut();
    let mut head = *self.head.get_mut();
    while head != tail {
      let index = self.geometry.index(head);
      let slot = &mut self.slots[index].slot;
      debug_assert_eq!(
        SlotState::of(head, *slot.sequence.get_mut(), tail),
        SlotState::Published
      );
      unsafe { slot.drop_value() };
      head = head.wrapping_add(1);
    }
  }
}

/// The producing end of an SPMC queue. Not `Clone`, not `Sync`.
#[derive(Debug)]
pub struct Producer<T> {
  ring: Arc<SpmcRing<T>>,
  tail: usize,
  _not_sync: PhantomData<*mut ()>,
}

unsafe impl<T: Send> Send for Producer<T> {}

/// A consuming end of an SPMC queue. Clone it to add consumers.
#[derive(Debug)]
pub struct Consumer<T> {
  ring: Arc<SpmcRing<T>>,
}

impl<T> Clone for Consumer<T> {
  fn clone(&self) -> Self {
    Consumer {
      ring: self.ring.clone(),
    }
  }
}

/// Creates an SPMC queue holding at least `capacity` elements.
///
/// # Errors
///
/// [`CapacityError`] if `capacity` is zero or too large.
pub fn queue<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  with_config(&QueueConfig::new(capacity))
}

/// Creates an SPMC queue from `config`. `config.backoff` paces consumers that
/// lose a claim race or wait on a pinned slot.
pub fn with_config<T>(
  config: &QueueConfig,
) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  let geometry = Geometry::sequenced(config.capacity)?;
  tracing::debug!(
    kind = "spmc",
    requested = config.capacity,
    capacity = geometry.capacity(),
    "queue created"
  );
  let slots = ring::sequenced_slots(geometry.capacity())
    .into_vec()
    .into_iter()
    .map(|slot| PinnedSlot {
      slot,
      pins: AtomicUsize::new(0),
    })
    .collect();
  let ring = Arc::new(SpmcRing {
    head: CachePadded::new(AtomicUsize::new(0)),
    tail: CachePadded::new(AtomicUsize::new(0)),
    geometry,
    backoff: config.backoff,
    slots,
  });
  Ok((
    Producer {
      ring: ring.clone(),
      tail: 0,
      _not_sync: PhantomData,
    },
    Consumer { ring },
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
    let tail = self.tail;
    let pinned = self.ring.slot(tail);

    // Anything but "free for `tail`" means a consumer has yet to claim or
    // finish reading the element from the previous lap.
    if pinned.slot.sequence.load(Ordering::Acquire) != tail {
      return Err(Full(item));
    }

    unsafe { pinned.slot.write(item) };
    pinned
      .slot
      .sequence
      .store(tail.wrapping_add(1), Ordering::Release);
    self.tail = tail.wrapping_add(1);
    self.ring.tail.store(self.tail, Ordering::Release);
    Ok(())
  }
}

impl<T> Consumer<T> {
  /// Returns a clone of the head element without removing it.
  ///
  /// Another consumer may take the element right after this returns, so a
  /// following `poll` on this handle can yield a later element.
  pub fn peek(&self) -> Option<T>
  where
    T: Clone + Sync,
  {
    let ring = &*self.ring;
    let mut head = ring.head.load(Ordering::SeqCst);
    loop {
      let pinned = ring.slot(head);
      let lag = ring::distance(
        pinned.slot.sequence.load(Ordering::Acquire),
        head.wrapping_add(1),
      );
      if lag < 0 {
        return None;
      }
      if lag == 0 {
        pinned.pins.fetch_add(1, Ordering::SeqCst);
        let _pin = PinGuard(&pinned.pins);
        let current = ring.head.load(Ordering::SeqCst);
        if current == head {
          // Unclaimed and pinned: no consumer can move it out until the pin
          // is dropped.
          return Some(unsafe { pinned.slot.get() }.clone());
        }
        head = current;
      } else {
        head = ring.head.load(Ordering::SeqCst);
      }
    }
  }
}

impl<T> QueueView for Consumer<T> {
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

impl<T> QueueConsumer<T> for Consumer<T> {
  fn poll(&mut self) -> Option<T> {
    let ring = &*self.ring;
    let mut backoff = Backoff::new(ring.backoff);
    let mut head = ring.head.load(Ordering::Relaxed);

    loop {
      let pinned = ring.slot(head);
      let sequence = pinned.slot.sequence.load(Ordering::Acquire);
      let lag = ring::distance(sequence, head.wrapping_add(1));

      if lag == 0 {
        match ring.head.compare_exchange_weak(
          head,
          head.wrapping_add(1),
          Ordering::SeqCst,
          Ordering::Relaxed,
        ) {
          Ok(_) => return Some(unsafe { ring.take_claimed(head) }),
          Err(current) => {
            head = current;
            backoff.spin();
          }
        }
      } else if lag < 0 {
        // Not yet published.
        return None;
      } else {
        // Another consumer took `head` since we loaded it.
        head = ring.head.load(Ordering::Relaxed);
      }
    }
  }
}
