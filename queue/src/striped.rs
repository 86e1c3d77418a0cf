//! A multi-producer / single-consumer queue split across several
//! [`mpsc`](crate::mpsc) rings.
//!
//! With many producers hammering one tail, every `offer` fights over the same
//! cache line. Striping gives each producer handle a ring of its own (handles
//! are spread over the stripes round-robin as they are cloned), so producers
//! only contend with the handles that share their stripe.
//!
//! A handle always offers to its own stripe. That keeps each producer's
//! elements in order, but it also means `offer` reports [`Full`] once that
//! stripe is full, even if other stripes still have room. The consumer visits
//! the stripes in turn, so there is no ordering between different stripes.
//!
//! ```
//! use fibre_queue::{striped, QueueConsumer, QueueProducer};
//!
//! let (tx, mut rx) = striped::with_stripes::<u32>(64, 4).unwrap();
//! assert_eq!(tx.stripes(), 4);
//! let handles: Vec<_> = (0..4)
//!   .map(|p| {
//!     let mut tx = tx.clone();
//!     std::thread::spawn(move || tx.offer(p).unwrap())
//!   })
//!   .collect();
//! handles.into_iter().for_each(|h| h.join().unwrap());
//! assert_eq!(rx.drain(|_| {}), 4);
//! ```

use crate::config::QueueConfig;
use crate::error::{CapacityError, Full};
use crate::mpsc;
use crate::queue::{QueueConsumer, QueueProducer, QueueView};
use crate::ring::MAX_CAPACITY;

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Upper bound on the stripe count, whatever the caller asks for.
pub const MAX_STRIPES: usize = 1 << 16;

#[derive(Debug)]
struct Stripes<T> {
  producers: Box<[mpsc::Producer<T>]>,
  /// Stripe handed to the next cloned producer.
  next: AtomicUsize,
}

impl<T> Stripes<T> {
  #[inline]
  fn mask(&self) -> usize {
    self.producers.len() - 1
  }

  fn capacity(&self) -> usize {
    self.producers.iter().map(QueueView::capacity).sum()
  }

  fn len(&self) -> usize {
    let len: usize = self.producers.iter().map(QueueView::len).sum();
    len.min(self.capacity())
  }
}

/// A producing end of a striped queue. Clone it to add producers; each clone
/// is bound to the next stripe.
#[derive(Debug)]
pub struct Producer<T> {
  stripes: Arc<Stripes<T>>,
  own: mpsc::Producer<T>,
  index: usize,
}

impl<T> Clone for Producer<T> {
  fn clone(&self) -> Self {
    let index = self.stripes.next.fetch_add(1, Ordering::Relaxed) & self.stripes.mask();
    Producer {
      stripes: self.stripes.clone(),
      own: self.stripes.producers[index].clone(),
      index,
    }
  }
}

impl<T> Producer<T> {
  /// Number of stripes. A power of two.
  pub fn stripes(&self) -> usize {
    self.stripes.producers.len()
  }

  /// The stripe this handle offers to.
  pub fn stripe(&self) -> usize {
    self.index
  }
}

/// The consuming end of a striped queue. Not `Clone`, not `Sync`.
#[derive(Debug)]
pub struct Consumer<T> {
  consumers: Box<[mpsc::Consumer<T>]>,
  /// Stripe the next `peek`/`poll` looks at first.
  cursor: Cell<usize>,
}

/// Creates a striped queue holding at least `capacity` elements, with one
/// stripe per CPU.
///
/// # Errors
///
/// [`CapacityError`] if `capacity` is zero or too large.
pub fn queue<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  with_stripes(capacity, num_cpus::get())
}

/// Creates a striped queue with `stripes` rings.
///
/// `stripes` is clamped to `1..=MAX_STRIPES` and rounded up to a power of two.
/// The total capacity is at least `max(capacity, stripes)`, split evenly.
pub fn with_stripes<T>(
  capacity: usize,
  stripes: usize,
) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  with_config(&QueueConfig::new(capacity), stripes)
}

/// Creates a striped queue from `config`, with `stripes` rings.
pub fn with_config<T>(
  config: &QueueConfig,
  stripes: usize,
) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  if config.capacity == 0 {
    return Err(CapacityError::Zero);
  }
  if config.capacity > MAX_CAPACITY {
    return Err(CapacityError::TooLarge {
      requested: config.capacity,
      max: MAX_CAPACITY,
    });
  }
  let count = stripes.clamp(1, MAX_STRIPES).next_power_of_two();
  let per_stripe = config.capacity.max(count).div_ceil(count);
  let stripe_config = QueueConfig::new(per_stripe).with_backoff(config.backoff);

  let mut producers = Vec::with_capacity(count);
  let mut consumers = Vec::with_capacity(count);
  for _ in 0..count {
    let (tx, rx) = mpsc::with_config(&stripe_config)?;
    producers.push(tx);
    consumers.push(rx);
  }

  let stripes = Arc::new(Stripes {
    producers: producers.into_boxed_slice(),
    next: AtomicUsize::new(1),
  });
  tracing::debug!(
    kind = "striped",
    requested = config.capacity,
    stripes = count,
    capacity = stripes.capacity(),
    "queue created"
  );
  let own = stripes.producers[0].clone();
  Ok((
    Producer {
      stripes,
      own,
      index: 0,
    },
    Consumer {
      consumers: consumers.into_boxed_slice(),
      cursor: Cell::new(0),
    },
  ))
}

impl<T> QueueView for Producer<T> {
  #[inline]
  fn capacity(&self) -> usize {
    self.stripes.capacity()
  }

  fn len(&self) -> usize {
    self.stripes.len()
  }
}

impl<T> QueueProducer<T> for Producer<T> {
  /// Offers to this handle's stripe. `Full` means that stripe is full.
  #[inline]
  fn offer(&mut self, item: T) -> Result<(), Full<T>> {
    self.own.offer(item)
  }

  #[inline]
  fn relaxed_offer(&mut self, item: T) -> Result<(), Full<T>> {
    self.own.relaxed_offer(item)
  }
}

impl<T> Consumer<T> {
  #[inline]
  fn mask(&self) -> usize {
    self.consumers.len() - 1
  }

  /// Number of stripes. A power of two.
  pub fn stripes(&self) -> usize {
    self.consumers.len()
  }

  /// Returns the element the next `poll` will return, without removing it.
  ///
  /// Only this consumer removes elements, so once an element has been peeked
  /// it stays the answer of `peek` and `poll` until it is polled.
  pub fn peek(&self) -> Option<&T> {
    let start = self.cursor.get();
    for i in 0..self.consumers.len() {
      let index = start.wrapping_add(i) & self.mask();
      if let Some(item) = self.consumers[index].peek() {
        self.cursor.set(index);
        return Some(item);
      }
    }
    None
  }
}

impl<T> QueueView for Consumer<T> {
  fn capacity(&self) -> usize {
    self.consumers.iter().map(QueueView::capacity).sum()
  }

  fn len(&self) -> usize {
    let len: usize = self.consumers.iter().map(QueueView::len).sum();
    len.min(self.capacity())
  }
}

impl<T> QueueConsumer<T> for Consumer<T> {
  fn poll(&mut self) -> Option<T> {
    let start = self.cursor.get();
    for i in 0..self.consumers.len() {
      let index = start.wrapping_add(i) & self.mask();
      if let Some(item) = self.consumers[index].poll() {
        // Move on so a busy stripe cannot starve the others.
        self.cursor.set(index.wrapping_add(1) & self.mask());
        return Some(item);
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn stripe_count_and_capacity_are_normalized() {
    let (tx, rx) = with_stripes::<u8>(100, 3).unwrap();
    assert_eq!(tx.stripes(), 4);
    assert_eq!(rx.stripes(), 4);
    // 100 / 4 = 25 per stripe, rounded up to 32.
    assert_eq!(tx.capacity(), 128);
    assert_eq!(rx.capacity(), 128);

    let (tx, _rx) = with_stripes::<u8>(1, 0).unwrap();
    assert_eq!(tx.stripes(), 1);
    assert_eq!(tx.capacity(), 2);

    // Fewer slots than stripes still gives every stripe room.
    let (tx, _rx) = with_stripes::<u8>(2, 8).unwrap();
    assert_eq!(tx.capacity(), 16);

    assert_eq!(with_stripes::<u8>(0, 4).unwrap_err(), CapacityError::Zero);
    assert!(matches!(
      with_stripes::<u8>(usize::MAX, 4),
      Err(CapacityError::TooLarge { .. })
    ));
  }

  #[test]
  fn clones_are_spread_round_robin() {
    let (tx, _rx) = with_stripes::<u8>(16, 4).unwrap();
    let clones: Vec<_> = (0..5).map(|_| tx.clone()).collect();
    let stripes: Vec<_> = clones.iter().map(Producer::stripe).collect();
    assert_eq!(tx.stripe(), 0);
    assert_eq!(stripes, vec![1, 2, 3, 0, 1]);
  }

  #[test]
  fn full_stripe_rejects_while_others_have_room() {
    let (mut tx, mut rx) = with_stripes::<u32>(8, 4).unwrap();
    assert!(tx.offer(1).is_ok());
    assert!(tx.offer(2).is_ok());
    assert_eq!(tx.offer(3), Err(Full(3)));
    assert_eq!(tx.len(), 2);
    assert_eq!(tx.remaining_capacity(), 6);

    let mut other = tx.clone();
    assert!(other.offer(3).is_ok());

    let mut out = Vec::new();
    assert_eq!(rx.drain(|v| out.push(v)), 3);
    out.sort_unstable();
    assert_eq!(out, vec![1, 2, 3]);
  }

  #[test]
  fn peek_pins_the_element_poll_returns() {
    let (tx, mut rx) = with_stripes::<u32>(16, 4).unwrap();
    let mut second = tx.clone();
    let mut third = tx.clone();
    second.offer(20).unwrap();
    assert_eq!(rx.peek(), Some(&20));

    // An element turning up on an earlier stripe does not change the answer.
    let mut first = tx;
    first.offer(10).unwrap();
    third.offer(30).unwrap();
    assert_eq!(rx.peek(), Some(&20));
    assert_eq!(rx.peek(), Some(&20));
    assert_eq!(rx.poll(), Some(20));
    assert_eq!(rx.len(), 2);
  }

  #[test]
  fn poll_rotates_between_stripes() {
    let (tx, mut rx) = with_stripes::<u32>(16, 2).unwrap();
    let mut a = tx.clone();
    let mut b = tx;
    assert_ne!(a.stripe(), b.stripe());
    for i in 0..3 {
      a.offer(100 + i).unwrap();
      b.offer(200 + i).unwrap();
    }
    let mut out = Vec::new();
    rx.drain(|v| out.push(v / 100));
    assert_eq!(out.len(), 6);
    assert!(out.windows(2).all(|w| w[0] != w[1]), "{:?}", out);
  }

  #[test]
  fn producers_keep_their_own_order_across_threads() {
    const PRODUCERS: usize = 6;
    const PER_PRODUCER: usize = 2_000;

    let (tx, mut rx) = with_stripes::<(usize, usize)>(64, 4).unwrap();
    let handles: Vec<_> = (0..PRODUCERS)
      .map(|p| {
        let mut tx = tx.clone();
        thread::spawn(move || {
          for i in 0..PER_PRODUCER {
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

    let mut next = [0usize; PRODUCERS];
    let mut received = 0;
    while received < PRODUCERS * PER_PRODUCER {
      match rx.poll() {
        Some((p, i)) => {
          assert_eq!(next[p], i, "producer {} reordered", p);
          next[p] += 1;
          received += 1;
        }
        None => thread::yield_now(),
      }
    }
    for h in handles {
      h.join().unwrap();
    }
    assert!(rx.is_empty());
  }
}
