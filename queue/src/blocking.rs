//! An MPSC queue whose consumer can block.
//!
//! The ring underneath is the lock-free [`mpsc`](crate::mpsc) ring; nothing
//! here guards it. A `parking_lot` mutex and condvar exist only so an idle
//! consumer has somewhere to sleep, and producers touch them only when a
//! consumer has registered as waiting.
//!
//! Missed wakeups are ruled out by check-wait-recheck: the consumer takes the
//! lock, registers, fences, and looks at the queue once more before it waits.
//! A producer publishes, fences, and then reads the registration. Whichever
//! side goes second sees the other, and a producer that sees a waiter must take
//! the lock to notify, which it can only do once the consumer is actually
//! waiting.
//!
//! ```
//! use fibre_queue::{blocking, QueueProducer};
//!
//! let (mut tx, mut rx) = blocking::queue::<u32>(4).unwrap();
//! let worker = std::thread::spawn(move || rx.take());
//! tx.offer(123).unwrap();
//! assert_eq!(worker.join().unwrap(), Ok(123));
//! ```

use crate::config::QueueConfig;
use crate::error::{CapacityError, Full, Interrupted};
use crate::internal::cache_padded::CachePadded;
use crate::mpsc;
use crate::queue::{QueueConsumer, QueueProducer, QueueView};

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{self, AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Parking state shared by the producers, the consumer and its interrupters.
struct Signal {
  waiting: CachePadded<AtomicUsize>,
  interrupted: AtomicBool,
  lock: Mutex<()>,
  ready: Condvar,
}

impl Signal {
  fn new() -> Self {
    Signal {
      waiting: CachePadded::new(AtomicUsize::new(0)),
      interrupted: AtomicBool::new(false),
      lock: Mutex::new(()),
      ready: Condvar::new(),
    }
  }

  /// Called by producers after a successful publish.
  #[inline]
  fn notify_if_waiting(&self) {
    atomic::fence(Ordering::SeqCst);
    if self.waiting.load(Ordering::Relaxed) > 0 {
      let _guard = self.lock.lock();
      self.ready.notify_all();
    }
  }

  /// Consumes a pending interrupt, if any.
  #[inline]
  fn take_interrupt(&self) -> Result<(), Interrupted> {
    if self.interrupted.load(Ordering::Relaxed) && self.interrupted.swap(false, Ordering::AcqRel) {
      tracing::debug!("blocking wait interrupted");
      return Err(Interrupted);
    }
    Ok(())
  }
}

impl fmt::Debug for Signal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Signal")
      .field("waiting", &self.waiting.load(Ordering::Relaxed))
      .field("interrupted", &self.interrupted.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

/// A producing end of a blocking-consumer queue. Clone it to add producers.
///
/// `offer` never blocks; it wakes the consumer if one is waiting.
#[derive(Debug)]
pub struct Producer<T> {
  inner: mpsc::Producer<T>,
  signal: Arc<Signal>,
}

impl<T> Clone for Producer<T> {
  fn clone(&self) -> Self {
    Producer {
      inner: self.inner.clone(),
      signal: self.signal.clone(),
    }
  }
}

/// The consuming end of a blocking-consumer queue. Not `Clone`.
#[derive(Debug)]
pub struct Consumer<T> {
  inner: mpsc::Consumer<T>,
  signal: Arc<Signal>,
}

/// Cancels the blocking calls of one [`Consumer`].
///
/// Obtained from [`Consumer::interrupter`]; may be cloned and sent to any
/// thread.
#[derive(Debug, Clone)]
pub struct Interrupter {
  signal: Arc<Signal>,
}

impl Interrupter {
  /// Interrupts the consumer's current blocking call, or the next one that
  /// finds the queue empty. The call returns [`Interrupted`] and consumes
  /// nothing. Calls that find an element return it and leave the interrupt
  /// pending.
  ///
  /// Interrupts do not stack: several calls before the consumer notices are
  /// reported once.
  pub fn interrupt(&self) {
    self.signal.interrupted.store(true, Ordering::SeqCst);
    let _guard = self.signal.lock.lock();
    self.signal.ready.notify_all();
  }

  /// Returns `true` if an interrupt is pending.
  pub fn is_pending(&self) -> bool {
    self.signal.interrupted.load(Ordering::Acquire)
  }
}

/// Creates a blocking-consumer queue holding at least `capacity` elements.
///
/// # Errors
///
/// [`CapacityError`] if `capacity` is zero or too large.
pub fn queue<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  with_config(&QueueConfig::new(capacity))
}

/// Creates a blocking-consumer queue from `config`.
pub fn with_config<T>(
  config: &QueueConfig,
) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
  let (tx, rx) = mpsc::with_config(config)?;
  let signal = Arc::new(Signal::new());
  Ok((
    Producer {
      inner: tx,
      signal: signal.clone(),
    },
    Consumer { inner: rx, signal },
  ))
}

impl<T> QueueView for Producer<T> {
  #[inline]
  fn capacity(&self) -> usize {
    self.inner.capacity()
  }

  #[inline]
  fn len(&self) -> usize {
    self.inner.len()
  }
}

impl<T> QueueProducer<T> for Producer<T> {
  fn offer(&mut self, item: T) -> Result<(), Full<T>> {
    self.inner.offer(item)?;
    self.signal.notify_if_waiting();
    Ok(())
  }

  fn relaxed_offer(&mut self, item: T) -> Result<(), Full<T>> {
    self.inner.relaxed_offer(item)?;
    self.signal.notify_if_waiting();
    Ok(())
  }
}

impl<T> Consumer<T> {
  /// Returns the head element without removing it. Never blocks.
  pub fn peek(&self) -> Option<&T> {
    self.inner.peek()
  }

  /// Returns a handle that can cancel this consumer's blocking calls.
  pub fn interrupter(&self) -> Interrupter {
    Interrupter {
      signal: self.signal.clone(),
    }
  }

  /// Removes and returns the head element, blocking until one is available.
  ///
  /// # Errors
  ///
  /// [`Interrupted`] if an [`Interrupter`] fired and the queue was empty, or
  /// fired during the wait. Nothing is consumed in that case.
  pub fn take(&mut self) -> Result<T, Interrupted> {
    loop {
      if let Some(item) = self.wait(None)? {
        return Ok(item);
      }
    }
  }

  /// Removes and returns the head element, blocking for at most `timeout`.
  ///
  /// Returns `Ok(None)` once `timeout` has fully elapsed with nothing to take.
  ///
  /// # Errors
  ///
  /// [`Interrupted`] if an [`Interrupter`] fired before or during the wait.
  pub fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<T>, Interrupted> {
    // A timeout too large to represent as an instant is just "forever".
    let deadline = Instant::now().checked_add(timeout);
    match deadline {
      Some(deadline) => self.wait(Some(deadline)),
      None => self.take().map(Some),
    }
  }

  /// The check-wait-recheck loop behind `take` and `poll_timeout`.
  ///
  /// Returns `Ok(None)` only when `deadline` is set and has passed.
  fn wait(&mut self, deadline: Option<Instant>) -> Result<Option<T>, Interrupted> {
    loop {
      if let Some(item) = self.inner.poll() {
        return Ok(Some(item));
      }
      // Only a call that would otherwise wait reports the interrupt.
      self.signal.take_interrupt()?;
      if deadline.is_some_and(|d| Instant::now() >= d) {
        return Ok(None);
      }

      let mut guard = self.signal.lock.lock();
      self.signal.waiting.fetch_add(1, Ordering::SeqCst);
      atomic::fence(Ordering::SeqCst);

      // Re-check after registering: an offer that published before we
      // registered would not have signalled us.
      let ready =
        self.inner.peek().is_some() || self.signal.interrupted.load(Ordering::SeqCst);
      if !ready {
        tracing::trace!(?deadline, "consumer parking");
        match deadline {
          Some(deadline) => {
            let _ = self.signal.ready.wait_until(&mut guard, deadline);
          }
          None => self.signal.ready.wait(&mut guard),
        }
        tracing::trace!("consumer woke");
      }

      self.signal.waiting.fetch_sub(1, Ordering::SeqCst);
      drop(guard);
    }
  }
}

impl<T> QueueView for Consumer<T> {
  #[inline]
  fn capacity(&self) -> usize {
    self.inner.capacity()
  }

  #[inline]
  fn len(&self) -> usize {
    self.inner.len()
  }
}

impl<T> QueueConsumer<T> for Consumer<T> {
  #[inline]
  fn poll(&mut self) -> Option<T> {
    self.inner.poll()
  }
}
