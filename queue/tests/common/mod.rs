#![allow(dead_code)]

use fibre_queue::{Full, QueueConsumer, QueueProducer};
use std::thread;
use std::time::{Duration, Instant};

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(500);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(3);
pub const ITEMS_LOW: usize = 50;
pub const ITEMS_MEDIUM: usize = 2_000;
pub const ITEMS_HIGH: usize = 100_000;

/// Offers `item`, yielding while the queue is full.
pub fn offer_spin<T, P: QueueProducer<T>>(tx: &mut P, mut item: T) {
  while let Err(Full(back)) = tx.offer(item) {
    item = back;
    thread::yield_now();
  }
}

/// Polls until an item shows up or `timeout` passes.
pub fn poll_within<T, C: QueueConsumer<T>>(rx: &mut C, timeout: Duration) -> Option<T> {
  let deadline = Instant::now() + timeout;
  loop {
    if let Some(item) = rx.poll() {
      return Some(item);
    }
    if Instant::now() >= deadline {
      return None;
    }
    thread::yield_now();
  }
}

/// Fills a queue with `1..=n`, asserting every offer succeeds.
pub fn offer_range<P: QueueProducer<u32>>(tx: &mut P, n: u32) {
  for i in 1..=n {
    assert!(tx.offer(i).is_ok(), "offer({}) rejected", i);
  }
}
