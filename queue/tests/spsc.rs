mod common;
use common::*;

use fibre_queue::spsc;
use fibre_queue::{QueueConsumer, QueueProducer, QueueView};
use std::thread;

#[test]
fn threaded_fifo_through_small_ring() {
  let (mut tx, mut rx) = spsc::queue::<usize>(16).unwrap();

  let producer = thread::spawn(move || {
    for i in 0..ITEMS_HIGH {
      offer_spin(&mut tx, i);
    }
  });

  for expected in 0..ITEMS_HIGH {
    let got = poll_within(&mut rx, LONG_TIMEOUT).expect("producer stalled");
    assert_eq!(got, expected);
  }
  producer.join().unwrap();
  assert!(rx.poll().is_none());
}

#[test]
fn batch_fill_and_drain_across_threads() {
  let (mut tx, mut rx) = spsc::queue::<usize>(64).unwrap();

  let producer = thread::spawn(move || {
    let mut next = 0;
    while next < ITEMS_MEDIUM {
      let start = next;
      let filled = tx.fill(
        || {
          if next < ITEMS_MEDIUM {
            next += 1;
            Some(next - 1)
          } else {
            None
          }
        },
        32,
      );
      // A rejected item was produced but not stored; offer it again.
      if let Some(item) = filled.rejected {
        offer_spin(&mut tx, item);
      }
      if next == start {
        thread::yield_now();
      }
    }
  });

  let mut seen = Vec::with_capacity(ITEMS_MEDIUM);
  while seen.len() < ITEMS_MEDIUM {
    if rx.drain_limited(|v| seen.push(v), 16) == 0 {
      thread::yield_now();
    }
  }
  producer.join().unwrap();
  assert_eq!(seen, (0..ITEMS_MEDIUM).collect::<Vec<_>>());
}

#[test]
fn len_is_seen_consistently_from_both_handles() {
  let (mut tx, mut rx) = spsc::queue::<u8>(4).unwrap();
  assert!(tx.is_empty() && rx.is_empty());
  offer_range_u8(&mut tx, 3);
  assert_eq!(tx.len(), 3);
  assert_eq!(rx.len(), 3);
  rx.poll();
  assert_eq!(tx.len(), 2);
}

fn offer_range_u8<P: QueueProducer<u8>>(tx: &mut P, n: u8) {
  for i in 0..n {
    assert!(tx.offer(i).is_ok());
  }
}
