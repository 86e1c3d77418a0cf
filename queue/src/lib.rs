#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Fixed-capacity, array-backed queues for handing work between threads.
//!
//! Every flavour is a power-of-two ring buffer that never allocates after
//! construction and never takes a lock on `offer` or `poll`:
//!
//! | module | producers | consumers | progress |
//! |---|---|---|---|
//! | [`spsc`] | 1 | 1 | wait-free both sides |
//! | [`mpsc`] | many | 1 | lock-free producers, wait-free consumer |
//! | [`spmc`] | 1 | many | wait-free producer, lock-free consumers |
//! | [`blocking`] | many | 1 | as `mpsc`, plus blocking `take`/`poll_timeout` |
//! | [`striped`] | many | 1 | `mpsc` split into per-producer stripes |
//!
//! Each module's `queue(capacity)` returns a producer and a consumer handle.
//! Handles for a side that admits several threads are `Clone`; the others are
//! not, so a queue cannot be used with the wrong cardinality.
//!
//! Full and empty are ordinary outcomes, not errors: `offer` hands the item
//! back in [`Full`] and `poll` returns `None`. The only errors are a bad
//! capacity at construction ([`CapacityError`]) and a cancelled blocking wait
//! ([`Interrupted`]).

pub mod blocking;
pub mod config;
pub mod error;
pub mod mpsc;
pub mod queue;
pub mod spmc;
pub mod spsc;
pub mod striped;

mod internal;
mod ring;

pub use config::{BackoffConfig, QueueConfig};
pub use error::{CapacityError, Full, Interrupted};
pub use queue::{Filled, QueueConsumer, QueueProducer, QueueView};
pub use ring::MAX_CAPACITY;

// Helper function to check if a type is Send + Sync.
#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}

#[allow(dead_code)]
fn assert_send<T: Send>() {}

#[allow(dead_code)]
fn handles_cross_threads() {
  assert_send::<spsc::Producer<String>>();
  assert_send::<spsc::Consumer<String>>();
  assert_send_sync::<mpsc::Producer<String>>();
  assert_send::<mpsc::Consumer<String>>();
  assert_send::<spmc::Producer<String>>();
  assert_send_sync::<spmc::Consumer<String>>();
  assert_send_sync::<blocking::Producer<String>>();
  assert_send::<blocking::Consumer<String>>();
  assert_send_sync::<blocking::Interrupter>();
  assert_send_sync::<striped::Producer<String>>();
  assert_send::<striped::Consumer<String>>();
}
