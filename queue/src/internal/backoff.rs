use std::thread;

use crate::config::BackoffConfig;

// Caps a single spin round at 1024 pause instructions whatever the config says.
const MAX_SPIN_SHIFT: u32 = 10;

/// Emits a CPU instruction that signals the processor that it is in a spin loop.
#[inline(always)]
fn spin_hint() {
  std::hint::spin_loop();
}

/// Escalating retry helper: busy-spin first, then yield.
///
/// Never parks. Everything that waits with a `Backoff` is waiting on another
/// thread that is already inside a short, non-blocking critical step (a CAS
/// winner, or a `peek` cloning a slot), so giving up the time slice is enough.
#[derive(Debug)]
pub(crate) struct Backoff {
  step: u32,
  config: BackoffConfig,
}

impl Backoff {
  #[inline]
  pub(crate) fn new(config: BackoffConfig) -> Self {
    Backoff { step: 0, config }
  }

  /// Backs off after losing a CAS race. Spins only; the winner has already
  /// made progress so the retry is expected to succeed soon.
  #[inline]
  pub(crate) fn spin(&mut self) {
    let exp = self.step.min(self.config.spin_limit).min(MAX_SPIN_SHIFT);
    for _ in 0..1u32 << exp {
      spin_hint();
    }
    if self.step <= self.config.spin_limit {
      self.step += 1;
    }
  }

  /// Backs off while waiting for another thread to finish a step. Spins at
  /// first, then yields.
  pub(crate) fn snooze(&mut self) {
    if self.step <= self.config.spin_limit {
      for _ in 0..1u32 << self.step.min(MAX_SPIN_SHIFT) {
        spin_hint();
      }
    } else {
      thread::yield_now();
    }
    if self.step <= self.config.yield_limit {
      self.step += 1;
    }
  }
}
