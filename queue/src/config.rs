//! Construction-time settings shared by every queue flavour.
//!
//! With the `serde` feature enabled a [`QueueConfig`] can be read straight out
//! of an application's own configuration file:
//!
//! ```ignore
//! let config: QueueConfig = serde_json::from_str(r#"{ "capacity": 1024 }"#)?;
//! let (tx, rx) = fibre_queue::mpsc::with_config::<Span>(&config)?;
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a contended side retries before giving up its time slice.
///
/// Each retry spins for `2^step` pause instructions while `step <= spin_limit`,
/// then yields to the scheduler until `step` reaches `yield_limit`, after which
/// every further retry is a plain yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct BackoffConfig {
  /// Steps during which a retry busy-spins.
  pub spin_limit: u32,
  /// Step after which the backoff stops growing.
  pub yield_limit: u32,
}

impl BackoffConfig {
  /// Retries spin only briefly before yielding.
  pub const DEFAULT: BackoffConfig = BackoffConfig {
    spin_limit: 6,
    yield_limit: 10,
  };

  /// A single pause, then every retry yields. Useful when contending threads
  /// outnumber cores.
  pub const YIELD_ONLY: BackoffConfig = BackoffConfig {
    spin_limit: 0,
    yield_limit: 0,
  };
}

impl Default for BackoffConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// Settings used to build a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct QueueConfig {
  /// Requested capacity. Rounded up to the next power of two when the queue
  /// is built.
  pub capacity: usize,
  /// Retry policy for the contended side of the queue.
  #[cfg_attr(feature = "serde", serde(default))]
  pub backoff: BackoffConfig,
}

impl QueueConfig {
  /// Settings for a queue of (at least) `capacity` slots with the default
  /// backoff.
  pub const fn new(capacity: usize) -> Self {
    QueueConfig {
      capacity,
      backoff: BackoffConfig::DEFAULT,
    }
  }

  /// Replaces the retry policy.
  pub const fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
    self.backoff = backoff;
    self
  }
}
