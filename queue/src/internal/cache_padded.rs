// src/internal/cache_padded.rs

//! Cache line padding for the sequence counters.
//!
//! A producer counter and a consumer counter that share a line would bounce
//! that line between cores on every `offer`/`poll`, so each counter gets a
//! line of its own.

use core::fmt;
use core::ops::{Deref, DerefMut};



/// A value padded and aligned to (at least) one cache line.
#[cfg_attr(
  any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64"),
  repr(C, align(128))
)]
#[cfg_attr(
  not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64")),
  repr(C, align(64))
)]
#[derive(Default)]
pub(crate) struct CachePadded<T> {
  value: T,
}

impl<T> CachePadded<T> {
  #[inline]
  pub(crate) const fn new(value: T) -> Self {
    CachePadded { value }
  }

  /// The alignment used on this target.
  #[cfg(test)]
  pub(crate) const fn line_size() -> usize {
    arch::LINE
  }
}

impl<T> Deref for CachePadded<T> {
  type Target = T;
  #[inline]
  fn deref(&self) -> &T {
    &self.value
  }
}

impl<T> DerefMut for CachePadded<T> {
  #[inline]
  fn deref_mut(&mut self) -> &mut T {
    &mut self.value
  }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&self.value, f)
  }
}
