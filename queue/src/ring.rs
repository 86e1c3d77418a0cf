//! Index masking and slot bookkeeping shared by every ring.
//!
//! Positions are unbounded `usize` sequence numbers that wrap; the slot for a
//! position is `position & mask`. Because capacity is a power of two the
//! mapping stays consistent across the wrap at `usize::MAX`.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicUsize;

use crate::error::CapacityError;

/// Largest capacity a ring can be built with.
///
/// Sequence distances are compared as `isize`, which stays unambiguous while
/// the ring is no larger than a quarter of the sequence space.
pub const MAX_CAPACITY: usize = 1 << (usize::BITS - 2);

/// Capacity and mask of a ring, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
  capacity: usize,
  mask: usize,
}

impl Geometry {
  /// Rounds `requested` up to a power of two.
  pub(crate) fn new(requested: usize) -> Result<Self, CapacityError> {
    if requested == 0 {
      return Err(CapacityError::Zero);
    }
    if requested > MAX_CAPACITY {
      return Err(CapacityError::TooLarge {
        requested,
        max: MAX_CAPACITY,
      });
    }
    let capacity = requested.next_power_of_two();
    Ok(Geometry {
      capacity,
      mask: capacity - 1,
    })
  }

  /// Like [`Geometry::new`], but never smaller than two slots.
  ///
  /// With a single slot, "published at `p`" (`sequence == p + 1`) and "free
  /// for `p + 1`" are the same sequence value, so rings that use [`Slot`]
  /// need at least two.
  pub(crate) fn sequenced(requested: usize) -> Result<Self, CapacityError> {
    let geometry = Self::new(requested)?;
    if geometry.capacity < 2 {
      return Ok(Geometry { capacity: 2, mask: 1 });
    }
    Ok(geometry)
  }

  #[inline(always)]
  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline(always)]
  pub(crate) fn index(&self, position: usize) -> usize {
    position & self.mask
  }
}

/// Number of elements between a consumer position and a producer position.
///
/// Load `head` before `tail`; the result is clamped to `[0, capacity]` so a
/// racing observer never reports an impossible size.
#[inline]
pub(crate) fn occupancy(head: usize, tail: usize, capacity: usize) -> usize {
  let distance = tail.wrapping_sub(head) as isize;
  if distance <= 0 {
    0
  } else {
    (distance as usize).min(capacity)
  }
}

/// Signed distance `a - b` between two sequence numbers.
#[inline(always)]
pub(crate) fn distance(a: usize, b: usize) -> isize {
  a.wrapping_sub(b) as isize
}

/// Storage for one element. Whoever holds the right to the slot (the writer
/// before publication, the reader after) is the only one touching `value`.
pub(crate) type ValueCell<T> = UnsafeCell<MaybeUninit<T>>;

/// Allocates `capacity` uninitialised element cells.
pub(crate) fn cells<T>(capacity: usize) -> Box<[ValueCell<T>]> {
  (0..capacity)
    .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
    .collect()
}

/// A slot of a ring where one side is contended.
///
/// For the position `p` that maps onto this slot in the current lap:
///
/// * `sequence == p`: free, writable by whoever owns position `p`;
/// * `sequence == p + 1`: published, readable by whoever owns position `p`;
/// * `sequence == p + capacity`: consumed, free for position `p + capacity`.
pub(crate) struct Slot<T> {
  pub(crate) sequence: AtomicUsize,
  value: ValueCell<T>,
}

impl<T> Slot<T> {
  fn new(sequence: usize) -> Self {
    Slot {
      sequence: AtomicUsize::new(sequence),
      value: UnsafeCell::new(MaybeUninit::uninit()),
    }
  }

  /// # Safety
  /// The caller owns the position this slot is free for and the slot holds
  /// no live value.
  #[inline(always)]
  pub(crate) unsafe fn write(&self, item: T) {
    (*self.value.get()).write(item);
  }

  /// # Safety
  /// The caller owns the published position this slot holds. The slot is
  /// logically empty afterwards.
  #[inline(always)]
  pub(crate) unsafe fn read(&self) -> T {
    (*self.value.get()).assume_init_read()
  }

  /// # Safety
  /// The slot holds a published value that cannot be consumed while the
  /// returned reference is alive.
  #[inline(always)]
  pub(crate) unsafe fn get(&self) -> &T {
    (*self.value.get()).assume_init_ref()
  }

  /// # Safety
  /// The slot holds a published value and no other thread can reach it.
  pub(crate) unsafe fn drop_value(&mut self) {
    self.value.get_mut().assume_init_drop();
  }
}

/// Allocates `capacity` slots, each free for its first-lap position.
pub(crate) fn sequenced_slots<T>(capacity: usize) -> Box<[Slot<T>]> {
  (0..capacity).map(Slot::new).collect()
}

/// Where a position stands, as seen from the consuming side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
  /// Nobody has claimed the position yet.
  Empty,
  /// A producer won the position but has not published its element.
  Claimed,
  /// The element is written and visible.
  Published,
}

impl SlotState {
  /// Classifies `position` given its slot's `sequence` and the producer
  /// claim counter `claimed` (the next position a producer would take).
  #[inline]
  pub(crate) fn of(position: usize, sequence: usize, claimed: usize) -> SlotState {
    if sequence == position.wrapping_add(1) {
      SlotState::Published
    } else if distance(claimed, position) > 0 {
      SlotState::Claimed
    } else {
      SlotState::Empty
    }
  }
}
