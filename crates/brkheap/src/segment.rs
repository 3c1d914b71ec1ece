//! The growable region behind the arena.
//!
//! A [`Segment`] behaves like a program break: it only grows or shrinks at its
//! top, and the arena never asks it for anything else. [`DataSegment`] moves
//! the real process break with `sbrk`; [`ReservedSegment`] moves a private
//! break inside one reserved mapping, which keeps it isolated from any other
//! break user in the process.

use std::ptr::NonNull;

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::HeapError;
use crate::header::round_up;
use crate::os;

/// A contiguous region that grows and shrinks at its top.
pub trait Segment {
    /// Current end of the region.
    fn current_break(&mut self) -> Result<usize, HeapError>;

    /// Grows the region by `increment` bytes and returns the previous end.
    ///
    /// On failure the region is unchanged.
    fn extend(&mut self, increment: usize) -> Result<usize, HeapError>;

    /// Shrinks the region by `decrement` bytes.
    fn retract(&mut self, decrement: usize) -> Result<(), HeapError>;
}

/// The process data segment, moved with `sbrk`.
///
/// Any other code moving the break in the same process shares this region.
/// The arena copes with interleaved growth but a concurrent foreign shrink
/// cannot be detected.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataSegment;

impl DataSegment {
    /// Handle on the process break.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Segment for DataSegment {
    fn current_break(&mut self) -> Result<usize, HeapError> {
        os::sbrk(0).ok_or(HeapError::OutOfMemory { requested: 0 })
    }

    fn extend(&mut self, increment: usize) -> Result<usize, HeapError> {
        let delta = isize::try_from(increment).map_err(|_| HeapError::OutOfMemory {
            requested: increment,
        })?;
        os::sbrk(delta).ok_or(HeapError::OutOfMemory {
            requested: increment,
        })
    }

    fn retract(&mut self, decrement: usize) -> Result<(), HeapError> {
        let delta = isize::try_from(decrement).map_err(|_| HeapError::InvalidArgument {
            reason: "retract_too_large",
        })?;
        os::sbrk(-delta)
            .map(|_| ())
            .ok_or(HeapError::InvalidArgument {
                reason: "retract_rejected",
            })
    }
}

/// A private break inside one reserved anonymous mapping.
///
/// Address space is reserved up front; pages become resident on first touch
/// and are handed back with `madvise` when the break retracts past them.
#[derive(Debug)]
pub struct ReservedSegment {
    base: NonNull<u8>,
    capacity: usize,
    used: usize,
}

// SAFETY: the segment exclusively owns its mapping; moving it between threads
// moves that ownership.
unsafe impl Send for ReservedSegment {}

impl ReservedSegment {
    /// Reserves `capacity` bytes (rounded up to whole pages).
    pub fn new(capacity: usize) -> Result<Self, HeapError> {
        let capacity = round_up(capacity, DEFAULT_PAGE_SIZE)
            .filter(|&c| c > 0)
            .ok_or(HeapError::InvalidArgument {
                reason: "reservation_size",
            })?;
        let base = os::reserve(capacity)?;
        Ok(Self {
            base,
            capacity,
            used: 0,
        })
    }

    /// First address of the reservation.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Reserved bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently below the break.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }
}

impl Segment for ReservedSegment {
    fn current_break(&mut self) -> Result<usize, HeapError> {
        Ok(self.base() + self.used)
    }

    fn extend(&mut self, increment: usize) -> Result<usize, HeapError> {
        let previous = self.base() + self.used;
        match self.used.checked_add(increment) {
            Some(next) if next <= self.capacity => {
                self.used = next;
                Ok(previous)
            }
            _ => Err(HeapError::OutOfMemory {
                requested: increment,
            }),
        }
    }

    fn retract(&mut self, decrement: usize) -> Result<(), HeapError> {
        let next = self
            .used
            .checked_sub(decrement)
            .ok_or(HeapError::InvalidArgument {
                reason: "retract_below_base",
            })?;
        let keep = round_up(next, DEFAULT_PAGE_SIZE).unwrap_or(self.capacity);
        let resident = round_up(self.used, DEFAULT_PAGE_SIZE).unwrap_or(self.capacity);
        self.used = next;
        if resident > keep {
            // SAFETY: whole pages above the new break, inside our reservation.
            unsafe { os::discard(self.base() + keep, resident - keep) };
        }
        Ok(())
    }
}

impl Drop for ReservedSegment {
    fn drop(&mut self) {
        // SAFETY: the reservation came from os::reserve with this length.
        let _ = unsafe { os::unmap(self.base, self.capacity) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_break_moves() {
        let mut seg = ReservedSegment::new(64 * 1024).unwrap();
        let base = seg.base();
        assert_eq!(base % DEFAULT_PAGE_SIZE, 0);
        assert_eq!(seg.current_break().unwrap(), base);

        assert_eq!(seg.extend(4096).unwrap(), base);
        assert_eq!(seg.extend(100).unwrap(), base + 4096);
        assert_eq!(seg.current_break().unwrap(), base + 4196);

        seg.retract(100).unwrap();
        assert_eq!(seg.current_break().unwrap(), base + 4096);
        assert_eq!(seg.used(), 4096);
    }

    #[test]
    fn reserved_extend_past_capacity_is_oom() {
        let mut seg = ReservedSegment::new(8192).unwrap();
        assert_eq!(seg.capacity(), 8192);
        seg.extend(8000).unwrap();
        assert_eq!(
            seg.extend(193),
            Err(HeapError::OutOfMemory { requested: 193 })
        );
        assert_eq!(seg.used(), 8000);
    }

    #[test]
    fn reserved_retract_below_base_rejected() {
        let mut seg = ReservedSegment::new(4096).unwrap();
        seg.extend(16).unwrap();
        assert!(seg.retract(32).is_err());
        assert_eq!(seg.used(), 16);
    }

    #[test]
    fn retracted_pages_read_back_zero() {
        let mut seg = ReservedSegment::new(4 * 4096).unwrap();
        let base = seg.extend(3 * 4096).unwrap();
        unsafe { std::ptr::write_bytes(base as *mut u8, 0x77, 3 * 4096) };
        seg.retract(2 * 4096).unwrap();
        seg.extend(2 * 4096).unwrap();
        let tail = unsafe { std::slice::from_raw_parts((base + 4096) as *const u8, 2 * 4096) };
        assert!(tail.iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_reservation_rejected() {
        assert!(ReservedSegment::new(0).is_err());
    }
}
