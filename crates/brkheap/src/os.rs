//! Operating-system memory primitives.
//!
//! Thin wrappers over `sbrk`, `mmap`, `munmap` and `madvise`. Each failure is
//! reported as [`HeapError::OutOfMemory`] carrying the requested byte count.

use std::ptr::{self, NonNull};

use crate::error::HeapError;

/// Moves the process break by `increment` bytes (may be negative).
///
/// Returns the break value before the move.
pub(crate) fn sbrk(increment: isize) -> Option<usize> {
    // SAFETY: sbrk has no memory-safety preconditions of its own; handing out
    // the bytes it returns is the caller's job.
    let previous = unsafe { libc::sbrk(increment as libc::intptr_t) };
    if previous as isize == -1 {
        None
    } else {
        Some(previous as usize)
    }
}

/// Maps `len` bytes of private, anonymous, zero-filled read/write memory.
pub(crate) fn map_anonymous(len: usize) -> Result<NonNull<u8>, HeapError> {
    map_with_flags(len, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS)
}

/// Reserves `len` bytes of address space without committing swap for it.
pub(crate) fn reserve(len: usize) -> Result<NonNull<u8>, HeapError> {
    map_with_flags(
        len,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
    )
}

fn map_with_flags(len: usize, flags: libc::c_int) -> Result<NonNull<u8>, HeapError> {
    let protection = libc::PROT_READ | libc::PROT_WRITE;
    // SAFETY: anonymous mapping with a null hint never aliases existing memory.
    match unsafe { libc::mmap(ptr::null_mut(), len, protection, flags, -1, 0) } {
        libc::MAP_FAILED => Err(HeapError::OutOfMemory { requested: len }),
        addr => NonNull::new(addr.cast::<u8>()).ok_or(HeapError::OutOfMemory { requested: len }),
    }
}

/// Returns a mapping to the operating system.
///
/// # Safety
///
/// `[addr, addr + len)` must be a mapping obtained from [`map_anonymous`] or
/// [`reserve`] that nothing references anymore.
pub(crate) unsafe fn unmap(addr: NonNull<u8>, len: usize) -> Result<(), HeapError> {
    if unsafe { libc::munmap(addr.as_ptr().cast(), len) } == 0 {
        Ok(())
    } else {
        Err(HeapError::InvalidArgument {
            reason: "munmap_rejected",
        })
    }
}

/// Lets the kernel drop the physical pages behind `[addr, addr + len)`.
///
/// # Safety
///
/// The range must be page aligned, inside a private anonymous mapping, and
/// hold no data anybody still needs. Later reads observe zeroes.
pub(crate) unsafe fn discard(addr: usize, len: usize) {
    if len == 0 {
        return;
    }
    // Advisory only; failure leaves the pages resident, which is harmless.
    unsafe {
        libc::madvise(addr as *mut libc::c_void, len, libc::MADV_DONTNEED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_is_zeroed_and_writable() {
        let len = 3 * 4096;
        let base = map_anonymous(len).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts_mut(base.as_ptr(), len) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[len - 1] = 0x5A;
        assert_eq!(bytes[len - 1], 0x5A);
        unsafe { unmap(base, len).unwrap() };
    }

    #[test]
    fn map_absurd_size_fails() {
        assert_eq!(
            map_anonymous(usize::MAX & !4095),
            Err(HeapError::OutOfMemory {
                requested: usize::MAX & !4095
            })
        );
    }

    #[test]
    fn sbrk_zero_reports_break() {
        assert!(sbrk(0).is_some());
    }
}
