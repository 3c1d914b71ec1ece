//! ABI layer for the allocation family (`malloc`, `calloc`, `realloc`, `free`,
//! `malloc_usable_size`, and the aligned variants `posix_memalign`,
//! `aligned_alloc`, `memalign`).
//!
//! All entry points share one heap on the process data segment. Pointers the
//! heap never handed out are rejected with `EINVAL` instead of being
//! dereferenced.

use std::ffi::{c_int, c_void};
use std::ptr::{self, NonNull};

use brkheap::{DataSegment, SpinHeap};

use crate::errno::{errno_for, report};

static HEAP: SpinHeap<DataSegment> = SpinHeap::new(DataSegment::new());

/// The heap behind every entry point in this module.
#[must_use]
pub fn process_heap() -> &'static SpinHeap<DataSegment> {
    &HEAP
}

#[inline]
fn out(result: Result<Option<NonNull<u8>>, brkheap::HeapError>) -> *mut c_void {
    match result {
        Ok(Some(p)) => p.as_ptr().cast(),
        Ok(None) => ptr::null_mut(),
        Err(err) => {
            report(err);
            ptr::null_mut()
        }
    }
}

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// POSIX `malloc`: at least `size` bytes of uninitialized, 16-byte aligned
/// memory. `malloc(0)` returns null.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    out(HEAP.acquire(size))
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// POSIX `free`. `free(NULL)` is a no-op; unknown pointers and double frees
/// set `errno` to `EINVAL` and change nothing.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    // SAFETY: caller hands the block back; the heap validates ownership.
    if let Err(err) = unsafe { HEAP.release(NonNull::new(ptr.cast())) } {
        report(err);
    }
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// POSIX `calloc`: `nmemb * size` zeroed bytes. An overflowing product
/// returns null with `errno` set to `EINVAL`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    out(HEAP.zero_allocate(nmemb, size))
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// POSIX `realloc`.
///
/// `realloc(NULL, n)` is `malloc(n)`; `realloc(p, 0)` frees `p` and returns
/// null. On failure the original block is untouched.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: caller owns `ptr`; the heap validates it before touching memory.
    out(unsafe { HEAP.reallocate(NonNull::new(ptr.cast()), size) })
}

// ---------------------------------------------------------------------------
// malloc_usable_size
// ---------------------------------------------------------------------------

/// GNU `malloc_usable_size`: usable bytes of a live block, 0 for null or
/// rejected pointers.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return 0;
    };
    HEAP.usable_size(ptr).unwrap_or_else(|err| {
        report(err);
        0
    })
}

// ---------------------------------------------------------------------------
// posix_memalign
// ---------------------------------------------------------------------------

/// POSIX `posix_memalign`: stores a block of at least `size` bytes aligned to
/// `alignment` in `*memptr`.
///
/// `alignment` must be a power of two and a multiple of `sizeof(void *)`,
/// otherwise `EINVAL` is returned and `*memptr` is left alone. Failures are
/// returned, never written to `errno`. `size == 0` stores null.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> c_int {
    if memptr.is_null()
        || !alignment.is_power_of_two()
        || !alignment.is_multiple_of(std::mem::size_of::<*mut c_void>())
    {
        return libc::EINVAL;
    }
    match HEAP.acquire_aligned(alignment, size) {
        Ok(block) => {
            let out = block.map_or(ptr::null_mut(), |p| p.as_ptr().cast());
            // SAFETY: caller passes a writable `void **`.
            unsafe { memptr.write(out) };
            0
        }
        Err(err) => errno_for(err),
    }
}

// ---------------------------------------------------------------------------
// aligned_alloc
// ---------------------------------------------------------------------------

/// C11 `aligned_alloc`. A non-power-of-two `alignment` returns null with
/// `errno` set to `EINVAL`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    out(HEAP.acquire_aligned(alignment, size))
}

// ---------------------------------------------------------------------------
// memalign
// ---------------------------------------------------------------------------

/// Legacy `memalign`, same contract as [`aligned_alloc`].
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    out(HEAP.acquire_aligned(alignment, size))
}
