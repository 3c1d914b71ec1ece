//! [`GlobalAlloc`] adapter.
//!
//! Alignments up to [`HEADER_ALIGN`] are served directly. Larger alignments go
//! through [`Heap::acquire_aligned`], whose alias header lets `dealloc` and
//! `realloc` hand the aligned address straight back to the heap.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::{self, NonNull};

use lock_api::RawMutex;

use crate::error::HeapError;
use crate::header::HEADER_ALIGN;
use crate::heap::Heap;
use crate::segment::Segment;

#[inline]
fn raw(result: Result<Option<NonNull<u8>>, HeapError>) -> *mut u8 {
    match result {
        Ok(Some(ptr)) => ptr.as_ptr(),
        _ => ptr::null_mut(),
    }
}

unsafe impl<S: Segment, R: RawMutex> GlobalAlloc for Heap<S, R> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        raw(self.acquire_aligned(layout.align(), layout.size()))
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= HEADER_ALIGN {
            return raw(self.zero_allocate(1, layout.size()));
        }
        let ptr = raw(self.acquire_aligned(layout.align(), layout.size()));
        if !ptr.is_null() {
            // SAFETY: the block holds at least `layout.size()` bytes from `ptr`.
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // Rejections are journaled and logged; dealloc has no way to report them.
        let _ = unsafe { self.release(NonNull::new(ptr)) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= HEADER_ALIGN {
            return raw(unsafe { self.reallocate(NonNull::new(ptr), new_size) });
        }

        // Keep the aligned address while the block still has room.
        if let Some(old) = NonNull::new(ptr) {
            if self.usable_size(old).is_ok_and(|capacity| capacity >= new_size) {
                return ptr;
            }
        }
        let fresh = raw(self.acquire_aligned(layout.align(), new_size));
        if !fresh.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, fresh, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::segment::ReservedSegment;

    fn heap() -> Heap<ReservedSegment> {
        let config = HeapConfig::DEFAULT.with_large_threshold(128 * 1024);
        Heap::try_with_config(ReservedSegment::new(8 << 20).unwrap(), config).unwrap()
    }

    #[test]
    fn native_alignment_passes_through() {
        let heap = heap();
        let layout = Layout::from_size_align(24, 8).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            assert!(!p.is_null());
            assert_eq!(p as usize % HEADER_ALIGN, 0);
            assert!(heap.usable_size(NonNull::new(p).unwrap()).is_ok());
            heap.dealloc(p, layout);
        }
        assert_eq!(heap.stats().arena.blocks, 0);
    }

    #[test]
    fn overaligned_blocks_round_trip() {
        let heap = heap();
        for align in [32, 64, 128, 4096] {
            let layout = Layout::from_size_align(100, align).unwrap();
            unsafe {
                let p = heap.alloc_zeroed(layout);
                assert!(!p.is_null());
                assert_eq!(p as usize % align, 0);
                let bytes = std::slice::from_raw_parts(p, 100);
                assert!(bytes.iter().all(|&b| b == 0));
                ptr::write_bytes(p, 0xAB, 100);
                heap.dealloc(p, layout);
            }
        }
        assert_eq!(heap.stats().arena.blocks, 0);
        heap.check_integrity().unwrap();
    }

    #[test]
    fn realloc_preserves_prefix() {
        let heap = heap();
        let layout = Layout::from_size_align(16, 16).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            ptr::copy_nonoverlapping(b"0123456789abcdef".as_ptr(), p, 16);
            let q = heap.realloc(p, layout, 3 * 4096);
            assert!(!q.is_null());
            assert_eq!(std::slice::from_raw_parts(q, 16), b"0123456789abcdef");
            heap.dealloc(q, Layout::from_size_align(3 * 4096, 16).unwrap());
        }
    }

    #[test]
    fn overaligned_realloc_keeps_alignment() {
        let heap = heap();
        let layout = Layout::from_size_align(64, 128).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            ptr::write_bytes(p, 0x5A, 64);
            let q = heap.realloc(p, layout, 256);
            assert_eq!(q, p);

            let grown = Layout::from_size_align(256, 128).unwrap();
            let r = heap.realloc(q, grown, 3 * 4096);
            assert_ne!(r, q);
            assert_eq!(r as usize % 128, 0);
            assert!(std::slice::from_raw_parts(r, 64).iter().all(|&b| b == 0x5A));
            heap.dealloc(r, Layout::from_size_align(3 * 4096, 128).unwrap());
        }
        // The original block was not on top when released, so it stays listed.
        let stats = heap.stats().arena;
        assert_eq!((stats.blocks, stats.free_blocks), (1, 1));
    }

    #[test]
    fn overaligned_large_layouts_unmap() {
        let heap = heap();
        let layout = Layout::from_size_align(256 * 1024, 8192).unwrap();
        unsafe {
            let p = heap.alloc_zeroed(layout);
            assert!(!p.is_null());
            assert_eq!(p as usize % 8192, 0);
            assert_eq!(*p.add(256 * 1024 - 1), 0);
            heap.dealloc(p, layout);
        }
        assert_eq!(heap.stats().large.regions, 0);
    }
}
