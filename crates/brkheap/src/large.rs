//! Large-block manager.
//!
//! Requests at or above the large threshold that miss the arena free list get
//! a dedicated anonymous mapping. Each mapping starts with a [`BlockHeader`]
//! of kind `Large`, and the header is linked into a registry so a release can
//! be validated by address comparison alone, without reading memory the heap
//! may not own.

use std::ptr::NonNull;

use crate::error::HeapError;
use crate::header::{BlockHeader, BlockKind, HEADER_SIZE, Link, Located, round_up};
use crate::os;

/// Snapshot of the live large regions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LargeStats {
    /// Live mappings.
    pub regions: usize,
    /// Bytes mapped, headers included.
    pub mapped_bytes: usize,
}

/// Maps a region holding at least `size` usable bytes.
///
/// Runs without any lock; the caller registers the result afterwards.
pub(crate) fn map_region(size: usize, page_size: usize) -> Result<NonNull<BlockHeader>, HeapError> {
    let oom = HeapError::OutOfMemory { requested: size };
    let total = size
        .checked_add(HEADER_SIZE)
        .and_then(|bytes| round_up(bytes, page_size))
        .ok_or(oom)?;
    let base = os::map_anonymous(total)?;
    // SAFETY: fresh page-aligned mapping of `total` bytes.
    Ok(unsafe { BlockHeader::write(base, BlockKind::Large, total - HEADER_SIZE) })
}

/// Returns an unregistered region to the operating system.
///
/// # Safety
///
/// `header` must have been produced by [`map_region`] and already removed
/// from the registry; nothing may touch the region afterwards.
pub(crate) unsafe fn unmap_region(header: NonNull<BlockHeader>) -> Result<(), HeapError> {
    let len = HEADER_SIZE + unsafe { (*header.as_ptr()).size };
    unsafe {
        BlockHeader::clear_tag(header);
        os::unmap(header.cast(), len)
    }
}

/// Intrusive list of live large regions.
pub(crate) struct LargeRegistry {
    head: Link,
    stats: LargeStats,
}

// SAFETY: the registry exclusively owns its mappings; access is serialized by
// the heap's large-block lock.
unsafe impl Send for LargeRegistry {}

impl LargeRegistry {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            stats: LargeStats {
                regions: 0,
                mapped_bytes: 0,
            },
        }
    }

    pub(crate) fn insert(&mut self, header: NonNull<BlockHeader>) {
        // SAFETY: `header` is a fresh region not yet visible to anyone else.
        unsafe { (*header.as_ptr()).next = self.head };
        self.head = Some(header);
        self.stats.regions += 1;
        self.stats.mapped_bytes += HEADER_SIZE + unsafe { (*header.as_ptr()).size };
    }

    /// Live region handed out as `ptr`: either its payload start or an
    /// aligned address behind an alias header inside it.
    pub(crate) fn find(&self, ptr: NonNull<u8>) -> Option<Located> {
        let target = BlockHeader::from_payload(ptr);
        let addr = ptr.as_ptr() as usize;
        let mut cursor = self.head;
        while let Some(header) = cursor {
            // SAFETY: registered regions are mapped until removed.
            let large = || unsafe { BlockHeader::has_tag(header, BlockKind::Large) };
            if header == target {
                return large().then_some(Located::block(header));
            }
            let first = BlockHeader::payload_of(header).as_ptr() as usize + HEADER_SIZE;
            if first <= addr && addr < unsafe { BlockHeader::end_addr(header) } {
                // SAFETY: the alias slot in front of `ptr` is inside this region.
                return unsafe { BlockHeader::owner_of_alias(ptr, |owner| owner == header && large()) };
            }
            cursor = unsafe { (*header.as_ptr()).next };
        }
        None
    }

    /// Unlinks the region handed out as `ptr`.
    pub(crate) fn remove(&mut self, ptr: NonNull<u8>) -> Result<Located, HeapError> {
        let found = self.find(ptr).ok_or(HeapError::InvalidArgument {
            reason: "unknown_pointer",
        })?;
        let target = found.header;

        let mut link: *mut Link = &mut self.head;
        // SAFETY: `link` always points at the registry head or at the `next`
        // field of a registered header, and `target` is registered.
        unsafe {
            while let Some(header) = *link {
                if header == target {
                    *link = (*header.as_ptr()).next;
                    break;
                }
                link = &mut (*header.as_ptr()).next;
            }
            (*target.as_ptr()).next = None;
        }

        self.stats.regions -= 1;
        self.stats.mapped_bytes -= HEADER_SIZE + unsafe { (*target.as_ptr()).size };
        Ok(found)
    }

    pub(crate) fn stats(&self) -> LargeStats {
        self.stats
    }
}

impl Drop for LargeRegistry {
    fn drop(&mut self) {
        let mut cursor = self.head.take();
        while let Some(header) = cursor {
            cursor = unsafe { (*header.as_ptr()).next };
            // SAFETY: the registry is going away, so is every region it owns.
            let _ = unsafe { unmap_region(header) };
        }
    }
}
