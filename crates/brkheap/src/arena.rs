//! Arena manager: the first-fit block list over the growable segment.
//!
//! Blocks are appended at the segment's break and never reordered, so list
//! order is also address order. Only the tail block can be handed back to the
//! segment; every other released block stays listed, marked free, waiting for
//! a request it is large enough for. There is no splitting and no coalescing.

use std::ptr::NonNull;

use crate::error::HeapError;
use crate::header::{BlockHeader, BlockKind, HEADER_ALIGN, HEADER_SIZE, Link, Located, round_up};
use crate::segment::Segment;

/// What releasing an arena block did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    /// The block was the topmost one; `returned` bytes went back to the segment.
    ShrunkTop { returned: usize },
    /// The block stays listed for reuse.
    MarkedFree,
}

/// Snapshot of the block list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Blocks in the list.
    pub blocks: usize,
    /// Blocks marked free.
    pub free_blocks: usize,
    /// Usable bytes across all blocks.
    pub payload_bytes: usize,
    /// Usable bytes across free blocks.
    pub free_bytes: usize,
}

pub(crate) struct Arena<S> {
    segment: S,
    head: Link,
    tail: Link,
    blocks: usize,
    /// Lowest header address currently listed; `usize::MAX` when empty.
    floor: usize,
    page_size: usize,
}

// SAFETY: the list links point into memory owned by the segment, which moves
// together with the arena. All access goes through the heap's arena lock.
unsafe impl<S: Send> Send for Arena<S> {}

impl<S: Segment> Arena<S> {
    pub(crate) const fn new(segment: S, page_size: usize) -> Self {
        Self {
            segment,
            head: None,
            tail: None,
            blocks: 0,
            floor: usize::MAX,
            page_size,
        }
    }

    /// First free block with at least `size` usable bytes, in insertion order.
    pub(crate) fn find_reusable(&self, size: usize) -> Link {
        let mut cursor = self.head;
        while let Some(header) = cursor {
            // SAFETY: listed headers stay valid until unlinked under the lock.
            let block = unsafe { header.as_ref() };
            if block.is_free && block.size >= size {
                return Some(header);
            }
            cursor = block.next;
        }
        None
    }

    /// Hands a free block back out, unchanged in size.
    pub(crate) fn claim(&mut self, header: NonNull<BlockHeader>) {
        // SAFETY: `header` came from `find_reusable` under the same lock.
        unsafe { (*header.as_ptr()).is_free = false };
    }

    /// Extends the segment by a page-rounded block and appends its header.
    ///
    /// On failure nothing in the list changes.
    pub(crate) fn grow(&mut self, size: usize) -> Result<NonNull<BlockHeader>, HeapError> {
        let oom = HeapError::OutOfMemory { requested: size };
        let rounded = round_up(size, self.page_size).ok_or(oom)?;
        let total = rounded.checked_add(HEADER_SIZE).ok_or(oom)?;

        let current = self.segment.current_break()?;
        let aligned = round_up(current, HEADER_ALIGN).ok_or(oom)?;
        let pad = aligned - current;
        let request = total.checked_add(pad).ok_or(oom)?;

        let previous = self.segment.extend(request)?;
        let start = round_up(previous, HEADER_ALIGN).ok_or(oom)?;
        if start - previous > pad {
            // The break moved between reading and extending it; the padding we
            // asked for no longer aligns the block.
            if self.segment.current_break()? == previous + request {
                let _ = self.segment.retract(request);
            }
            return Err(HeapError::OutOfMemory { requested: request });
        }

        // The block spans the whole extension: alignment bytes below the
        // header are its lead, any leftover padding joins its payload.
        let lead = start - previous;
        let size = rounded + (pad - lead);
        let at = NonNull::new(start as *mut u8).ok_or(oom)?;
        // SAFETY: the segment just handed us `request` writable bytes starting
        // at `previous`, and `start + HEADER_SIZE + size == previous + request`.
        let header = unsafe { BlockHeader::write(at, BlockKind::Arena, size) };
        unsafe { (*header.as_ptr()).lead = lead as u8 };

        match self.tail {
            // SAFETY: the tail is a listed header.
            Some(tail) => unsafe { (*tail.as_ptr()).next = Some(header) },
            None => self.head = Some(header),
        }
        self.tail = Some(header);
        self.blocks += 1;
        self.floor = self.floor.min(start);
        Ok(header)
    }

    /// Maps a caller pointer to its arena block.
    ///
    /// `Ok(None)` means the pointer lies outside the arena. A pointer inside
    /// the arena must carry the arena tag, or sit behind an alias header whose
    /// owner is a listed arena block.
    pub(crate) fn locate(&mut self, ptr: NonNull<u8>) -> Result<Option<Located>, HeapError> {
        // Boundary first, then derive the header from the caller's pointer.
        let brk = self.segment.current_break()?;
        let addr = ptr.as_ptr() as usize;
        if self.head.is_none() || addr < self.floor.saturating_add(HEADER_SIZE) || addr >= brk {
            return Ok(None);
        }
        if addr % HEADER_ALIGN != 0 {
            return Err(HeapError::InvalidArgument {
                reason: "misaligned_pointer",
            });
        }
        let header = BlockHeader::from_payload(ptr);
        // SAFETY: `[floor, brk)` is mapped segment memory and the header lies
        // inside it.
        if unsafe { BlockHeader::has_tag(header, BlockKind::Arena) } {
            return Ok(Some(Located::block(header)));
        }
        let floor = self.floor;
        let owns = |owner: NonNull<BlockHeader>| {
            let at = owner.as_ptr() as usize;
            at >= floor
                && at % HEADER_ALIGN == 0
                && at.saturating_add(HEADER_SIZE) <= brk
                // SAFETY: the owner header lies inside `[floor, brk)`.
                && unsafe { BlockHeader::has_tag(owner, BlockKind::Arena) }
        };
        // SAFETY: the alias slot lies inside `[floor, brk)` as well.
        unsafe { BlockHeader::owner_of_alias(ptr, owns) }
            .map(Some)
            .ok_or(HeapError::InvalidArgument {
                reason: "foreign_pointer",
            })
    }

    /// Releases a located block: shrink if topmost, otherwise mark free.
    pub(crate) fn release(&mut self, found: Located) -> Result<Released, HeapError> {
        let header = found.header;
        // SAFETY: `found` was validated by `locate` under the same lock.
        if unsafe { (*header.as_ptr()).is_free } {
            return Err(HeapError::UndefinedUsage {
                reason: "double_release",
                addr: found.ptr().as_ptr() as usize,
            });
        }
        if let Some(alias) = found.alias {
            unsafe { BlockHeader::clear_tag(alias) };
        }

        let brk = self.segment.current_break()?;
        let end = unsafe { BlockHeader::end_addr(header) };
        if self.tail == Some(header) && end == brk {
            return Ok(self.shrink_top(header));
        }
        unsafe { (*header.as_ptr()).is_free = true };
        Ok(Released::MarkedFree)
    }

    fn shrink_top(&mut self, header: NonNull<BlockHeader>) -> Released {
        // SAFETY: `header` is the listed tail.
        let (size, lead) = unsafe { ((*header.as_ptr()).size, (*header.as_ptr()).lead) };
        let total = usize::from(lead) + HEADER_SIZE + size;
        let predecessor = self.predecessor_of(header);

        // The header bytes may be unmapped once the break retracts.
        unsafe { BlockHeader::clear_tag(header) };
        if self.segment.retract(total).is_err() {
            // Keep the block listed for reuse instead.
            let restored = unsafe { BlockHeader::write(header.cast(), BlockKind::Arena, size) };
            unsafe {
                (*restored.as_ptr()).lead = lead;
                (*restored.as_ptr()).is_free = true;
            }
            return Released::MarkedFree;
        }

        match predecessor {
            Some(prev) => {
                unsafe { (*prev.as_ptr()).next = None };
                self.tail = Some(prev);
            }
            None => {
                self.head = None;
                self.tail = None;
                self.floor = usize::MAX;
            }
        }
        self.blocks -= 1;
        Released::ShrunkTop { returned: total }
    }

    fn predecessor_of(&self, target: NonNull<BlockHeader>) -> Link {
        let mut cursor = self.head;
        while let Some(header) = cursor {
            let next = unsafe { (*header.as_ptr()).next };
            if next == Some(target) {
                return Some(header);
            }
            cursor = next;
        }
        None
    }

    /// Current end of the segment.
    pub(crate) fn region_end(&mut self) -> Result<usize, HeapError> {
        self.segment.current_break()
    }

    pub(crate) fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats::default();
        let mut cursor = self.head;
        while let Some(header) = cursor {
            let block = unsafe { header.as_ref() };
            stats.blocks += 1;
            stats.payload_bytes += block.size;
            if block.is_free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            }
            cursor = block.next;
        }
        stats
    }

    /// Walks the list and verifies it is well formed: every node tagged,
    /// addresses strictly increasing (so no cycles), the walk ends at `tail`,
    /// and the node count matches.
    pub(crate) fn check_integrity(&self) -> Result<ArenaStats, HeapError> {
        let corrupt = |reason, header: NonNull<BlockHeader>| HeapError::UndefinedUsage {
            reason,
            addr: header.as_ptr() as usize,
        };

        let mut stats = ArenaStats::default();
        let mut last: Link = None;
        let mut cursor = self.head;
        while let Some(header) = cursor {
            if stats.blocks == self.blocks {
                return Err(corrupt("list_longer_than_count", header));
            }
            if let Some(prev) = last {
                if header <= prev {
                    return Err(corrupt("list_not_address_ordered", header));
                }
            }
            if !unsafe { BlockHeader::has_tag(header, BlockKind::Arena) } {
                return Err(corrupt("list_node_untagged", header));
            }
            let block = unsafe { header.as_ref() };
            stats.blocks += 1;
            stats.payload_bytes += block.size;
            if block.is_free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            }
            last = Some(header);
            cursor = block.next;
        }

        if last != self.tail {
            let at = self.tail.or(last).unwrap_or(NonNull::dangling());
            return Err(corrupt("tail_not_last_node", at));
        }
        if stats.blocks != self.blocks {
            let at = last.unwrap_or(NonNull::dangling());
            return Err(corrupt("list_shorter_than_count", at));
        }
        Ok(stats)
    }
}
