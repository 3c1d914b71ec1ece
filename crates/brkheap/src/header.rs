//! Block header layout.
//!
//! Every allocation handed out by the heap, arena-resident or mapped, is
//! prefixed by one [`BlockHeader`]:
//!
//! ```text
//! +----------------+ <- header address (16-byte aligned)
//! | size           |
//! | next           |
//! | tag            |
//! | is_free, kind, |
//! | lead           |
//! +----------------+ <- payload address = header + HEADER_SIZE
//! |    payload     |
//! |  (size bytes)  |
//! +----------------+ <- end address
//! ```
//!
//! The tag is a per-kind magic value XOR the header's own address, so a stale
//! or foreign pointer is unlikely to carry a valid tag by accident.
//!
//! Over-aligned allocations get a second header of kind `Aligned` right in
//! front of the aligned address. Its `next` link points back at the header of
//! the block that contains it.

use std::mem;
use std::ptr::NonNull;

/// Alignment of every header and therefore of every payload.
pub const HEADER_ALIGN: usize = 16;

/// Bytes occupied by a header in front of each payload.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % HEADER_ALIGN == 0);
const _: () = assert!(mem::align_of::<BlockHeader>() == HEADER_ALIGN);

/// Link to the next header in a list.
pub(crate) type Link = Option<NonNull<BlockHeader>>;

/// Which manager owns a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    /// Resident in the growable arena.
    Arena = 1,
    /// Backed by its own anonymous mapping.
    Large = 2,
    /// Alias in front of an over-aligned address inside another block.
    Aligned = 3,
}

impl BlockKind {
    const fn magic(self) -> usize {
        match self {
            Self::Arena => 0xA5E1_7B0C_5A17_C0DE_u64 as usize,
            Self::Large => 0x3C9D_52F1_B16B_10C5_u64 as usize,
            Self::Aligned => 0x6D1F_0A7E_93C4_E25B_u64 as usize,
        }
    }

    fn tag_for(self, header: NonNull<BlockHeader>) -> usize {
        self.magic() ^ header.as_ptr() as usize
    }
}

/// Metadata prefixed to every allocation.
#[repr(C, align(16))]
pub(crate) struct BlockHeader {
    /// Usable bytes after the header.
    pub(crate) size: usize,
    /// Next header in arena insertion order or large-registry order.
    pub(crate) next: Link,
    tag: usize,
    /// Arena blocks only: the block sits in the list waiting for reuse.
    pub(crate) is_free: bool,
    kind: BlockKind,
    /// Arena blocks only: bytes skipped below the header to 16-align the break.
    pub(crate) lead: u8,
}

impl BlockHeader {
    /// Writes a fresh, in-use header at `at`.
    ///
    /// # Safety
    ///
    /// `at` must be 16-byte aligned and valid for writes of
    /// `HEADER_SIZE + size` bytes.
    pub(crate) unsafe fn write(at: NonNull<u8>, kind: BlockKind, size: usize) -> NonNull<Self> {
        let header = at.cast::<Self>();
        let fresh = Self {
            size,
            next: None,
            tag: kind.tag_for(header),
            is_free: false,
            kind,
            lead: 0,
        };
        // SAFETY: caller guarantees alignment and writable space.
        unsafe { header.as_ptr().write(fresh) };
        header
    }

    /// Header sitting right before `payload`.
    ///
    /// ```text
    /// +-------------+
    /// | BlockHeader | <- returned address
    /// +-------------+
    /// |   payload   | <- given address
    /// +-------------+
    /// ```
    ///
    /// The result is only meaningful if `payload` came from this heap; callers
    /// validate it with [`BlockHeader::has_tag`] after a range or registry check.
    #[inline]
    pub(crate) fn from_payload(payload: NonNull<u8>) -> NonNull<Self> {
        let addr = payload.as_ptr().wrapping_sub(HEADER_SIZE);
        NonNull::new(addr.cast::<Self>()).unwrap_or(NonNull::dangling())
    }

    /// Payload address following `header`.
    #[inline]
    pub(crate) fn payload_of(header: NonNull<Self>) -> NonNull<u8> {
        // SAFETY: a header is always followed by its payload inside the same
        // allocation, so the offset stays in bounds and non-null.
        unsafe { NonNull::new_unchecked(header.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// Address one past the last payload byte.
    ///
    /// # Safety
    ///
    /// `header` must point to a readable header.
    #[inline]
    pub(crate) unsafe fn end_addr(header: NonNull<Self>) -> usize {
        let size = unsafe { (*header.as_ptr()).size };
        header.as_ptr() as usize + HEADER_SIZE + size
    }

    /// Returns true if the header carries the live tag for `kind`.
    ///
    /// # Safety
    ///
    /// `header` must point to readable memory of at least `HEADER_SIZE` bytes.
    #[inline]
    pub(crate) unsafe fn has_tag(header: NonNull<Self>, kind: BlockKind) -> bool {
        let raw = header.as_ptr();
        // SAFETY: readable per caller contract; `kind` is read as a raw byte so
        // garbage memory never materializes an invalid enum value.
        unsafe {
            (*raw).tag == kind.tag_for(header)
                && *raw.cast::<u8>().add(mem::offset_of!(Self, kind)) == kind as u8
        }
    }

    /// Erases the tag so the header no longer validates.
    ///
    /// # Safety
    ///
    /// `header` must point to a writable header.
    #[inline]
    pub(crate) unsafe fn clear_tag(header: NonNull<Self>) {
        unsafe { (*header.as_ptr()).tag = 0 };
    }
}

impl BlockHeader {
    /// Writes an alias header in front of `aligned`, linked back to `owner`.
    ///
    /// The alias records the usable bytes from `aligned` to the end of the
    /// owning block.
    ///
    /// # Safety
    ///
    /// `owner` must be a live block, `aligned` must be 16-byte aligned, and
    /// `[aligned - HEADER_SIZE, aligned)` must lie inside the owner's payload.
    pub(crate) unsafe fn write_alias(owner: NonNull<Self>, aligned: NonNull<u8>) -> NonNull<Self> {
        let end = unsafe { Self::end_addr(owner) };
        let at = Self::from_payload(aligned).cast::<u8>();
        let alias = unsafe { Self::write(at, BlockKind::Aligned, end - aligned.as_ptr() as usize) };
        unsafe { (*alias.as_ptr()).next = Some(owner) };
        alias
    }

    /// Resolves `ptr` through the alias header in front of it.
    ///
    /// Returns the owning block only if the alias is tagged, `owns` accepts
    /// its owner, and `ptr` lies inside the owner's payload past the alias.
    ///
    /// # Safety
    ///
    /// The `HEADER_SIZE` bytes before `ptr` must be readable. `owns` must only
    /// accept headers that are readable.
    pub(crate) unsafe fn owner_of_alias(
        ptr: NonNull<u8>,
        owns: impl FnOnce(NonNull<Self>) -> bool,
    ) -> Option<Located> {
        let alias = Self::from_payload(ptr);
        if !unsafe { Self::has_tag(alias, BlockKind::Aligned) } {
            return None;
        }
        let owner = unsafe { (*alias.as_ptr()).next }?;
        if !owns(owner) {
            return None;
        }
        let addr = ptr.as_ptr() as usize;
        let first = Self::payload_of(owner).as_ptr() as usize + HEADER_SIZE;
        (first <= addr && addr < unsafe { Self::end_addr(owner) }).then_some(Located {
            header: owner,
            alias: Some(alias),
        })
    }
}

/// A validated caller pointer: the block it belongs to and, for over-aligned
/// addresses, the alias header in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Located {
    pub(crate) header: NonNull<BlockHeader>,
    pub(crate) alias: Link,
}

impl Located {
    pub(crate) const fn block(header: NonNull<BlockHeader>) -> Self {
        Self {
            header,
            alias: None,
        }
    }

    /// The address the caller holds.
    pub(crate) fn ptr(self) -> NonNull<u8> {
        BlockHeader::payload_of(self.alias.unwrap_or(self.header))
    }

    /// Usable bytes from the caller's address to the end of the block.
    ///
    /// # Safety
    ///
    /// Both headers must be readable.
    pub(crate) unsafe fn usable(self) -> usize {
        let nearest = self.alias.unwrap_or(self.header);
        unsafe { (*nearest.as_ptr()).size }
    }
}

/// Rounds `size` up to a multiple of `granule` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub fn round_up(size: usize, granule: usize) -> Option<usize> {
    debug_assert!(granule.is_power_of_two());
    Some(size.checked_add(granule - 1)? & !(granule - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Slab([u8; 256]);

    #[test]
    fn header_layout() {
        assert_eq!(HEADER_SIZE % HEADER_ALIGN, 0);
        assert!(HEADER_SIZE >= 3 * mem::size_of::<usize>());
    }

    #[test]
    fn round_up_pages() {
        assert_eq!(round_up(1, 4096), Some(4096));
        assert_eq!(round_up(4096, 4096), Some(4096));
        assert_eq!(round_up(4097, 4096), Some(8192));
        assert_eq!(round_up(0, 4096), Some(0));
        assert_eq!(round_up(usize::MAX, 4096), None);
    }

    #[test]
    fn write_then_validate() {
        let mut slab = Slab([0xEE; 256]);
        let at = NonNull::new(slab.0.as_mut_ptr()).unwrap();
        let size = 256 - HEADER_SIZE;

        // SAFETY: slab is aligned and large enough.
        let header = unsafe { BlockHeader::write(at, BlockKind::Arena, size) };
        let payload = BlockHeader::payload_of(header);

        assert_eq!(payload.as_ptr() as usize % HEADER_ALIGN, 0);
        assert_eq!(BlockHeader::from_payload(payload), header);
        unsafe {
            assert!(BlockHeader::has_tag(header, BlockKind::Arena));
            assert!(!BlockHeader::has_tag(header, BlockKind::Large));
            assert_eq!(BlockHeader::end_addr(header), at.as_ptr() as usize + 256);

            BlockHeader::clear_tag(header);
            assert!(!BlockHeader::has_tag(header, BlockKind::Arena));
        }
    }

    #[test]
    fn kinds_do_not_alias() {
        let mut slab = Slab([0; 256]);
        let at = NonNull::new(slab.0.as_mut_ptr()).unwrap();
        let header = unsafe { BlockHeader::write(at, BlockKind::Aligned, 64) };
        unsafe {
            assert!(BlockHeader::has_tag(header, BlockKind::Aligned));
            assert!(!BlockHeader::has_tag(header, BlockKind::Arena));
            assert!(!BlockHeader::has_tag(header, BlockKind::Large));
            assert_eq!((*header.as_ptr()).lead, 0);
        }
    }

    #[test]
    fn alias_resolves_to_owner() {
        let mut slab = Slab([0; 256]);
        let at = NonNull::new(slab.0.as_mut_ptr()).unwrap();
        let owner = unsafe { BlockHeader::write(at, BlockKind::Arena, 256 - HEADER_SIZE) };
        let aligned = NonNull::new(at.as_ptr().wrapping_add(128)).unwrap();

        let alias = unsafe { BlockHeader::write_alias(owner, aligned) };
        let found = unsafe { BlockHeader::owner_of_alias(aligned, |h| h == owner) }.unwrap();
        assert_eq!(found.header, owner);
        assert_eq!(found.alias, Some(alias));
        assert_eq!(found.ptr(), aligned);
        assert_eq!(unsafe { found.usable() }, 128);

        assert!(unsafe { BlockHeader::owner_of_alias(aligned, |_| false) }.is_none());
        unsafe { BlockHeader::clear_tag(alias) };
        assert!(unsafe { BlockHeader::owner_of_alias(aligned, |h| h == owner) }.is_none());
    }

    #[test]
    fn garbage_does_not_validate() {
        let mut slab = Slab([0xAB; 256]);
        let header = NonNull::new(slab.0.as_mut_ptr()).unwrap().cast::<BlockHeader>();
        unsafe {
            assert!(!BlockHeader::has_tag(header, BlockKind::Arena));
            assert!(!BlockHeader::has_tag(header, BlockKind::Large));
        }
    }
}
