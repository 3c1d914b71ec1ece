//! Allocation façade.
//!
//! [`Heap`] coordinates the arena manager and the large-block manager behind
//! the four allocator operations. The arena lock covers every free-list scan,
//! growth and shrink; the large registry and the lifecycle journal each have
//! their own lock. Lock order is arena, then large, then journal. Mapping
//! syscalls and the reallocate byte copy run with no lock held.

use std::ptr::{self, NonNull};

use lock_api::{Mutex, RawMutex};

use crate::arena::{Arena, ArenaStats, Released};
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::header::{BlockHeader, HEADER_ALIGN, HEADER_SIZE};
use crate::large::{self, LargeRegistry, LargeStats};
use crate::lifecycle::{self, Journal, LifecycleLevel, LifecycleRecord};
use crate::segment::Segment;

/// A heap locked with a spin lock, for use as the process allocator.
///
/// `parking_lot` allocates its parking table while holding bucket locks, which
/// can deadlock when the allocation lands back in a contended heap.
pub type SpinHeap<S> = Heap<S, spin::Mutex<()>>;

/// Snapshot of both managers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub arena: ArenaStats,
    pub large: LargeStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    FreeListHit,
    ArenaGrow,
    LargeMap,
}

impl Path {
    const fn label(self) -> &'static str {
        match self {
            Self::FreeListHit => "free_list_hit",
            Self::ArenaGrow => "arena_grow",
            Self::LargeMap => "large_map",
        }
    }

    /// Fresh anonymous mappings are zero-filled by the kernel.
    const fn zero_filled(self) -> bool {
        matches!(self, Self::LargeMap)
    }
}

#[derive(Debug, Clone, Copy)]
struct Grant {
    ptr: NonNull<u8>,
    path: Path,
}

impl Grant {
    fn new(header: NonNull<BlockHeader>, path: Path) -> Self {
        Self {
            ptr: BlockHeader::payload_of(header),
            path,
        }
    }
}

enum ArenaAttempt {
    Served(Grant),
    Large,
}

/// A process-wide heap over one [`Segment`].
///
/// `R` picks the lock; see [`SpinHeap`] for the process-allocator variant.
pub struct Heap<S, R = parking_lot::RawMutex> {
    arena: Mutex<R, Arena<S>>,
    large: Mutex<R, LargeRegistry>,
    journal: Mutex<R, Journal>,
    config: HeapConfig,
}

impl<S: Segment, R: RawMutex> Heap<S, R> {
    /// Creates an empty heap with [`HeapConfig::DEFAULT`].
    ///
    /// Usable in `static` initializers.
    #[must_use]
    pub const fn new(segment: S) -> Self {
        Self::build(segment, HeapConfig::DEFAULT)
    }

    /// Creates an empty heap after validating `config`.
    pub fn try_with_config(segment: S, config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;
        Ok(Self::build(segment, config))
    }

    const fn build(segment: S, config: HeapConfig) -> Self {
        Self {
            arena: Mutex::const_new(R::INIT, Arena::new(segment, config.page_size)),
            large: Mutex::const_new(R::INIT, LargeRegistry::new()),
            journal: Mutex::const_new(R::INIT, Journal::new()),
            config,
        }
    }

    /// Configuration this heap was built with.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates at least `size` bytes, 16-byte aligned.
    ///
    /// Returns `Ok(None)` for `size == 0`. A reused block is handed out whole,
    /// so it may be larger than requested.
    pub fn acquire(&self, size: usize) -> Result<Option<NonNull<u8>>, HeapError> {
        Ok(self.acquire_inner("acquire", size)?.map(|grant| grant.ptr))
    }

    /// Allocates at least `size` bytes at an address that is a multiple of
    /// `align`.
    ///
    /// `align` must be a power of two. Up to 16 this is [`Heap::acquire`].
    /// Beyond that the block is over-allocated and an alias header in front
    /// of the aligned address links it to the owning block, so the returned
    /// pointer is accepted by every other operation.
    pub fn acquire_aligned(&self, align: usize, size: usize) -> Result<Option<NonNull<u8>>, HeapError> {
        const SYMBOL: &str = "acquire_aligned";
        if !align.is_power_of_two() {
            return Err(self.fail(
                SYMBOL,
                None,
                Some(size),
                HeapError::InvalidArgument {
                    reason: "alignment_not_power_of_two",
                },
            ));
        }
        if align <= HEADER_ALIGN || size == 0 {
            return Ok(self.acquire_inner(SYMBOL, size)?.map(|grant| grant.ptr));
        }
        let request = size
            .checked_add(align)
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
            .ok_or_else(|| {
                self.fail(
                    SYMBOL,
                    None,
                    Some(size),
                    HeapError::InvalidArgument {
                        reason: "size_overflow",
                    },
                )
            })?;

        let Some(grant) = self.acquire_inner(SYMBOL, request)? else {
            return Ok(None);
        };
        let raw = grant.ptr.as_ptr() as usize;
        let offset = ((raw + HEADER_SIZE + align - 1) & !(align - 1)) - raw;
        // SAFETY: `HEADER_SIZE <= offset < HEADER_SIZE + align`, so the alias
        // header and `size` bytes past it fit in the `request` bytes granted.
        let aligned = unsafe { NonNull::new_unchecked(grant.ptr.as_ptr().add(offset)) };
        unsafe { BlockHeader::write_alias(BlockHeader::from_payload(grant.ptr), aligned) };
        self.note(
            LifecycleLevel::Debug,
            SYMBOL,
            "align",
            grant.path.label(),
            Some(aligned.as_ptr() as usize),
            Some(size),
            "success",
        );
        Ok(Some(aligned))
    }

    /// Allocates `count * size` zeroed bytes.
    ///
    /// Returns `Ok(None)` if either factor is zero and `InvalidArgument` if the
    /// product overflows.
    pub fn zero_allocate(&self, count: usize, size: usize) -> Result<Option<NonNull<u8>>, HeapError> {
        const SYMBOL: &str = "zero_allocate";
        if count == 0 || size == 0 {
            self.note(LifecycleLevel::Trace, SYMBOL, "alloc", "none", None, Some(0), "noop");
            return Ok(None);
        }
        let total = count.checked_mul(size).ok_or_else(|| {
            self.fail(
                SYMBOL,
                None,
                None,
                HeapError::InvalidArgument {
                    reason: "size_overflow",
                },
            )
        })?;

        let Some(grant) = self.acquire_inner(SYMBOL, total)? else {
            return Ok(None);
        };
        if !grant.path.zero_filled() {
            // SAFETY: the block holds at least `total` usable bytes.
            unsafe { ptr::write_bytes(grant.ptr.as_ptr(), 0, total) };
        }
        Ok(Some(grant.ptr))
    }

    /// Resizes the block at `ptr` to hold at least `new_size` bytes.
    ///
    /// - `ptr == None` acquires `new_size` bytes.
    /// - `new_size == 0` releases `ptr` and returns `Ok(None)`.
    /// - If the block already holds `new_size` bytes, `ptr` comes back as is.
    /// - Otherwise the contents move to a new block and the old one is
    ///   released. If the new acquisition fails the old block is untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this heap and be live. No other thread may access
    /// the block during the call, and the caller must not use `ptr` after a
    /// move or release.
    pub unsafe fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        const SYMBOL: &str = "reallocate";
        let Some(old) = ptr else {
            return Ok(self.acquire_inner(SYMBOL, new_size)?.map(|grant| grant.ptr));
        };
        if new_size == 0 {
            self.release_inner(SYMBOL, Some(old))?;
            return Ok(None);
        }

        let addr = old.as_ptr() as usize;
        let capacity = self
            .block_capacity(old)
            .map_err(|err| self.fail(SYMBOL, Some(addr), Some(new_size), err))?;
        if capacity >= new_size {
            self.note(
                LifecycleLevel::Debug,
                SYMBOL,
                "resize",
                "in_place",
                Some(addr),
                Some(new_size),
                "success",
            );
            return Ok(Some(old));
        }

        let Some(grant) = self.acquire_inner(SYMBOL, new_size)? else {
            return Ok(None);
        };
        // SAFETY: distinct live blocks; the old one holds `capacity` bytes and
        // the new one at least `new_size > capacity`.
        unsafe { ptr::copy_nonoverlapping(old.as_ptr(), grant.ptr.as_ptr(), capacity.min(new_size)) };
        if let Err(err) = self.release_inner(SYMBOL, Some(old)) {
            let _ = self.release_inner(SYMBOL, Some(grant.ptr));
            return Err(err);
        }
        Ok(Some(grant.ptr))
    }

    /// Gives the block at `ptr` back to the heap. `None` is a no-op.
    ///
    /// The topmost arena block returns its pages to the segment; any other
    /// arena block stays listed for reuse; large regions are unmapped.
    ///
    /// # Safety
    ///
    /// The caller must not use the block after releasing it. Foreign pointers
    /// and double releases are detected and rejected, but only on a best
    /// effort basis once memory has been recycled.
    pub unsafe fn release(&self, ptr: Option<NonNull<u8>>) -> Result<(), HeapError> {
        self.release_inner("release", ptr)
    }

    /// Usable bytes of the live block at `ptr`.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        self.block_capacity(ptr)
            .map_err(|err| self.fail("usable_size", Some(ptr.as_ptr() as usize), None, err))
    }

    /// Current end of the arena's segment.
    pub fn region_end(&self) -> Result<usize, HeapError> {
        self.arena.lock().region_end()
    }

    /// Verifies the arena list is well formed.
    pub fn check_integrity(&self) -> Result<ArenaStats, HeapError> {
        self.arena.lock().check_integrity()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let arena = self.arena.lock().stats();
        let large = self.large.lock().stats();
        HeapStats { arena, large }
    }

    /// Lifecycle records still held by the journal, oldest first.
    #[must_use]
    pub fn lifecycle_records(&self) -> Vec<LifecycleRecord> {
        // Copy under the lock, allocate after releasing it.
        let snapshot = self.journal.lock().snapshot();
        snapshot.into_iter().flatten().collect()
    }

    fn acquire_inner(&self, symbol: &'static str, size: usize) -> Result<Option<Grant>, HeapError> {
        if size == 0 {
            self.note(LifecycleLevel::Trace, symbol, "alloc", "none", None, Some(0), "noop");
            return Ok(None);
        }
        // Resolved before locking: the environment lookup may allocate.
        let threshold = self.config.large_threshold.resolve();

        let attempt = {
            let mut arena = self.arena.lock();
            if let Some(header) = arena.find_reusable(size) {
                arena.claim(header);
                Ok(ArenaAttempt::Served(Grant::new(header, Path::FreeListHit)))
            } else if size >= threshold {
                Ok(ArenaAttempt::Large)
            } else {
                arena
                    .grow(size)
                    .map(|header| ArenaAttempt::Served(Grant::new(header, Path::ArenaGrow)))
            }
        };

        let grant = match attempt {
            Ok(ArenaAttempt::Served(grant)) => grant,
            Ok(ArenaAttempt::Large) => {
                let header = large::map_region(size, self.config.page_size)
                    .map_err(|err| self.fail(symbol, None, Some(size), err))?;
                self.large.lock().insert(header);
                Grant::new(header, Path::LargeMap)
            }
            Err(err) => return Err(self.fail(symbol, None, Some(size), err)),
        };

        self.note(
            LifecycleLevel::Trace,
            symbol,
            "alloc",
            grant.path.label(),
            Some(grant.ptr.as_ptr() as usize),
            Some(size),
            "success",
        );
        Ok(Some(grant))
    }

    fn release_inner(&self, symbol: &'static str, ptr: Option<NonNull<u8>>) -> Result<(), HeapError> {
        let Some(ptr) = ptr else {
            self.note(LifecycleLevel::Trace, symbol, "free", "none", None, None, "noop");
            return Ok(());
        };
        let addr = ptr.as_ptr() as usize;

        let arena_result = {
            let mut arena = self.arena.lock();
            match arena.locate(ptr) {
                Ok(Some(found)) => arena.release(found).map(Some),
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            }
        };

        match arena_result {
            Ok(Some(Released::ShrunkTop { returned })) => self.note(
                LifecycleLevel::Info,
                symbol,
                "shrink_top",
                "arena",
                Some(addr),
                Some(returned),
                "success",
            ),
            Ok(Some(Released::MarkedFree)) => {
                self.note(LifecycleLevel::Trace, symbol, "free", "arena", Some(addr), None, "success");
            }
            Ok(None) => {
                let removed = self.large.lock().remove(ptr);
                let header = removed
                    .map_err(|err| self.fail(symbol, Some(addr), None, err))?
                    .header;
                // SAFETY: removed from the registry, so nobody else can find it.
                let size = unsafe { (*header.as_ptr()).size };
                unsafe { large::unmap_region(header) }
                    .map_err(|err| self.fail(symbol, Some(addr), Some(size), err))?;
                self.note(
                    LifecycleLevel::Info,
                    symbol,
                    "unmap",
                    "large",
                    Some(addr),
                    Some(size),
                    "success",
                );
            }
            Err(err) => return Err(self.fail(symbol, Some(addr), None, err)),
        }
        Ok(())
    }

    fn block_capacity(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        {
            let mut arena = self.arena.lock();
            if let Some(found) = arena.locate(ptr)? {
                // SAFETY: located under the arena lock.
                if unsafe { found.header.as_ref() }.is_free {
                    return Err(HeapError::UndefinedUsage {
                        reason: "block_not_live",
                        addr: ptr.as_ptr() as usize,
                    });
                }
                return Ok(unsafe { found.usable() });
            }
        }
        let large = self.large.lock();
        let found = large.find(ptr).ok_or(HeapError::InvalidArgument {
            reason: "unknown_pointer",
        })?;
        Ok(unsafe { found.usable() })
    }

    #[allow(clippy::too_many_arguments)]
    fn note(
        &self,
        level: LifecycleLevel,
        symbol: &'static str,
        event: &'static str,
        path: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
    ) {
        if self.config.journal {
            self.journal
                .lock()
                .record(level, symbol, event, path, ptr, size, outcome);
        }
    }

    /// Records a failure and forwards it to the `log` facade. Call with no
    /// arena or large lock held.
    fn fail(
        &self,
        symbol: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        err: HeapError,
    ) -> HeapError {
        let level = match err {
            HeapError::UndefinedUsage { .. } => LifecycleLevel::Error,
            _ => LifecycleLevel::Warn,
        };
        self.note(level, symbol, "rejected", "none", ptr, size, err.outcome());
        lifecycle::emit_failure(symbol, ptr, err);
        err
    }
}
