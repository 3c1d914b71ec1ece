//! Heap configuration.
//!
//! The large-block threshold may come from the `BRKHEAP_MMAP_THRESHOLD`
//! environment variable, accepting a byte count with an optional `k` or `m`
//! suffix (`131072`, `128k`, `1m`). Unset or unparsable values fall back to
//! [`DEFAULT_LARGE_THRESHOLD`].

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::error::HeapError;

/// Page granularity used when rounding arena growth and large mappings.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Requests of at least this many bytes bypass the arena on a free-list miss.
pub const DEFAULT_LARGE_THRESHOLD: usize = 128 * 1024;

/// Environment variable consulted by [`LargeThreshold::Environment`].
pub const THRESHOLD_ENV: &str = "BRKHEAP_MMAP_THRESHOLD";

/// Where the large-block threshold comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LargeThreshold {
    /// A fixed byte count.
    Fixed(usize),
    /// Read once from [`THRESHOLD_ENV`], cached for the process lifetime.
    Environment,
}

impl LargeThreshold {
    /// Byte count in effect for this threshold source.
    #[must_use]
    pub fn resolve(self) -> usize {
        match self {
            Self::Fixed(bytes) => bytes,
            Self::Environment => env_large_threshold(),
        }
    }
}

/// Tunables for one heap instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Rounding granularity for arena growth and large mappings. Power of two.
    pub page_size: usize,
    /// Size at or above which a free-list miss maps a dedicated region.
    pub large_threshold: LargeThreshold,
    /// Record lifecycle events into the in-memory journal.
    pub journal: bool,
}

impl HeapConfig {
    /// Defaults: 4096-byte pages, environment-driven 128 KiB threshold, journal on.
    pub const DEFAULT: Self = Self {
        page_size: DEFAULT_PAGE_SIZE,
        large_threshold: LargeThreshold::Environment,
        journal: true,
    };

    /// Replaces the threshold with a fixed byte count.
    #[must_use]
    pub const fn with_large_threshold(mut self, bytes: usize) -> Self {
        self.large_threshold = LargeThreshold::Fixed(bytes);
        self
    }

    /// Replaces the page granularity.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Disables the lifecycle journal.
    #[must_use]
    pub const fn without_journal(mut self) -> Self {
        self.journal = false;
        self
    }

    /// Rejects configurations the engine cannot honour.
    pub fn validate(&self) -> Result<(), HeapError> {
        if !self.page_size.is_power_of_two() || self.page_size < crate::header::HEADER_ALIGN {
            return Err(HeapError::InvalidArgument {
                reason: "page_size_not_power_of_two",
            });
        }
        if self.large_threshold == LargeThreshold::Fixed(0) {
            return Err(HeapError::InvalidArgument {
                reason: "large_threshold_zero",
            });
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Parses a threshold value such as `65536`, `64k` or `2M`.
///
/// Returns `None` for empty, zero, malformed or overflowing input.
#[must_use]
pub fn parse_threshold(raw: &str) -> Option<usize> {
    let trimmed = raw.trim();
    let (digits, multiplier) = match trimmed.as_bytes().last()? {
        b'k' | b'K' => (&trimmed[..trimmed.len() - 1], 1024),
        b'm' | b'M' => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        _ => (trimmed, 1),
    };
    let value: usize = digits.parse().ok()?;
    match value.checked_mul(multiplier)? {
        0 => None,
        bytes => Some(bytes),
    }
}

// 0=unresolved, 1=resolving, 2=resolved. A reentrant call observed while
// resolving (the env lookup itself allocates) gets the default instead of
// blocking on a OnceLock initializer.
static THRESHOLD_STATE: AtomicU8 = AtomicU8::new(0);
static THRESHOLD_VALUE: AtomicUsize = AtomicUsize::new(DEFAULT_LARGE_THRESHOLD);

const STATE_UNRESOLVED: u8 = 0;
const STATE_RESOLVING: u8 = 1;
const STATE_RESOLVED: u8 = 2;

/// Large-block threshold from the environment, resolved on first call.
#[must_use]
pub fn env_large_threshold() -> usize {
    match THRESHOLD_STATE.load(Ordering::Acquire) {
        STATE_RESOLVED => return THRESHOLD_VALUE.load(Ordering::Relaxed),
        STATE_RESOLVING => return DEFAULT_LARGE_THRESHOLD,
        _ => {}
    }

    if THRESHOLD_STATE
        .compare_exchange(
            STATE_UNRESOLVED,
            STATE_RESOLVING,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        // Another thread is resolving right now.
        return DEFAULT_LARGE_THRESHOLD;
    }

    let resolved = std::env::var(THRESHOLD_ENV)
        .ok()
        .as_deref()
        .and_then(parse_threshold)
        .unwrap_or(DEFAULT_LARGE_THRESHOLD);
    THRESHOLD_VALUE.store(resolved, Ordering::Relaxed);
    THRESHOLD_STATE.store(STATE_RESOLVED, Ordering::Release);
    resolved
}
