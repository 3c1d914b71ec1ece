//! Structured allocator lifecycle records.
//!
//! The heap appends one record per façade decision to a fixed-capacity ring.
//! Records are `Copy` and hold only integers and static strings, so recording
//! never allocates even when the heap is the process allocator. Rejections and
//! out-of-memory failures are additionally forwarded to the `log` facade.

use std::cell::Cell;

use crate::error::HeapError;

/// Records kept before the oldest one is overwritten.
pub const JOURNAL_CAPACITY: usize = 64;

/// Lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One allocator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleRecord {
    /// Monotonic decision id, starting at 1 for each heap.
    pub decision_id: u64,
    /// Severity level.
    pub level: LifecycleLevel,
    /// Façade operation (`acquire`, `release`, `reallocate`, `zero_allocate`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `shrink_top`, `unmap`, ...).
    pub event: &'static str,
    /// Which manager or list path served the request.
    pub path: &'static str,
    /// Payload address involved in the event.
    pub ptr: Option<usize>,
    /// Size involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
}

/// Fixed-capacity ring of lifecycle records.
pub(crate) struct Journal {
    records: [Option<LifecycleRecord>; JOURNAL_CAPACITY],
    next_slot: usize,
    next_decision_id: u64,
}

impl Journal {
    pub(crate) const fn new() -> Self {
        Self {
            records: [None; JOURNAL_CAPACITY],
            next_slot: 0,
            next_decision_id: 1,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record(
        &mut self,
        level: LifecycleLevel,
        symbol: &'static str,
        event: &'static str,
        path: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
    ) -> u64 {
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        self.records[self.next_slot] = Some(LifecycleRecord {
            decision_id,
            level,
            symbol,
            event,
            path,
            ptr,
            size,
            outcome,
        });
        self.next_slot = (self.next_slot + 1) % JOURNAL_CAPACITY;
        decision_id
    }

    /// Copy of the ring, oldest record first.
    pub(crate) fn snapshot(&self) -> [Option<LifecycleRecord>; JOURNAL_CAPACITY] {
        let mut ordered = [None; JOURNAL_CAPACITY];
        for (i, slot) in ordered.iter_mut().enumerate() {
            *slot = self.records[(self.next_slot + i) % JOURNAL_CAPACITY];
        }
        ordered
    }
}

thread_local! {
    static LOG_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct LogReentryGuard;

impl Drop for LogReentryGuard {
    fn drop(&mut self) {
        let _ = LOG_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn enter_log_guard() -> Option<LogReentryGuard> {
    LOG_DEPTH
        .try_with(|depth| {
            if depth.get() > 0 {
                None
            } else {
                depth.set(1);
                Some(LogReentryGuard)
            }
        })
        .ok()
        .flatten()
}

/// Forwards a failed operation to the `log` facade.
///
/// Must be called with no heap lock held. A logger that allocates through the
/// same heap re-enters here and is silently skipped.
pub(crate) fn emit_failure(symbol: &'static str, ptr: Option<usize>, err: HeapError) {
    let Some(_guard) = enter_log_guard() else {
        return;
    };
    match err {
        HeapError::OutOfMemory { requested } => {
            log::warn!(target: "brkheap", "{symbol}: out of memory (requested {requested} bytes)");
        }
        HeapError::InvalidArgument { reason } => {
            log::warn!(target: "brkheap", "{symbol}: rejected {ptr:#x?}: {reason}");
        }
        HeapError::UndefinedUsage { reason, addr } => {
            log::error!(target: "brkheap", "{symbol}: contract violation at {addr:#x}: {reason}");
        }
    }
}
