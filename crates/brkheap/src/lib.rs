//! # brkheap
//!
//! A general-purpose heap allocator working directly against operating-system
//! address space.
//!
//! Small requests are carved from one contiguous region that grows and shrinks
//! at its top like the classic program break; every block sits in a singly
//! linked, first-fit list in address order. Requests at or above the large
//! threshold that find no reusable block get their own anonymous mapping.
//!
//! [`Heap`] is the entry point. It is const-constructible, so a process-wide
//! instance can live in a `static` and serve as the `#[global_allocator]`:
//!
//! ```no_run
//! use brkheap::{DataSegment, SpinHeap};
//!
//! #[global_allocator]
//! static GLOBAL: SpinHeap<DataSegment> = SpinHeap::new(DataSegment::new());
//! # fn main() {}
//! ```

pub mod config;
pub mod error;
pub mod header;
pub mod lifecycle;
pub mod segment;

mod arena;
mod global;
mod heap;
mod large;
mod os;

pub use arena::ArenaStats;
pub use config::{HeapConfig, LargeThreshold};
pub use error::HeapError;
pub use header::{HEADER_ALIGN, HEADER_SIZE};
pub use heap::{Heap, HeapStats, SpinHeap};
pub use large::LargeStats;
pub use lifecycle::{LifecycleLevel, LifecycleRecord};
pub use segment::{DataSegment, ReservedSegment, Segment};
