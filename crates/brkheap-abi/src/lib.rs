// Every extern "C" export takes raw pointers from C callers and validates them
// at runtime, so per-function safety sections would repeat the same text.
#![allow(clippy::missing_safety_doc)]
//! # brkheap-abi
//!
//! C allocator entry points over one process-wide [`brkheap`] heap on the real
//! data segment. Built as a `cdylib`, the library can be preloaded in front of
//! the C library's allocator.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> Heap façade -> arena / large regions
//! ```
//!
//! Failures return null (or do nothing, for `free`) and set `errno`:
//! `ENOMEM` when the operating system refuses memory, `EINVAL` for rejected
//! pointers and overflowing sizes.

pub mod errno;

// Gated behind cfg(not(test)): in release builds these modules export
// #[no_mangle] allocator symbols that would replace the allocator of the unit
// test binary itself.
#[cfg(not(test))]
pub mod malloc_abi;
