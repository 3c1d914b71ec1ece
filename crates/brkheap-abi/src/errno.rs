//! `errno` reporting for the C entry points.

use std::ffi::c_int;

use brkheap::HeapError;

/// `errno` value reported for a heap failure.
#[must_use]
pub const fn errno_for(err: HeapError) -> c_int {
    match err {
        HeapError::OutOfMemory { .. } => libc::ENOMEM,
        HeapError::InvalidArgument { .. } | HeapError::UndefinedUsage { .. } => libc::EINVAL,
    }
}

#[inline]
pub(crate) unsafe fn set_abi_errno(val: c_int) {
    // SAFETY: __errno_location returns a valid TLS pointer for this thread.
    let p = unsafe { libc::__errno_location() };
    // SAFETY: pointer is valid for write per errno ABI contract.
    unsafe { *p = val };
}

/// Reports `err` through `errno`.
#[inline]
pub(crate) fn report(err: HeapError) {
    // SAFETY: plain thread-local store.
    unsafe { set_abi_errno(errno_for(err)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oom_maps_to_enomem() {
        assert_eq!(errno_for(HeapError::OutOfMemory { requested: 1 }), libc::ENOMEM);
    }

    #[test]
    fn rejections_map_to_einval() {
        assert_eq!(
            errno_for(HeapError::InvalidArgument {
                reason: "unknown_pointer"
            }),
            libc::EINVAL
        );
        assert_eq!(
            errno_for(HeapError::UndefinedUsage {
                reason: "double_release",
                addr: 0x1000
            }),
            libc::EINVAL
        );
    }

    #[test]
    fn report_sets_thread_errno() {
        report(HeapError::OutOfMemory { requested: 7 });
        assert_eq!(unsafe { *libc::__errno_location() }, libc::ENOMEM);
    }
}
