//! Allocator error taxonomy.
//!
//! Every variant carries only plain integers and static strings so that
//! constructing an error never allocates. That matters when the heap is the
//! process allocator.

use thiserror::Error;

/// Failure of a heap operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The operating system refused to extend the data segment or map a region.
    #[error("out of memory: request for {requested} bytes denied")]
    OutOfMemory {
        /// Total bytes requested from the operating system.
        requested: usize,
    },
    /// Malformed input: an overflowed size, a bad configuration value, or a
    /// pointer this heap never handed out.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Machine-readable reason label.
        reason: &'static str,
    },
    /// Caller contract violation detected through the block's validity tag,
    /// such as releasing the same block twice.
    #[error("undefined usage: {reason} at {addr:#x}")]
    UndefinedUsage {
        /// Machine-readable reason label.
        reason: &'static str,
        /// Payload address passed by the caller.
        addr: usize,
    },
}

impl HeapError {
    /// Short label used in lifecycle records.
    #[must_use]
    pub const fn outcome(self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "oom",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::UndefinedUsage { .. } => "undefined_usage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_payload() {
        let err = HeapError::OutOfMemory { requested: 8192 };
        assert_eq!(
            err.to_string(),
            "out of memory: request for 8192 bytes denied"
        );

        let err = HeapError::UndefinedUsage {
            reason: "double_release",
            addr: 0x1000,
        };
        assert_eq!(err.to_string(), "undefined usage: double_release at 0x1000");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(HeapError::OutOfMemory { requested: 1 }.outcome(), "oom");
        assert_eq!(
            HeapError::InvalidArgument { reason: "x" }.outcome(),
            "invalid_argument"
        );
    }
}
