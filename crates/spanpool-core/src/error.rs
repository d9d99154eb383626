//! Allocator error taxonomy.
//!
//! Out-of-memory is the only failure the allocator propagates: the
//! pointer-returning entry points flatten it to null and `try_allocate`
//! returns it directly. Every other failure mode (an out-of-range class
//! index, a zero batch, a pointer the allocator does not own, a block
//! whose span cannot be resolved) is local policy, a silent no-op or a
//! count-and-leak, matching platform malloc conventions.

use thiserror::Error;

/// Why an allocator operation could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The operating system refused to map the requested pages.
    #[error("operating system refused to map {bytes} bytes")]
    OutOfMemory {
        /// Size of the mapping that was denied.
        bytes: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_names_the_size() {
        let err = AllocError::OutOfMemory { bytes: 8192 };
        assert_eq!(err.to_string(), "operating system refused to map 8192 bytes");
    }
}
