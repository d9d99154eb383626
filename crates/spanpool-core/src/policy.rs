//! Batching and retention policy.
//!
//! The numbers that shape cache footprint live here: how many blocks a
//! thread cache pulls from the central cache per refill, how big a span is
//! for a given class, how many idle spans a class may retain, and when a
//! thread cache flushes half a list back.

use crate::bitmap::BLOCK_COUNT;
use crate::size_class::{LARGE_MAX, MEDIUM_MAX, SMALL_MAX};
use crate::PAGE_SIZE;

/// Per-class budget of idle-span bytes retained by the central cache.
/// Fully-free spans beyond this are handed back to the page cache.
pub const CLASS_IDLE_BYTE_CAP: usize = 4 * 1024 * 1024;

/// Per-class byte budget of a thread cache's free list. Exceeding it
/// triggers a keep-half flush to the central cache.
pub const THREAD_CACHE_BYTE_CAP: usize = 256 * 1024;

/// Number of blocks a thread cache requests per central-cache refill,
/// chosen by block size: many small blocks per trip, few big ones.
#[must_use]
pub const fn batch_size(block_size: usize) -> usize {
    if block_size <= SMALL_MAX {
        64
    } else if block_size <= MEDIUM_MAX {
        32
    } else if block_size <= LARGE_MAX {
        16
    } else {
        4
    }
}

/// Pages needed to back one span of the given class:
/// `ceil(block_size * BLOCK_COUNT / PAGE_SIZE)`.
#[must_use]
pub const fn span_pages(block_size: usize) -> usize {
    (block_size * BLOCK_COUNT).div_ceil(PAGE_SIZE)
}

/// Maximum number of fully-idle spans a class retains before returning one
/// to the page cache. Derived from [`CLASS_IDLE_BYTE_CAP`]; the rounded-up
/// quotient is never below 1.
#[must_use]
pub const fn max_empty_spans(block_size: usize) -> usize {
    CLASS_IDLE_BYTE_CAP.div_ceil(block_size * BLOCK_COUNT)
}

/// True when a thread-cache list of `len` blocks of `block_size` bytes has
/// outgrown its byte budget and should flush.
#[must_use]
pub const fn should_flush(len: usize, block_size: usize) -> bool {
    len * block_size > THREAD_CACHE_BYTE_CAP
}

/// How many blocks a flushing thread cache keeps: half the list, at
/// least one.
#[must_use]
pub const fn flush_keep(len: usize) -> usize {
    let keep = len / 2;
    if keep < 1 {
        1
    } else {
        keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_class::{class_size, NUM_CLASSES};
    use crate::MAX_BYTES;

    #[test]
    fn batch_tiers() {
        assert_eq!(batch_size(16), 64);
        assert_eq!(batch_size(512), 64);
        assert_eq!(batch_size(513), 32);
        assert_eq!(batch_size(4096), 32);
        assert_eq!(batch_size(4097), 16);
        assert_eq!(batch_size(64 * 1024), 16);
        assert_eq!(batch_size(MAX_BYTES), 4);
    }

    #[test]
    fn span_pages_covers_all_blocks() {
        for i in 0..NUM_CLASSES {
            let block = class_size(i);
            let pages = span_pages(block);
            assert!(pages * PAGE_SIZE >= block * BLOCK_COUNT);
            assert!((pages - 1) * PAGE_SIZE < block * BLOCK_COUNT);
        }
    }

    #[test]
    fn smallest_class_span_is_four_pages() {
        assert_eq!(span_pages(16), 4);
    }

    #[test]
    fn idle_cap_is_finite_and_at_least_one() {
        for i in 0..NUM_CLASSES {
            let cap = max_empty_spans(class_size(i));
            assert!(cap >= 1);
            assert!(cap <= CLASS_IDLE_BYTE_CAP / (16 * BLOCK_COUNT) + 1);
        }
        // 4 MiB budget / (16 B * 1024 blocks) spans.
        assert_eq!(max_empty_spans(16), 256);
        // A 256 KiB-block span is 256 MiB; the cap floors at one span.
        assert_eq!(max_empty_spans(MAX_BYTES), 1);
    }

    #[test]
    fn flush_threshold_is_byte_based() {
        assert!(!should_flush(16_384, 16));
        assert!(should_flush(16_385, 16));
        assert!(!should_flush(1, MAX_BYTES));
        assert!(should_flush(2, MAX_BYTES));
    }

    #[test]
    fn flush_keeps_half_at_least_one() {
        assert_eq!(flush_keep(1), 1);
        assert_eq!(flush_keep(2), 1);
        assert_eq!(flush_keep(9), 4);
        assert_eq!(flush_keep(100), 50);
    }
}
