//! Size-class partition of the request range.
//!
//! Requests in `[1, MAX_BYTES]` are partitioned into four tiers, each with
//! its own step: fine steps where allocations are dense, coarse steps where
//! internal fragmentation matters less. Every class has a stable index;
//! `class_index` maps a request size to the smallest covering class and
//! `class_size` maps the index back to the class's block size.

use crate::{ALIGNMENT, MAX_BYTES};

/// Upper bound of the small tier (inclusive). Stepped by [`ALIGNMENT`].
pub const SMALL_MAX: usize = 512;
/// Upper bound of the medium tier (inclusive).
pub const MEDIUM_MAX: usize = 4 * 1024;
/// Step between medium classes.
pub const MEDIUM_STEP: usize = 64;
/// Upper bound of the large tier (inclusive).
pub const LARGE_MAX: usize = 64 * 1024;
/// Step between large classes.
pub const LARGE_STEP: usize = 512;
/// Step between x-large classes. The tier tops out at [`MAX_BYTES`].
pub const XLARGE_STEP: usize = 4096;

/// Number of classes in the small tier.
pub const SMALL_CLASSES: usize = SMALL_MAX / ALIGNMENT;
/// Number of classes in the medium tier.
pub const MEDIUM_CLASSES: usize = (MEDIUM_MAX - SMALL_MAX) / MEDIUM_STEP;
/// Number of classes in the large tier.
pub const LARGE_CLASSES: usize = (LARGE_MAX - MEDIUM_MAX) / LARGE_STEP;
/// Number of classes in the x-large tier.
pub const XLARGE_CLASSES: usize = (MAX_BYTES - LARGE_MAX) / XLARGE_STEP;

/// Total number of size classes.
pub const NUM_CLASSES: usize = SMALL_CLASSES + MEDIUM_CLASSES + LARGE_CLASSES + XLARGE_CLASSES;

/// First class index whose block size exceeds one page. Classes below this
/// boundary pack many blocks per page, so block→span resolution goes
/// through a page-keyed hash; classes at or above it use a base-keyed
/// ordered map instead.
pub const PAGE_KEYED_CLASSES: usize = SMALL_CLASSES + MEDIUM_CLASSES;

const _: () = assert!(SMALL_MAX % ALIGNMENT == 0);
const _: () = assert!((MEDIUM_MAX - SMALL_MAX) % MEDIUM_STEP == 0);
const _: () = assert!((LARGE_MAX - MEDIUM_MAX) % LARGE_STEP == 0);
const _: () = assert!((MAX_BYTES - LARGE_MAX) % XLARGE_STEP == 0);
const _: () = assert!(NUM_CLASSES == 256);

/// Rounds `bytes` up to the next multiple of `step` (a power of two or not;
/// only divisibility is assumed).
#[must_use]
pub const fn round_up(bytes: usize, step: usize) -> usize {
    bytes.div_ceil(step) * step
}

/// Maps a request size to the index of the smallest class that covers it.
///
/// Zero-size requests are clamped to the smallest class. Requests above
/// [`MAX_BYTES`] return `None` and must bypass the class machinery.
#[must_use]
pub const fn class_index(bytes: usize) -> Option<usize> {
    if bytes > MAX_BYTES {
        return None;
    }
    if bytes <= SMALL_MAX {
        // bytes == 0 lands in class 0 via the max(1) clamp.
        let bytes = if bytes == 0 { 1 } else { bytes };
        Some(bytes.div_ceil(ALIGNMENT) - 1)
    } else if bytes <= MEDIUM_MAX {
        Some(SMALL_CLASSES + (bytes - SMALL_MAX).div_ceil(MEDIUM_STEP) - 1)
    } else if bytes <= LARGE_MAX {
        Some(SMALL_CLASSES + MEDIUM_CLASSES + (bytes - MEDIUM_MAX).div_ceil(LARGE_STEP) - 1)
    } else {
        Some(PAGE_KEYED_CLASSES + LARGE_CLASSES + (bytes - LARGE_MAX).div_ceil(XLARGE_STEP) - 1)
    }
}

/// Returns the block size of the class at `index` (the inclusive upper
/// bound of the requests it covers).
///
/// # Panics
///
/// Panics if `index >= NUM_CLASSES`.
#[must_use]
pub const fn class_size(index: usize) -> usize {
    assert!(index < NUM_CLASSES);
    if index < SMALL_CLASSES {
        (index + 1) * ALIGNMENT
    } else if index < SMALL_CLASSES + MEDIUM_CLASSES {
        SMALL_MAX + (index - SMALL_CLASSES + 1) * MEDIUM_STEP
    } else if index < PAGE_KEYED_CLASSES + LARGE_CLASSES {
        MEDIUM_MAX + (index - SMALL_CLASSES - MEDIUM_CLASSES + 1) * LARGE_STEP
    } else {
        LARGE_MAX + (index - PAGE_KEYED_CLASSES - LARGE_CLASSES + 1) * XLARGE_STEP
    }
}

/// Returns true when the class's block→span lookups go through the
/// page-keyed hash rather than the base-keyed ordered map.
#[must_use]
pub const fn uses_page_map(index: usize) -> bool {
    index < PAGE_KEYED_CLASSES
}
