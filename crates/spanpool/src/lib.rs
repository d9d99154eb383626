//! # spanpool
//!
//! A thread-aware memory allocator with a three-tier caching hierarchy:
//!
//! | Layer | Responsibility |
//! |---|---|
//! | [`ThreadCache`] | Per-thread free lists, one per size class. Most allocations are an unsynchronized pop. |
//! | [`CentralCache`] | Process-wide span pool per size class. Hands batches of blocks to thread caches and takes them back, tracking occupancy with per-span bitmaps. |
//! | [`PageCache`]  | Process-wide pool of variable-length page runs. First-fit with tail splitting, two-sided coalescing on return, OS mmap only on misses. |
//!
//! Allocation flows downward only as far as it must: a thread-cache hit
//! touches no atomics; a miss pulls a batch from the central cache under a
//! per-class spin flag; only a central miss reaches the page cache and,
//! past that, the operating system. Deallocation is symmetric, with
//! byte-budget caps bounding what each layer retains.
//!
//! The policy arithmetic (size classes, batch sizes, retention caps) lives
//! in `spanpool-core`; this crate does the pointer work.
//!
//! ```
//! let ptr = spanpool::allocate(100);
//! assert!(!ptr.is_null());
//! spanpool::deallocate(ptr, 100);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

mod central;
mod freelist;
mod os;
mod page;
mod pool;
mod record;
mod span;
mod spin;
mod thread;

pub use central::{CentralCache, ClassStats};
pub use page::{PageCache, PageCacheStats};
pub use pool::{allocate, deallocate, global, MemoryPool};
pub use span::Batch;
pub use spanpool_core::error::AllocError;
pub use spanpool_core::size_class::NUM_CLASSES;
pub use spanpool_core::{ALIGNMENT, MAX_BYTES, PAGE_SIZE};
pub use thread::ThreadCache;
