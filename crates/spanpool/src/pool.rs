//! The allocator facade.
//!
//! [`MemoryPool`] wires the three layers together: one page cache, one
//! central cache on top of it, and a thread cache per calling thread.
//! Thread caches live in a thread-local registry keyed by pool identity,
//! a short vector with linear scan, since a process rarely holds more than
//! a handful of pools. The module-level [`allocate`]/[`deallocate`] pair
//! goes through a lazily-created process-wide default pool.
//!
//! The pool is not a `GlobalAlloc`: its span indexes and this registry
//! allocate through `std`, so installing it as the global allocator would
//! recurse into itself. It is an explicit-API allocator.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use spanpool_core::error::AllocError;
use spanpool_core::policy;
use spanpool_core::size_class::{class_index, class_size};
use spanpool_core::PAGE_SIZE;

use crate::central::CentralCache;
use crate::page::PageCache;
use crate::thread::ThreadCache;

thread_local! {
    /// Thread caches of this thread, one per pool it has touched.
    static THREAD_CACHES: RefCell<Vec<(usize, ThreadCache)>> = const { RefCell::new(Vec::new()) };
}

/// A complete allocator instance: page cache, central cache, and
/// per-thread front caches.
pub struct MemoryPool {
    central: Arc<CentralCache>,
    pages: Arc<PageCache>,
}

impl MemoryPool {
    #[must_use]
    pub fn new() -> Self {
        let pages = Arc::new(PageCache::new());
        let central = Arc::new(CentralCache::new(Arc::clone(&pages)));
        Self { central, pages }
    }

    /// Returns a pointer to at least `size` bytes aligned to `ALIGNMENT`,
    /// or null when the OS refuses to map. A zero `size` is clamped up to
    /// the smallest class.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.with_thread_cache(|tc| tc.allocate(size))
    }

    /// Like [`MemoryPool::allocate`] but surfaces the failure cause.
    pub fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        NonNull::new(self.allocate(size)).ok_or(AllocError::OutOfMemory {
            bytes: backing_bytes(size),
        })
    }

    /// Takes back a block from a prior `allocate(s)` where `s` maps to the
    /// same size class as `size` (or both exceed `MAX_BYTES` with the same
    /// rounded page count). Null is a no-op.
    pub fn deallocate(&self, block: *mut u8, size: usize) {
        if block.is_null() {
            return;
        }
        self.with_thread_cache(|tc| tc.deallocate(block, size));
    }

    /// The pool's central cache (per-class snapshots for callers that
    /// watch occupancy).
    #[must_use]
    pub fn central_cache(&self) -> &CentralCache {
        &self.central
    }

    /// The pool's page cache.
    #[must_use]
    pub fn page_cache(&self) -> &PageCache {
        &self.pages
    }

    fn with_thread_cache<R>(&self, f: impl FnOnce(&mut ThreadCache) -> R) -> R {
        let key = Arc::as_ptr(&self.central) as usize;
        THREAD_CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            if let Some(pos) = caches.iter().position(|(k, _)| *k == key) {
                return f(&mut caches[pos].1);
            }
            caches.push((
                key,
                ThreadCache::new(Arc::clone(&self.central), Arc::clone(&self.pages)),
            ));
            let entry = caches.last_mut().expect("just pushed");
            f(&mut entry.1)
        })
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes the OS would need to map for a request of `size` bytes.
fn backing_bytes(size: usize) -> usize {
    match class_index(size) {
        Some(index) => policy::span_pages(class_size(index)) * PAGE_SIZE,
        None => size.div_ceil(PAGE_SIZE).saturating_mul(PAGE_SIZE),
    }
}

/// The process-wide default pool.
pub fn global() -> &'static MemoryPool {
    static POOL: OnceLock<MemoryPool> = OnceLock::new();
    POOL.get_or_init(MemoryPool::new)
}

/// Allocates from the default pool. See [`MemoryPool::allocate`].
pub fn allocate(size: usize) -> *mut u8 {
    global().allocate(size)
}

/// Deallocates into the default pool. See [`MemoryPool::deallocate`].
pub fn deallocate(block: *mut u8, size: usize) {
    global().deallocate(block, size)
}
