//! The thread cache.
//!
//! Per-thread front of the allocator: one intrusive free list per size
//! class, no synchronization anywhere. A hit is a pop; a miss pulls a
//! batch from the central cache sized to the class; a list that outgrows
//! its byte budget flushes its back half down. Requests above
//! `MAX_BYTES` skip both caches and talk to the page cache directly.
//!
//! A `ThreadCache` is owned by exactly one thread for its whole life;
//! it is not `Send`, so the compiler enforces this. Dropping it drains
//! every list back to the central cache.

use std::ptr;
use std::sync::Arc;

use spanpool_core::policy;
use spanpool_core::size_class::{class_index, class_size, NUM_CLASSES};
use spanpool_core::PAGE_SIZE;

use crate::central::CentralCache;
use crate::freelist::{read_next, BlockList};
use crate::page::PageCache;

pub struct ThreadCache {
    central: Arc<CentralCache>,
    pages: Arc<PageCache>,
    lists: [BlockList; NUM_CLASSES],
}

impl ThreadCache {
    #[must_use]
    pub fn new(central: Arc<CentralCache>, pages: Arc<PageCache>) -> Self {
        Self {
            central,
            pages,
            lists: [BlockList::EMPTY; NUM_CLASSES],
        }
    }

    /// Returns a block of at least `size` bytes, or null when the OS
    /// refuses to back it. Zero sizes are served from the smallest class.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        match class_index(size) {
            Some(index) => {
                let block = self.lists[index].pop();
                if !block.is_null() {
                    block
                } else {
                    self.fetch_from_central(index)
                }
            }
            None => {
                // Above MAX_BYTES: page-granular, straight to the page cache.
                let num_pages = size.div_ceil(PAGE_SIZE);
                self.pages
                    .allocate_span(num_pages)
                    .map_or(ptr::null_mut(), |p| p.as_ptr())
            }
        }
    }

    /// Takes back a block previously returned by `allocate` with a size
    /// mapping to the same class. Null is a no-op.
    pub fn deallocate(&mut self, block: *mut u8, size: usize) {
        if block.is_null() {
            return;
        }
        match class_index(size) {
            Some(index) => {
                // SAFETY: the caller hands back ownership of the block.
                unsafe { self.lists[index].push(block) };
                if policy::should_flush(self.lists[index].len(), class_size(index)) {
                    self.flush(index);
                }
            }
            None => self.pages.deallocate_span(block),
        }
    }

    /// Number of blocks cached for class `index`.
    #[must_use]
    pub fn cached_blocks(&self, index: usize) -> usize {
        self.lists[index].len()
    }

    fn fetch_from_central(&mut self, index: usize) -> *mut u8 {
        let batch_size = policy::batch_size(class_size(index));
        let batch = self.central.fetch_range(index, batch_size);
        if batch.head.is_null() {
            return ptr::null_mut();
        }
        // The head goes to the caller; the rest refills the list.
        // SAFETY: the batch is a well-formed chain of `count` free blocks.
        unsafe {
            let rest = read_next(batch.head);
            self.lists[index].adopt_chain(rest, batch.count - 1);
        }
        batch.head
    }

    /// Keeps the front half of the list (at least one block) and returns
    /// the rest to the central cache in one chain.
    fn flush(&mut self, index: usize) {
        let keep = policy::flush_keep(self.lists[index].len());
        let rest = self.lists[index].split_off(keep);
        if !rest.is_null() {
            self.central.return_range(rest, index);
        }
    }
}

impl Drop for ThreadCache {
    fn drop(&mut self) {
        for index in 0..NUM_CLASSES {
            let head = self.lists[index].take_all();
            if !head.is_null() {
                self.central.return_range(head, index);
            }
        }
    }
}
