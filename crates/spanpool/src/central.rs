//! The central cache.
//!
//! One shard per size class, each a 64-byte-aligned spin-locked bundle of:
//! a doubly-linked list of spans with free blocks, a count of fully-idle
//! spans, a block→span index, and a slab pool of span records. Shards
//! never synchronize with each other; a thread cache refilling 16-byte
//! blocks and one refilling 64 KiB blocks contend on nothing.
//!
//! The block→span index comes in two shapes. Small and medium classes
//! pack many blocks per page, so a hash keyed by page base resolves any
//! block with one masked lookup. Larger classes span many pages with few
//! spans, so an ordered map keyed by span base answers with a predecessor
//! search instead of one hash entry per page.

use std::collections::{BTreeMap, HashMap};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use spanpool_core::policy;
use spanpool_core::size_class::{class_size, uses_page_map, NUM_CLASSES};
use spanpool_core::PAGE_SIZE;

use crate::freelist::read_next;
use crate::page::PageCache;
use crate::record::RecordPool;
use crate::span::{push_front, unlink, Batch, Span};
use crate::spin::SpinLock;

/// Block→span index for one size class.
enum SpanIndex {
    /// Page base → span, one entry per page a span occupies.
    ByPage(HashMap<usize, NonNull<Span>>),
    /// Span base → span; resolution is a predecessor search bounded by
    /// the candidate's end.
    ByBase(BTreeMap<usize, NonNull<Span>>),
}

impl SpanIndex {
    fn for_class(index: usize) -> Self {
        if uses_page_map(index) {
            // One entry per page of a span; reserve a span's worth up
            // front so the steady state never rehashes under the lock.
            let pages = policy::span_pages(class_size(index));
            Self::ByPage(HashMap::with_capacity(pages))
        } else {
            Self::ByBase(BTreeMap::new())
        }
    }

    /// Registers a span under every key that can resolve its blocks.
    ///
    /// # Safety
    ///
    /// `span` must be a live record.
    unsafe fn register(&mut self, span: NonNull<Span>) {
        // SAFETY: forwarded contract.
        let (base, pages) = unsafe { ((*span.as_ptr()).base, (*span.as_ptr()).pages) };
        match self {
            Self::ByPage(map) => {
                for p in 0..pages {
                    map.insert(base + p * PAGE_SIZE, span);
                }
            }
            Self::ByBase(map) => {
                map.insert(base, span);
            }
        }
    }

    /// Removes every key registered for `span`.
    ///
    /// # Safety
    ///
    /// `span` must be a live record previously registered here.
    unsafe fn unregister(&mut self, span: NonNull<Span>) {
        // SAFETY: forwarded contract.
        let (base, pages) = unsafe { ((*span.as_ptr()).base, (*span.as_ptr()).pages) };
        match self {
            Self::ByPage(map) => {
                for p in 0..pages {
                    map.remove(&(base + p * PAGE_SIZE));
                }
            }
            Self::ByBase(map) => {
                map.remove(&base);
            }
        }
    }

    /// Resolves the span owning the block at `addr`, if any.
    fn resolve(&self, addr: usize) -> Option<NonNull<Span>> {
        match self {
            Self::ByPage(map) => map.get(&(addr & !(PAGE_SIZE - 1))).copied(),
            Self::ByBase(map) => {
                let (_, &span) = map.range(..=addr).next_back()?;
                // SAFETY: registered spans are live records.
                if addr < unsafe { (*span.as_ptr()).end() } {
                    Some(span)
                } else {
                    None
                }
            }
        }
    }

    fn span_count(&self) -> usize {
        match self {
            // Page-keyed entries repeat per page; spans per class all have
            // the same page count.
            Self::ByPage(map) => map
                .values()
                .next()
                .map_or(0, |&s| map.len() / unsafe { (*s.as_ptr()).pages }),
            Self::ByBase(map) => map.len(),
        }
    }
}

struct ClassState {
    /// Spans with at least one free block.
    free_list: *mut Span,
    /// Spans whose every block is free.
    empty_count: usize,
    index: SpanIndex,
    records: RecordPool<Span>,
    /// Blocks returned whose span could not be resolved (caller misuse);
    /// they are leaked, never guessed at.
    unresolved_blocks: u64,
}

#[repr(align(64))]
struct ClassShard {
    state: SpinLock<ClassState>,
}

/// Per-class occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassStats {
    /// Spans currently owned by the class.
    pub spans: usize,
    /// Spans on the free list (at least one free block each).
    pub listed_spans: usize,
    /// Fully-idle spans.
    pub idle_spans: usize,
    /// Free blocks across listed spans.
    pub free_blocks: usize,
    /// Returned blocks whose span could not be resolved.
    pub unresolved_blocks: u64,
}

/// Process-wide per-size-class span pool.
pub struct CentralCache {
    classes: Box<[ClassShard]>,
    pages: Arc<PageCache>,
}

// SAFETY: all raw-pointer state lives behind the per-class spin locks, and
// the memory spans point at is owned by the page cache, which this struct
// keeps alive.
unsafe impl Send for CentralCache {}
unsafe impl Sync for CentralCache {}

impl CentralCache {
    #[must_use]
    pub fn new(pages: Arc<PageCache>) -> Self {
        let classes = (0..NUM_CLASSES)
            .map(|index| ClassShard {
                state: SpinLock::new(ClassState {
                    free_list: ptr::null_mut(),
                    empty_count: 0,
                    index: SpanIndex::for_class(index),
                    records: RecordPool::new(),
                    unresolved_blocks: 0,
                }),
            })
            .collect();
        Self { classes, pages }
    }

    /// The page cache backing this central cache.
    #[must_use]
    pub fn page_cache(&self) -> &Arc<PageCache> {
        &self.pages
    }

    /// Carves up to `max_batch` blocks of class `index` out of the head
    /// span, fetching a fresh span from the page cache when the class has
    /// none with free blocks. An out-of-range index or zero batch yields
    /// an empty batch without locking; so does OS exhaustion.
    pub fn fetch_range(&self, index: usize, max_batch: usize) -> Batch {
        if index >= NUM_CLASSES || max_batch == 0 {
            return Batch::EMPTY;
        }
        let block_size = class_size(index);
        let mut state = self.classes[index].state.lock();

        if state.free_list.is_null() && self.refill(&mut state, block_size).is_none() {
            return Batch::EMPTY;
        }

        let span = state.free_list;
        // SAFETY: free-listed spans are live records with mapped pages,
        // and their free blocks are owned by this cache.
        unsafe {
            let was_idle = (*span).bitmap.all_free();
            let batch = (*span).allocate_batch(max_batch, block_size);
            if was_idle && batch.count > 0 {
                state.empty_count -= 1;
            }
            if (*span).bitmap.all_allocated() {
                unlink(&mut state.free_list, span);
            }
            batch
        }
    }

    /// Takes back a null-terminated chain of blocks of class `index`. The
    /// chain may mix blocks from any number of spans. Spans that become
    /// fully idle beyond the class's retention cap are returned to the
    /// page cache immediately.
    pub fn return_range(&self, head: *mut u8, index: usize) {
        if head.is_null() || index >= NUM_CLASSES {
            return;
        }
        let block_size = class_size(index);
        let max_idle = policy::max_empty_spans(block_size);
        let mut state = self.classes[index].state.lock();

        let mut block = head;
        while !block.is_null() {
            // SAFETY: caller hands over ownership of a well-formed free
            // chain; the next pointer is read before the block is touched
            // again.
            let next = unsafe { read_next(block) };
            self.take_back(&mut state, block, block_size, max_idle);
            block = next;
        }
    }

    /// Per-class occupancy snapshot.
    pub fn class_stats(&self, index: usize) -> ClassStats {
        assert!(index < NUM_CLASSES);
        let state = self.classes[index].state.lock();
        let mut listed_spans = 0;
        let mut free_blocks = 0;
        let mut cur = state.free_list;
        while !cur.is_null() {
            listed_spans += 1;
            // SAFETY: free-listed spans are live records.
            unsafe {
                free_blocks += (*cur).bitmap.free_count();
                cur = (*cur).next;
            }
        }
        ClassStats {
            spans: state.index.span_count(),
            listed_spans,
            idle_spans: state.empty_count,
            free_blocks,
            unresolved_blocks: state.unresolved_blocks,
        }
    }

    fn take_back(&self, state: &mut ClassState, block: *mut u8, block_size: usize, max_idle: usize) {
        let addr = block as usize;
        let Some(span) = state.index.resolve(addr) else {
            state.unresolved_blocks += 1;
            return;
        };
        let sp = span.as_ptr();
        // SAFETY: resolved spans are live records owned by this class.
        unsafe {
            let block_idx = (addr - (*sp).base) / block_size;
            let was_full = (*sp).bitmap.all_allocated();
            let was_idle = (*sp).bitmap.all_free();
            if !(*sp).bitmap.set_free(block_idx) {
                state.unresolved_blocks += 1;
                return;
            }
            if was_full {
                push_front(&mut state.free_list, sp);
            }
            if !was_idle && (*sp).bitmap.all_free() {
                state.empty_count += 1;
                if state.empty_count > max_idle {
                    self.evict(state, span);
                }
            }
        }
    }

    /// Fetches a fresh span from the page cache, registers it, and lists
    /// it. Nothing is registered when either the span pages or the record
    /// slot cannot be obtained.
    fn refill(&self, state: &mut ClassState, block_size: usize) -> Option<NonNull<Span>> {
        let pages = policy::span_pages(block_size);
        let mem = self.pages.allocate_span(pages)?;
        let base = mem.as_ptr() as usize;
        let span = match state
            .records
            .get(Span::new(base, pages), || {
                self.pages.allocate_span(1)
            }) {
            Some(span) => span,
            None => {
                self.pages.deallocate_span(mem.as_ptr());
                return None;
            }
        };
        // SAFETY: freshly initialised record, unlisted.
        unsafe {
            state.index.register(span);
            push_front(&mut state.free_list, span.as_ptr());
        }
        state.empty_count += 1;
        Some(span)
    }

    /// Hands a fully-idle span back to the page cache.
    ///
    /// # Safety contract (internal): `span` is live, fully free, and on
    /// the free list.
    fn evict(&self, state: &mut ClassState, span: NonNull<Span>) {
        state.empty_count -= 1;
        // SAFETY: the span is listed and registered; after unregistering
        // the record dies back into the pool and only its base survives.
        let base = unsafe {
            unlink(&mut state.free_list, span.as_ptr());
            state.index.unregister(span);
            let base = (*span.as_ptr()).base;
            state.records.put(span);
            base
        };
        self.pages.deallocate_span(base as *mut u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spanpool_core::bitmap::BLOCK_COUNT;

    fn central() -> CentralCache {
        CentralCache::new(Arc::new(PageCache::new()))
    }

    #[test]
    fn rejects_bad_arguments_without_allocating() {
        let cache = central();
        assert!(cache.fetch_range(NUM_CLASSES, 1).is_empty());
        assert!(cache.fetch_range(0, 0).is_empty());
        assert_eq!(cache.page_cache().stats().os_maps, 0);
        cache.return_range(ptr::null_mut(), 0);
    }

    #[test]
    fn first_fetch_creates_one_span() {
        let cache = central();
        let batch = cache.fetch_range(0, 8);
        assert_eq!(batch.count, 8);
        assert!(!batch.head.is_null());

        let stats = cache.class_stats(0);
        assert_eq!(stats.spans, 1);
        assert_eq!(stats.listed_spans, 1);
        assert_eq!(stats.idle_spans, 0);
        assert_eq!(stats.free_blocks, BLOCK_COUNT - 8);

        cache.return_range(batch.head, 0);
        let stats = cache.class_stats(0);
        assert_eq!(stats.idle_spans, 1);
        assert_eq!(stats.free_blocks, BLOCK_COUNT);
    }

    #[test]
    fn batch_is_clamped_to_span_capacity() {
        let cache = central();
        let batch = cache.fetch_range(3, BLOCK_COUNT + 17);
        assert_eq!(batch.count, BLOCK_COUNT);
        cache.return_range(batch.head, 3);
    }

    #[test]
    fn full_span_leaves_the_free_list_and_returns_on_free() {
        let cache = central();
        let batch = cache.fetch_range(5, BLOCK_COUNT);
        assert_eq!(batch.count, BLOCK_COUNT);
        let stats = cache.class_stats(5);
        assert_eq!(stats.spans, 1);
        assert_eq!(stats.listed_spans, 0);

        // Returning one block relists the span.
        // SAFETY: detach the head block from the carved chain.
        let head = batch.head;
        let rest = unsafe { read_next(head) };
        unsafe { crate::freelist::write_next(head, ptr::null_mut()) };
        cache.return_range(head, 5);
        let stats = cache.class_stats(5);
        assert_eq!(stats.listed_spans, 1);
        assert_eq!(stats.free_blocks, 1);

        cache.return_range(rest, 5);
        assert_eq!(cache.class_stats(5).free_blocks, BLOCK_COUNT);
    }

    #[test]
    fn blocks_are_block_size_apart() {
        let cache = central();
        let index = 1; // 32-byte blocks
        let block_size = class_size(index);
        let batch = cache.fetch_range(index, 4);
        let mut addrs = Vec::new();
        let mut cur = batch.head;
        while !cur.is_null() {
            addrs.push(cur as usize);
            // SAFETY: carved chain.
            cur = unsafe { read_next(cur) };
        }
        assert_eq!(addrs.len(), 4);
        for w in addrs.windows(2) {
            assert_eq!(w[1] - w[0], block_size);
        }
        cache.return_range(batch.head, index);
    }

    #[test]
    fn large_class_uses_base_keyed_resolution() {
        let cache = central();
        let index = NUM_CLASSES - 1; // 256 KiB blocks
        let batch = cache.fetch_range(index, 2);
        assert_eq!(batch.count, 2);
        cache.return_range(batch.head, index);
        let stats = cache.class_stats(index);
        assert_eq!(stats.spans, 1);
        assert_eq!(stats.free_blocks, BLOCK_COUNT);
    }

    #[test]
    fn foreign_block_is_counted_and_leaked() {
        let cache = central();
        // Prime the class so the lock path runs.
        let batch = cache.fetch_range(0, 1);
        cache.return_range(batch.head, 0);

        let mut fake = [0usize; 4];
        let before = cache.class_stats(0);
        cache.return_range((&mut fake[0] as *mut usize).cast(), 0);
        let after = cache.class_stats(0);
        assert_eq!(after.unresolved_blocks, before.unresolved_blocks + 1);
        assert_eq!(after.free_blocks, before.free_blocks);
    }
}
