//! Span records.
//!
//! A span is a run of pages owned by one size class and carved into
//! exactly [`BLOCK_COUNT`] blocks. The record tracks occupancy with a
//! bitmap and links into its class's free-span list. Records are pool
//! slots (see `record`), 64-byte aligned so neighbouring records never
//! share a cache line.

use std::ptr;

use spanpool_core::bitmap::SpanBitmap;
use spanpool_core::PAGE_SIZE;

use crate::freelist::write_next;

/// A batch of carved blocks: an intrusive chain of `count` blocks starting
/// at `head`, terminated by null. An empty batch has a null head.
#[derive(Debug, Clone, Copy)]
pub struct Batch {
    /// First block of the chain, or null.
    pub head: *mut u8,
    /// Number of blocks in the chain.
    pub count: usize,
}

impl Batch {
    pub(crate) const EMPTY: Self = Self {
        head: ptr::null_mut(),
        count: 0,
    };

    /// True when the batch carries no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

#[repr(align(64))]
#[derive(Clone, Copy)]
pub(crate) struct Span {
    pub(crate) base: usize,
    pub(crate) pages: usize,
    pub(crate) bitmap: SpanBitmap,
    pub(crate) prev: *mut Span,
    pub(crate) next: *mut Span,
}

impl Span {
    pub(crate) fn new(base: usize, pages: usize) -> Self {
        Self {
            base,
            pages,
            bitmap: SpanBitmap::new(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Address one past the span's last byte.
    pub(crate) fn end(&self) -> usize {
        self.base + self.pages * PAGE_SIZE
    }

    /// Carves up to `max_batch` free blocks out of the span, in strictly
    /// increasing block order, chaining them through their first words.
    ///
    /// # Safety
    ///
    /// The span's pages must be mapped and every currently-free block must
    /// be unreferenced by callers (their first words get clobbered).
    pub(crate) unsafe fn allocate_batch(&mut self, max_batch: usize, block_size: usize) -> Batch {
        let base = self.base;
        let mut head: *mut u8 = ptr::null_mut();
        let mut tail: *mut u8 = ptr::null_mut();
        let count = self.bitmap.carve(max_batch, |idx| {
            let block = (base + idx * block_size) as *mut u8;
            if tail.is_null() {
                head = block;
            } else {
                // SAFETY: `tail` is a block carved just before this one.
                unsafe { write_next(tail, block) };
            }
            tail = block;
        });
        if !tail.is_null() {
            // SAFETY: `tail` is the last carved block.
            unsafe { write_next(tail, ptr::null_mut()) };
        }
        Batch { head, count }
    }
}

/// Pushes `span` onto the head of a doubly-linked span list.
///
/// # Safety
///
/// `span` must be live, unlisted, and `head` must be a well-formed list.
pub(crate) unsafe fn push_front(head: &mut *mut Span, span: *mut Span) {
    // SAFETY: forwarded contract.
    unsafe {
        (*span).prev = ptr::null_mut();
        (*span).next = *head;
        if !head.is_null() {
            (**head).prev = span;
        }
    }
    *head = span;
}

/// Unlinks `span` from the doubly-linked span list rooted at `head`.
///
/// # Safety
///
/// `span` must currently be a member of that list.
pub(crate) unsafe fn unlink(head: &mut *mut Span, span: *mut Span) {
    // SAFETY: forwarded contract.
    unsafe {
        let (prev, next) = ((*span).prev, (*span).next);
        if prev.is_null() {
            debug_assert_eq!(*head, span);
            *head = next;
        } else {
            (*prev).next = next;
        }
        if !next.is_null() {
            (*next).prev = prev;
        }
        (*span).prev = ptr::null_mut();
        (*span).next = ptr::null_mut();
    }
}
