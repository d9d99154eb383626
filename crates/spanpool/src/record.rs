//! Slab-backed record pools.
//!
//! Span and run records churn on every split, merge, and span fetch, so
//! they never go through a general-purpose allocator. A pool carves whole
//! pages into record-sized slots: the first 64 bytes of each slab page
//! link it to the next slab, the rest is slots. Freed records go onto a
//! private intrusive freelist (reusing the slot's first word), and the
//! slab pages themselves are only released at teardown.
//!
//! The pool does not fetch pages itself; the caller passes a page source
//! at each `get`, because one pool draws slabs straight from the OS while
//! another draws them from the page cache.

use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

use spanpool_core::PAGE_SIZE;

/// Bytes reserved at the start of every slab page for the slab link.
const SLAB_HEADER: usize = 64;

pub(crate) struct RecordPool<T> {
    /// Head of the slab-page list; the first word of a slab links the next.
    slabs: *mut u8,
    /// Head of the free-slot list; the first word of a slot links the next.
    free: *mut u8,
    _marker: PhantomData<T>,
}

impl<T: Copy> RecordPool<T> {
    pub(crate) const fn new() -> Self {
        // Slots are linked through their first word, and slot offsets are
        // multiples of size_of::<T>() past the 64-byte header.
        assert!(mem::size_of::<T>() >= mem::size_of::<*mut u8>());
        assert!(mem::align_of::<T>() <= SLAB_HEADER);
        assert!(PAGE_SIZE - SLAB_HEADER >= mem::size_of::<T>());
        Self {
            slabs: ptr::null_mut(),
            free: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Number of records carved out of one slab page.
    pub(crate) const fn records_per_slab() -> usize {
        (PAGE_SIZE - SLAB_HEADER) / mem::size_of::<T>()
    }

    /// Takes a record slot, initialised to `value`. When no slot is free,
    /// `grab_page` is asked for one fresh page to carve; a `None` from it
    /// propagates.
    pub(crate) fn get(
        &mut self,
        value: T,
        grab_page: impl FnOnce() -> Option<NonNull<u8>>,
    ) -> Option<NonNull<T>> {
        if self.free.is_null() {
            self.carve_slab(grab_page()?);
        }
        let slot = self.free;
        // SAFETY: `slot` heads the free-slot list; its first word is the
        // next link.
        unsafe {
            self.free = (slot.cast::<*mut u8>()).read();
            let record = slot.cast::<T>();
            record.write(value);
            Some(NonNull::new_unchecked(record))
        }
    }

    /// Returns a record slot to the pool.
    ///
    /// # Safety
    ///
    /// `record` must have come from `get` on this pool and must not be
    /// used again.
    pub(crate) unsafe fn put(&mut self, record: NonNull<T>) {
        let slot = record.as_ptr().cast::<u8>();
        // SAFETY: the slot is dead; its first word becomes the free link.
        unsafe { (slot.cast::<*mut u8>()).write(self.free) };
        self.free = slot;
    }

    /// Releases every slab page through `release`. All records are dead
    /// after this; the pool is left empty.
    ///
    /// # Safety
    ///
    /// No record obtained from this pool may be referenced afterwards.
    pub(crate) unsafe fn drain_slabs(&mut self, mut release: impl FnMut(NonNull<u8>)) {
        let mut slab = self.slabs;
        while !slab.is_null() {
            // SAFETY: slab pages are live until released below.
            let next = unsafe { (slab.cast::<*mut u8>()).read() };
            release(NonNull::new(slab).expect("slab list holds non-null pages"));
            slab = next;
        }
        self.slabs = ptr::null_mut();
        self.free = ptr::null_mut();
    }

    fn carve_slab(&mut self, page: NonNull<u8>) {
        let base = page.as_ptr();
        // SAFETY: `page` is a fresh PAGE_SIZE mapping; the header link and
        // every slot lie inside it.
        unsafe {
            (base.cast::<*mut u8>()).write(self.slabs);
            self.slabs = base;
            for i in 0..Self::records_per_slab() {
                let slot = base.add(SLAB_HEADER + i * mem::size_of::<T>());
                (slot.cast::<*mut u8>()).write(self.free);
                self.free = slot;
            }
        }
    }
}
