//! Operating-system virtual memory interface.
//!
//! The allocator needs exactly two things from the kernel: page-aligned
//! anonymous read/write memory, and a way to give it back. Mapped memory
//! is guaranteed zeroed. Under Miri there is no FFI, so the same contract
//! is fulfilled through `std::alloc`, which also lets Miri see leaks of
//! whole mappings.

use std::ptr::NonNull;

use spanpool_core::PAGE_SIZE;

/// Maps `bytes` of fresh anonymous, private, read/write memory. `bytes`
/// must be a non-zero whole number of pages. Returns `None` when the OS
/// refuses.
pub(crate) fn map_pages(bytes: usize) -> Option<NonNull<u8>> {
    debug_assert!(bytes > 0 && bytes % PAGE_SIZE == 0);
    imp::map(bytes)
}

/// Unmaps a mapping previously obtained from [`map_pages`].
///
/// # Safety
///
/// `addr` and `bytes` must describe exactly one prior [`map_pages`] call
/// whose memory has not already been unmapped.
pub(crate) unsafe fn unmap_pages(addr: NonNull<u8>, bytes: usize) {
    debug_assert!(bytes > 0 && bytes % PAGE_SIZE == 0);
    // SAFETY: forwarded contract.
    unsafe { imp::unmap(addr, bytes) }
}

#[cfg(not(miri))]
mod imp {
    use std::ptr::{self, NonNull};

    pub(super) fn map(bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: anonymous mapping, no file descriptor involved; the
        // kernel picks the address.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(addr.cast())
        }
    }

    pub(super) unsafe fn unmap(addr: NonNull<u8>, bytes: usize) {
        // SAFETY: caller passes an exact prior mapping.
        let rc = unsafe { libc::munmap(addr.as_ptr().cast(), bytes) };
        debug_assert_eq!(rc, 0, "munmap of an exact prior mapping cannot fail");
    }
}

#[cfg(miri)]
mod imp {
    use std::alloc::{self, Layout};
    use std::ptr::NonNull;

    use spanpool_core::PAGE_SIZE;

    fn layout(bytes: usize) -> Layout {
        Layout::from_size_align(bytes, PAGE_SIZE).expect("whole pages fit a layout")
    }

    pub(super) fn map(bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: layout has non-zero size. mmap memory is zeroed, so the
        // mock must zero as well.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout(bytes)) })
    }

    pub(super) unsafe fn unmap(addr: NonNull<u8>, bytes: usize) {
        // SAFETY: caller passes an exact prior mapping.
        unsafe { alloc::dealloc(addr.as_ptr(), layout(bytes)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_pages_are_zeroed_and_writable() {
        let bytes = 2 * PAGE_SIZE;
        let addr = map_pages(bytes).expect("map");
        // SAFETY: fresh mapping of `bytes`.
        unsafe {
            for off in [0, 1, PAGE_SIZE, bytes - 1] {
                assert_eq!(*addr.as_ptr().add(off), 0);
            }
            addr.as_ptr().write_bytes(0xa5, bytes);
            assert_eq!(*addr.as_ptr().add(bytes - 1), 0xa5);
            unmap_pages(addr, bytes);
        }
    }

    #[test]
    fn mappings_are_page_aligned() {
        let addr = map_pages(PAGE_SIZE).expect("map");
        assert_eq!(addr.as_ptr() as usize % PAGE_SIZE, 0);
        // SAFETY: exact prior mapping.
        unsafe { unmap_pages(addr, PAGE_SIZE) };
    }
}
