//! The page provider: where the arena's one reservation comes from.
//!
//! Layout of an `MmapPages` reservation:
//!
//! ```text
//! [guard page] [reserved pages ...] [guard page]
//! ```
//!
//! Everything starts out inaccessible. The arena populates its metadata pages
//! at creation and storage pages as the bump high-water mark advances. Guard
//! pages are never populated, so overruns off either end fault.

use crate::platform;
use crate::util::{align_down, align_up, page_size};
use core::ptr::NonNull;

/// Source of the arena's backing memory.
pub trait PageProvider {
    /// Granularity of `reserve` and `populate`.
    fn page_size(&self) -> usize;

    /// Reserve `size` bytes (a page multiple) of address space. The returned
    /// pointer is page aligned. Nothing in the range is accessible until
    /// populated.
    fn reserve(&self, size: usize) -> Option<NonNull<u8>>;

    /// Make `[ptr, ptr + len)` readable and writable. Fresh pages read as zero.
    ///
    /// # Safety
    /// The range must lie inside a reservation returned by `reserve`.
    unsafe fn populate(&self, ptr: NonNull<u8>, len: usize) -> bool;

    /// Return a reservation to the system.
    ///
    /// # Safety
    /// `ptr` and `size` must describe an entire reservation from `reserve`, and
    /// nothing may reference it afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);
}

/// Anonymous-mmap page provider with optional guard pages.
#[derive(Debug, Clone, Copy)]
pub struct MmapPages {
    guard_pages: bool,
}

impl MmapPages {
    /// Provider using the `guard-pages` cargo feature setting.
    pub const fn new() -> Self {
        MmapPages {
            guard_pages: cfg!(feature = "guard-pages"),
        }
    }

    pub const fn with_guard_pages(guard_pages: bool) -> Self {
        MmapPages { guard_pages }
    }

    #[inline]
    fn guard_size(&self) -> usize {
        if self.guard_pages {
            page_size()
        } else {
            0
        }
    }
}

impl Default for MmapPages {
    fn default() -> Self {
        Self::new()
    }
}

impl PageProvider for MmapPages {
    fn page_size(&self) -> usize {
        page_size()
    }

    fn reserve(&self, size: usize) -> Option<NonNull<u8>> {
        let guard = self.guard_size();
        let size = align_up(size, page_size());
        let total = size.checked_add(2 * guard)?;
        // SAFETY: total is a non-zero page multiple.
        let base = unsafe { platform::map_reserved(total) };
        // SAFETY: the front guard lies inside the mapping.
        NonNull::new(base).map(|base| unsafe { NonNull::new_unchecked(base.as_ptr().add(guard)) })
    }

    unsafe fn populate(&self, ptr: NonNull<u8>, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        let start = align_down(ptr.as_ptr() as usize, page_size());
        let end = align_up(ptr.as_ptr() as usize + len, page_size());
        platform::protect_read_write(start as *mut u8, end - start)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        let guard = self.guard_size();
        let size = align_up(size, page_size());
        platform::unmap(ptr.as_ptr().sub(guard), size + 2 * guard);
    }
}
