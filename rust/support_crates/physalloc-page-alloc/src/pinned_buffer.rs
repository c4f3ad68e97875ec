//! Pinned, page-aligned memory reservations.
//!
//! This module provides `PinnedBuffer`, a reservation of whole pages that stays
//! resident for its entire lifetime: pages are pre-faulted on allocation and can
//! additionally be locked in RAM. Such memory has a stable physical location and
//! is what a user-space DMA backend hands out.
//!
//! # Contiguity
//!
//! Only a single page is guaranteed to be physically contiguous. A regular page
//! reservation spanning several pages usually is not; a large page reservation
//! that fits within one large page always is. Use
//! [`PinnedBuffer::is_physically_contiguous`] to check.
//!
//! # Safety
//!
//! While `PinnedBuffer` implements `Send` and `Sync`, users must ensure that any
//! data written to the buffer is properly synchronized when accessed from multiple
//! threads.

use std::sync::OnceLock;

use crate::mmap;

/// A reservation of resident, page-aligned memory.
pub struct PinnedBuffer {
    /// Raw pointer to the reserved memory region.
    ptr: *mut u8,
    /// The requested size of the buffer in bytes.
    len: usize,
    /// The actual reserved capacity, rounded up to the page size.
    capacity: usize,
    /// Whether this buffer was reserved using large pages.
    uses_large_pages: bool,
    /// Page size used for the reservation.
    alignment: usize,
    /// Whether the pages are locked in RAM.
    pinned: bool,
}

impl PinnedBuffer {
    /// Returns the size of a regular memory page on the current system.
    pub fn regular_page_size() -> usize {
        mmap::get_page_size()
    }

    /// Returns the size of a large (huge) memory page on the current system.
    pub fn large_page_size() -> usize {
        mmap::get_large_page_size()
    }

    /// Reserves a buffer with automatic fallback from large pages to regular pages.
    ///
    /// # Errors
    ///
    /// Returns an error if both large page and regular page reservation fail.
    pub fn allocate_with_fallback(size: usize) -> std::io::Result<PinnedBuffer> {
        if let Ok(buf) = Self::allocate_large_pages(size) {
            return Ok(buf);
        }
        Self::allocate_regular(size)
    }

    /// Reserves a buffer using large pages.
    ///
    /// # Errors
    ///
    /// Returns an error if large pages are not configured on the system or the
    /// configured pool is exhausted.
    pub fn allocate_large_pages(size: usize) -> std::io::Result<PinnedBuffer> {
        check_large_page_support()?;

        let (ptr, capacity) = mmap::allocate_large_pages(size.max(1))?;
        assert!((ptr as usize).is_multiple_of(Self::large_page_size()));
        Ok(PinnedBuffer {
            ptr: ptr as _,
            len: size,
            capacity,
            uses_large_pages: true,
            alignment: mmap::get_large_page_size(),
            pinned: false,
        })
    }

    /// Reserves a buffer using regular pages.
    ///
    /// # Errors
    ///
    /// Returns an error if the system cannot reserve the requested memory.
    pub fn allocate_regular(size: usize) -> std::io::Result<PinnedBuffer> {
        let (ptr, capacity) = mmap::allocate(size.max(1))?;
        assert!((ptr as usize).is_multiple_of(Self::regular_page_size()));
        Ok(PinnedBuffer {
            ptr: ptr as _,
            len: size,
            capacity,
            uses_large_pages: false,
            alignment: mmap::get_page_size(),
            pinned: false,
        })
    }

    /// Locks the buffer's pages in RAM so they can not be swapped out or migrated.
    ///
    /// Calling this on an already pinned buffer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the locked memory limit would be exceeded.
    pub fn pin(&mut self) -> std::io::Result<()> {
        if !self.pinned {
            unsafe { mmap::lock(self.ptr as _, self.capacity)? };
            self.pinned = true;
        }
        Ok(())
    }

    /// Returns the length of the buffer in bytes, as requested at reservation.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer has a length of 0.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the actual reserved capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a raw pointer to the beginning of the reserved memory.
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Returns `true` if this buffer was reserved using large pages.
    #[inline]
    pub fn uses_large_pages(&self) -> bool {
        self.uses_large_pages
    }

    /// Returns `true` if the buffer's pages are locked in RAM.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Returns the alignment of the buffer in bytes (the page size used).
    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns the physical address of the first byte of the buffer.
    ///
    /// # Errors
    ///
    /// Fails when the platform does not expose page frame numbers to this process.
    pub fn physical_address(&self) -> std::io::Result<u64> {
        mmap::translate(self.ptr)
    }

    /// Checks whether the whole capacity maps to one physically contiguous range.
    ///
    /// # Errors
    ///
    /// Fails when the platform does not expose page frame numbers to this process.
    pub fn is_physically_contiguous(&self) -> std::io::Result<bool> {
        let page_size = mmap::get_page_size();
        let base = mmap::translate(self.ptr)?;
        for page in (page_size..self.capacity).step_by(page_size) {
            let paddr = mmap::translate(unsafe { self.ptr.add(page) })?;
            if paddr != base + page as u64 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns an immutable byte slice of the whole capacity.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.capacity) }
    }

    /// Returns a mutable byte slice of the whole capacity.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.capacity) }
    }
}

impl std::ops::Deref for PinnedBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl std::ops::DerefMut for PinnedBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_bytes_mut()
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        let res = unsafe {
            if self.pinned {
                let _ = mmap::unlock(self.ptr as _, self.capacity);
            }
            if self.uses_large_pages {
                mmap::free_large_pages(self.ptr as _, self.capacity)
            } else {
                mmap::free(self.ptr as _, self.capacity)
            }
        };
        if let Err(e) = res {
            log::error!(
                "failed to release {} bytes at {:p}: {e}",
                self.capacity,
                self.ptr
            );
        }
    }
}

// SAFETY: The buffer exclusively owns its reservation; the pointer is never
// shared with another owner.
unsafe impl Send for PinnedBuffer {}

// SAFETY: Shared access only hands out `&[u8]`; mutation requires `&mut self`.
unsafe impl Sync for PinnedBuffer {}

impl std::fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("uses_large_pages", &self.uses_large_pages)
            .field("pinned", &self.pinned)
            .finish()
    }
}

/// Checks whether large pages can be reserved on this system.
///
/// The result of the first probe is cached.
pub fn check_large_page_support() -> std::io::Result<()> {
    static RESULT: OnceLock<std::io::Result<()>> = OnceLock::new();
    match RESULT.get_or_init(probe_large_page_allocation) {
        Ok(()) => Ok(()),
        Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
    }
}

/// Reserves a minimal large page and immediately releases it.
fn probe_large_page_allocation() -> std::io::Result<()> {
    let (ptr, size) = mmap::allocate_large_pages(1)?;
    let _ = unsafe { mmap::free_large_pages(ptr, size) };
    Ok(())
}
