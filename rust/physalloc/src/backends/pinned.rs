//! A backend over pinned, page-aligned process memory.
//!
//! Reservations are whole pages, pre-faulted and (best effort) locked in RAM,
//! so they stay resident at a fixed location. How their device-visible address
//! is derived is configured with [`AddressTranslation`].

use std::ptr::NonNull;
use std::sync::{Mutex, PoisonError};

use ahash::AHashMap;
use physalloc_common::{Result, error::Error, verify_arg};
use physalloc_page_alloc::pinned_buffer::PinnedBuffer;

use crate::backend::PhysMemBackend;
use crate::block::{PhysAddr, PhysMemBlock};

/// How the backend computes the physical address of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressTranslation {
    /// The virtual address is reported as the physical address. Matches an
    /// IOMMU domain that identity-maps the process, and software consumers.
    #[default]
    Identity,
    /// Page frames are looked up in `/proc/self/pagemap`. Reservations that
    /// are not physically contiguous are rejected.
    Pagemap,
}

/// Reserves physical memory from pinned process pages.
pub struct PinnedPageBackend {
    large_pages: bool,
    lock_pages: bool,
    translation: AddressTranslation,
    reservations: Mutex<AHashMap<usize, PinnedBuffer>>,
}

impl PinnedPageBackend {
    pub fn builder() -> PinnedPageBackendBuilder {
        PinnedPageBackendBuilder::default()
    }

    pub fn translation(&self) -> AddressTranslation {
        self.translation
    }

    /// Number of blocks reserved and not yet released.
    pub fn live_reservations(&self) -> usize {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn allocate(&self, size: usize) -> std::io::Result<PinnedBuffer> {
        if self.large_pages {
            PinnedBuffer::allocate_with_fallback(size)
        } else {
            PinnedBuffer::allocate_regular(size)
        }
    }

    fn physical_address(&self, buffer: &PinnedBuffer) -> Result<u64> {
        match self.translation {
            AddressTranslation::Identity => Ok(buffer.ptr() as u64),
            AddressTranslation::Pagemap => {
                let contiguous = buffer
                    .is_physically_contiguous()
                    .map_err(|e| Error::reservation_failed(buffer.capacity(), e))?;
                if !contiguous {
                    return Err(Error::reservation_failed(
                        buffer.capacity(),
                        "reservation is not physically contiguous",
                    ));
                }
                buffer
                    .physical_address()
                    .map_err(|e| Error::reservation_failed(buffer.capacity(), e))
            }
        }
    }
}

impl Default for PinnedPageBackend {
    fn default() -> Self {
        PinnedPageBackend::builder().build()
    }
}

impl std::fmt::Debug for PinnedPageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPageBackend")
            .field("large_pages", &self.large_pages)
            .field("lock_pages", &self.lock_pages)
            .field("translation", &self.translation)
            .field("live_reservations", &self.live_reservations())
            .finish()
    }
}

impl PhysMemBackend for PinnedPageBackend {
    fn name(&self) -> &str {
        "pinned-pages"
    }

    /// Reservations start on a regular page, physically as well when
    /// translated through the pagemap.
    fn base_align(&self) -> usize {
        PinnedBuffer::regular_page_size() - 1
    }

    fn reserve(&self, size: usize) -> Result<PhysMemBlock> {
        let mut buffer = self
            .allocate(size)
            .map_err(|e| Error::reservation_failed(size, e))?;
        if self.lock_pages {
            if let Err(e) = buffer.pin() {
                log::warn!(
                    "{}: can't lock {} bytes in RAM: {e}",
                    self.name(),
                    buffer.capacity()
                );
            }
        }

        let paddr = self.physical_address(&buffer)?;
        let paddr = PhysAddr::new(paddr)
            .ok_or_else(|| Error::reservation_failed(size, "physical address is zero"))?;
        let vaddr = NonNull::new(buffer.ptr())
            .ok_or_else(|| Error::reservation_failed(size, "virtual address is null"))?;

        // SAFETY: The buffer stays alive in `reservations` until the block is
        // released, and `paddr` was derived for its first byte.
        let block = unsafe { PhysMemBlock::from_raw_parts(vaddr, paddr, buffer.capacity()) };
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(vaddr.as_ptr() as usize, buffer);
        Ok(block)
    }

    fn release(&self, block: PhysMemBlock) -> Result<()> {
        let buffer = self
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(block.vaddr() as usize));
        match buffer {
            Some(buffer) => {
                debug_assert_eq!(buffer.capacity(), block.size());
                drop(buffer);
                Ok(())
            }
            None => Err(Error::release_failed(format!(
                "{block:?} was not reserved by this backend"
            ))),
        }
    }

    fn duplicate(
        &self,
        src: &PhysMemBlock,
        offset: usize,
        size: usize,
        min_size: usize,
    ) -> Result<PhysMemBlock> {
        verify_arg!(size, offset.checked_add(size).is_some_and(|end| end <= src.size()));
        verify_arg!(src, src.is_reserved());

        let dst = self.reserve(min_size.max(src.size()))?;
        // SAFETY: Both ranges lie within their reservations, which are distinct.
        unsafe {
            std::ptr::copy_nonoverlapping(src.vaddr().add(offset), dst.vaddr().add(offset), size);
        }
        Ok(dst)
    }
}

/// Configures a [`PinnedPageBackend`].
#[derive(Debug, Clone, Copy)]
pub struct PinnedPageBackendBuilder {
    large_pages: bool,
    lock_pages: bool,
    translation: AddressTranslation,
}

impl Default for PinnedPageBackendBuilder {
    fn default() -> Self {
        PinnedPageBackendBuilder {
            large_pages: false,
            lock_pages: true,
            translation: AddressTranslation::Identity,
        }
    }
}

impl PinnedPageBackendBuilder {
    /// Prefer large pages, falling back to regular pages when unavailable.
    pub fn large_pages(mut self, large_pages: bool) -> Self {
        self.large_pages = large_pages;
        self
    }

    /// Lock reservations in RAM. Failing to lock is logged, not fatal.
    pub fn lock_pages(mut self, lock_pages: bool) -> Self {
        self.lock_pages = lock_pages;
        self
    }

    pub fn translation(mut self, translation: AddressTranslation) -> Self {
        self.translation = translation;
        self
    }

    pub fn build(self) -> PinnedPageBackend {
        PinnedPageBackend {
            large_pages: self.large_pages,
            lock_pages: self.lock_pages,
            translation: self.translation,
            reservations: Mutex::new(AHashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_release() {
        let backend = PinnedPageBackend::builder().lock_pages(false).build();
        let block = backend.reserve(100).unwrap();
        assert!(block.is_reserved());
        assert!(block.size() >= 100);
        assert_eq!(block.paddr().unwrap().get(), block.vaddr() as u64);
        assert_eq!(backend.live_reservations(), 1);

        backend.release(block).unwrap();
        assert_eq!(backend.live_reservations(), 0);
    }

    #[test]
    fn test_release_unknown_block() {
        let backend = PinnedPageBackend::default();
        let err = backend.release(PhysMemBlock::unreserved(16)).unwrap_err();
        assert!(matches!(
            err.kind(),
            physalloc_common::error::ErrorKind::ReleaseFailed { .. }
        ));
    }

    #[test]
    fn test_duplicate_copies_range() {
        let backend = PinnedPageBackend::default();
        let src = backend.reserve(64).unwrap();
        unsafe {
            for i in 0..64 {
                src.vaddr().add(i).write(i as u8);
            }
        }

        let dst = backend.duplicate(&src, 8, 16, 64).unwrap();
        assert!(dst.size() >= src.size());
        assert_eq!(dst.vaddr() as usize % PinnedBuffer::regular_page_size(), 0);
        let copied = unsafe { std::slice::from_raw_parts(dst.vaddr(), 64) };
        assert_eq!(&copied[8..24], &(8u8..24).collect::<Vec<_>>()[..]);
        assert!(copied[..8].iter().all(|&b| b == 0));
        assert!(copied[24..].iter().all(|&b| b == 0));

        assert!(backend.duplicate(&src, src.size() - 4, 8, 64).is_err());

        let page_size = PinnedBuffer::regular_page_size();
        let large = backend.duplicate(&src, 0, 4, 3 * page_size).unwrap();
        assert!(large.size() >= 3 * page_size);
        backend.release(large).unwrap();

        backend.release(dst).unwrap();
        backend.release(src).unwrap();
        assert_eq!(backend.live_reservations(), 0);
    }

    #[test]
    fn test_base_align_holds_for_reservations() {
        let backend = PinnedPageBackend::builder().lock_pages(false).build();
        let mask = backend.base_align();
        assert!(crate::align::is_valid_align_mask(mask));
        for size in [1, 100, mask + 2, 3 * (mask + 1)] {
            let block = backend.reserve(size).unwrap();
            assert_eq!(block.vaddr() as usize & mask, 0);
            assert_eq!(block.paddr().unwrap().get() & mask as u64, 0);
            backend.release(block).unwrap();
        }
    }

    #[test]
    fn test_pagemap_translation() {
        let backend = PinnedPageBackend::builder()
            .translation(AddressTranslation::Pagemap)
            .build();
        // Frame numbers are hidden without CAP_SYS_ADMIN.
        match backend.reserve(1) {
            Ok(block) => {
                let page_size = PinnedBuffer::regular_page_size() as u64;
                assert_eq!(block.paddr().unwrap().get() % page_size, 0);
                backend.release(block).unwrap();
            }
            Err(e) => println!("pagemap translation unavailable: {e}"),
        }
        assert_eq!(backend.live_reservations(), 0);
    }
}
