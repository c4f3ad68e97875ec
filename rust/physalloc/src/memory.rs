//! Memory views: what [`PhysMemAllocator`] hands out.

use std::any::Any;
use std::ptr::NonNull;

use physalloc_common::Result;
use physalloc_common_traits::phys_memory::{PhysicalMemory, PhysicalRegion};

use crate::allocator::PhysMemAllocator;
use crate::block::{PhysAddr, PhysMemBlock};
use crate::flags::{MapFlags, MemoryFlags};
use crate::host::{Memory, MemoryHeader};

/// A usable region of one physical reservation.
///
/// The view exclusively owns its [`PhysMemBlock`]. The region starts
/// `alignment_correction()` bytes into the block, at the same offset on the
/// virtual and on the physical side, and spans `maxsize` bytes. The logical
/// data is `[offset, offset + size)` of the region.
///
/// Dropping the view releases the block through the allocator's backend.
pub struct PhysMemory {
    allocator: PhysMemAllocator,
    block: PhysMemBlock,
    correction: usize,
    header: MemoryHeader,
}

impl PhysMemory {
    /// `block` must be reserved and hold `correction + header.maxsize` bytes.
    pub(crate) fn new(
        allocator: PhysMemAllocator,
        block: PhysMemBlock,
        correction: usize,
        header: MemoryHeader,
    ) -> PhysMemory {
        debug_assert!(block.is_reserved());
        debug_assert!(correction + header.maxsize <= block.size());
        debug_assert!(header.offset + header.size <= header.maxsize);
        PhysMemory {
            allocator,
            block,
            correction,
            header,
        }
    }

    pub fn allocator(&self) -> &PhysMemAllocator {
        &self.allocator
    }

    /// The backing reservation.
    pub fn block(&self) -> &PhysMemBlock {
        &self.block
    }

    pub fn header(&self) -> &MemoryHeader {
        &self.header
    }

    pub fn flags(&self) -> MemoryFlags {
        self.header.flags
    }

    pub fn is_readonly(&self) -> bool {
        self.header.is_readonly()
    }

    pub fn maxsize(&self) -> usize {
        self.header.maxsize
    }

    pub fn align(&self) -> usize {
        self.header.align
    }

    pub fn offset(&self) -> usize {
        self.header.offset
    }

    pub fn size(&self) -> usize {
        self.header.size
    }

    /// Bytes skipped at the start of the block to satisfy the alignment.
    pub fn alignment_correction(&self) -> usize {
        self.correction
    }

    /// Aligned virtual base of the region.
    pub fn vaddr(&self) -> NonNull<u8> {
        let (vaddr, _) = self.base();
        // SAFETY: `correction < block.size()`, so the result stays inside the
        // reservation and is non-null.
        unsafe { vaddr.add(self.correction) }
    }

    /// Aligned physical base of the region.
    pub fn paddr(&self) -> PhysAddr {
        let (_, paddr) = self.base();
        paddr.add(self.correction)
    }

    /// Physical address of the first byte of logical data.
    pub fn data_paddr(&self) -> PhysAddr {
        self.paddr().add(self.header.offset)
    }

    /// Maps the view for reading. The mapping ends when the guard is dropped.
    pub fn map_readable(&self) -> Result<MappedMemory<'_>> {
        let ptr = self
            .allocator
            .map(self, self.header.maxsize, MapFlags::READ)?;
        Ok(MappedMemory { mem: self, ptr })
    }

    /// Maps the view for reading and writing.
    ///
    /// Fails with `AccessDenied` on a read-only view.
    pub fn map_writable(&mut self) -> Result<MappedMemoryMut<'_>> {
        let ptr = self.allocator.map(
            self,
            self.header.maxsize,
            MapFlags::READ | MapFlags::WRITE,
        )?;
        Ok(MappedMemoryMut { mem: self, ptr })
    }

    /// Releases the view. Equivalent to dropping it.
    pub fn free(self) {
        drop(self);
    }

    fn base(&self) -> (NonNull<u8>, PhysAddr) {
        self.block
            .addresses()
            .expect("memory views always own a reserved block")
    }
}

impl Drop for PhysMemory {
    fn drop(&mut self) {
        let block = self.block.take();
        self.allocator.release_block(block);
    }
}

impl Memory for PhysMemory {
    fn header(&self) -> &MemoryHeader {
        &self.header
    }

    fn allocator_name(&self) -> &str {
        self.allocator.name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// SAFETY: The region stays reserved and at a fixed address until the view is
// dropped; `vaddr` and `paddr` are offset by the same correction.
unsafe impl PhysicalMemory for PhysMemory {
    fn physical(&self) -> PhysicalRegion {
        PhysicalRegion {
            vaddr: self.vaddr().as_ptr(),
            paddr: self.paddr().get(),
            maxsize: self.header.maxsize,
            offset: self.header.offset,
            size: self.header.size,
        }
    }
}

impl std::fmt::Debug for PhysMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysMemory")
            .field("allocator", &self.allocator.name())
            .field("block", &self.block)
            .field("correction", &self.correction)
            .field("header", &self.header)
            .finish()
    }
}

/// A read mapping of a [`PhysMemory`].
pub struct MappedMemory<'a> {
    mem: &'a PhysMemory,
    ptr: NonNull<u8>,
}

impl MappedMemory<'_> {
    /// The logical data.
    pub fn as_slice(&self) -> &[u8] {
        let header = self.mem.header();
        &self.region()[header.offset..header.offset + header.size]
    }

    /// The whole region, including prefix and padding.
    pub fn region(&self) -> &[u8] {
        // SAFETY: `ptr` is the aligned base returned by `map`, followed by
        // `maxsize` bytes of the view's reservation that live as long as `mem`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.mem.maxsize()) }
    }
}

impl std::ops::Deref for MappedMemory<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        self.mem.allocator().unmap(self.mem);
    }
}

/// A read-write mapping of a [`PhysMemory`].
pub struct MappedMemoryMut<'a> {
    mem: &'a mut PhysMemory,
    ptr: NonNull<u8>,
}

impl MappedMemoryMut<'_> {
    /// The logical data.
    pub fn as_slice(&self) -> &[u8] {
        let header = self.mem.header();
        &self.region()[header.offset..header.offset + header.size]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let header = *self.mem.header();
        &mut self.region_mut()[header.offset..header.offset + header.size]
    }

    /// The whole region, including prefix and padding.
    pub fn region(&self) -> &[u8] {
        // SAFETY: `ptr` is the aligned base returned by `map`, followed by
        // `maxsize` bytes of the view's reservation that live as long as `mem`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.mem.maxsize()) }
    }

    pub fn region_mut(&mut self) -> &mut [u8] {
        // SAFETY: As for `region`; the guard borrows the view mutably, so no
        // other slice of the region exists.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.mem.maxsize()) }
    }
}

impl std::ops::Deref for MappedMemoryMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::DerefMut for MappedMemoryMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for MappedMemoryMut<'_> {
    fn drop(&mut self) {
        self.mem.allocator().unmap(self.mem);
    }
}
