//! `PhysicalMemory`: a trait for types that own physically backed memory, and
//! `PhysAddrQuery`: the capability used to program DMA descriptors.

/// A trait for types that own a physically contiguous memory region.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - The region returned by `physical()` stays valid and at a fixed physical
///   address for the entire lifetime of the owner.
/// - `vaddr` and `paddr` describe the same bytes: offset `n` from `vaddr`
///   is the byte the device sees at `paddr + n`, for `n < maxsize`.
/// - The reported sizes are accurate.
pub unsafe trait PhysicalMemory {
    /// Returns information about the owned physical region.
    fn physical(&self) -> PhysicalRegion;
}

/// Describes the usable part of a physically contiguous reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalRegion {
    /// CPU-visible pointer to the start of the usable region.
    pub vaddr: *const u8,
    /// Device-visible address of the start of the usable region.
    pub paddr: u64,
    /// Total usable bytes starting at `vaddr` / `paddr`.
    pub maxsize: usize,
    /// Offset of the logical data from the start of the region.
    pub offset: usize,
    /// Length of the logical data.
    pub size: usize,
}

impl PhysicalRegion {
    /// Device-visible address of the first byte of logical data.
    pub fn data_paddr(&self) -> u64 {
        self.paddr + self.offset as u64
    }
}

/// Narrow capability implemented by allocators whose memory has a device
/// visible address.
///
/// Consumers only need the address of a memory handle they were given and
/// do not have to know how the allocator lays out its memory.
pub trait PhysAddrQuery<M: ?Sized> {
    type Error;

    /// Returns the physical address of the start of `mem`'s usable region.
    fn phys_addr(&self, mem: &M) -> Result<u64, Self::Error>;
}
