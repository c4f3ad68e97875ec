//! Physical memory blocks: the unit a backend reserves and releases.

use std::num::NonZeroU64;
use std::ptr::NonNull;

/// A device-visible, non-null physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(NonZeroU64);

impl PhysAddr {
    /// Returns `None` for address zero, which marks "no physical address".
    #[inline]
    pub const fn new(addr: u64) -> Option<PhysAddr> {
        match NonZeroU64::new(addr) {
            Some(addr) => Some(PhysAddr(addr)),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Returns the address `bytes` past this one.
    #[inline]
    pub fn add(self, bytes: usize) -> PhysAddr {
        PhysAddr(self.0.saturating_add(bytes as u64))
    }
}

impl std::fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// The two interpretations of one reservation's base address.
#[derive(Clone, Copy)]
struct Reservation {
    vaddr: NonNull<u8>,
    paddr: PhysAddr,
}

/// One physically contiguous region as reserved by a [`PhysMemBackend`].
///
/// The virtual and physical base addresses are either both present or both
/// absent; a block never carries only one of them. The size is fixed for the
/// block's lifetime.
///
/// A block does not free anything when dropped: ownership is handed back to the
/// backend through [`PhysMemBackend::release`].
///
/// [`PhysMemBackend`]: crate::PhysMemBackend
/// [`PhysMemBackend::release`]: crate::PhysMemBackend::release
pub struct PhysMemBlock {
    reservation: Option<Reservation>,
    size: usize,
}

impl PhysMemBlock {
    /// Creates a block that describes `size` bytes but has no addresses yet.
    pub const fn unreserved(size: usize) -> PhysMemBlock {
        PhysMemBlock {
            reservation: None,
            size,
        }
    }

    /// Creates a reserved block.
    ///
    /// # Safety
    ///
    /// - `vaddr` must be valid for reads and writes of `size` bytes until the
    ///   block is released by the backend that created it.
    /// - `paddr` must be the device-visible address of the byte at `vaddr`, and
    ///   the `size` bytes must be physically contiguous.
    pub unsafe fn from_raw_parts(vaddr: NonNull<u8>, paddr: PhysAddr, size: usize) -> PhysMemBlock {
        PhysMemBlock {
            reservation: Some(Reservation { vaddr, paddr }),
            size,
        }
    }

    /// Returns `true` if the block carries a virtual and a physical address.
    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }

    /// Virtual base address, or null for an unreserved block.
    #[inline]
    pub fn vaddr(&self) -> *mut u8 {
        self.reservation
            .map_or(std::ptr::null_mut(), |r| r.vaddr.as_ptr())
    }

    /// Physical base address, or `None` for an unreserved block.
    #[inline]
    pub fn paddr(&self) -> Option<PhysAddr> {
        self.reservation.map(|r| r.paddr)
    }

    /// Both base addresses at once.
    #[inline]
    pub fn addresses(&self) -> Option<(NonNull<u8>, PhysAddr)> {
        self.reservation.map(|r| (r.vaddr, r.paddr))
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Moves the block out, leaving an unreserved block of the same size.
    pub(crate) fn take(&mut self) -> PhysMemBlock {
        PhysMemBlock {
            reservation: self.reservation.take(),
            size: self.size,
        }
    }
}

// SAFETY: A block is a plain description of a reservation; the memory it
// points to is only accessed through the view that exclusively owns it.
unsafe impl Send for PhysMemBlock {}

// SAFETY: See above. Shared references only expose the addresses.
unsafe impl Sync for PhysMemBlock {}

impl std::fmt::Debug for PhysMemBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysMemBlock")
            .field("vaddr", &self.vaddr())
            .field("paddr", &self.paddr().map(PhysAddr::get))
            .field("size", &self.size)
            .finish()
    }
}
