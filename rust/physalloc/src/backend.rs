use physalloc_common::{Result, error::Error, error::ErrorKind};

use crate::block::PhysMemBlock;
use crate::memory::PhysMemory;

/// The contract a concrete physical memory source implements.
///
/// Every operation has a provided implementation that logs and fails, so an
/// allocator wired to a backend that forgot an override reports the gap
/// instead of corrupting memory. Backends override what they support.
///
/// Implementations do their own synchronization: the allocator calls into the
/// backend concurrently from any thread and holds no lock while doing so.
pub trait PhysMemBackend: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Alignment mask that the base of every reserved block satisfies, on the
    /// virtual as well as on the physical side.
    ///
    /// The allocator over-reserves by the part of a requested alignment not
    /// covered by this mask.
    fn base_align(&self) -> usize {
        0
    }

    /// Reserves a physically contiguous region of at least `size` bytes.
    ///
    /// The returned block must be reserved (see [`PhysMemBlock::from_raw_parts`])
    /// and at least `size` bytes long; the allocator writes to it directly.
    fn reserve(&self, size: usize) -> Result<PhysMemBlock> {
        log::error!(
            "{}: no reserve implementation registered, can't allocate {size} bytes",
            self.name()
        );
        Err(Error::backend_unavailable("reserve"))
    }

    /// Returns a block obtained from [`reserve`](Self::reserve) or
    /// [`duplicate`](Self::duplicate) to the backend.
    fn release(&self, block: PhysMemBlock) -> Result<()> {
        log::error!(
            "{}: no release implementation registered, can't free {:?}",
            self.name(),
            block
        );
        Err(Error::backend_unavailable("release"))
    }

    /// Reserves a new block of at least `min_size` bytes and copies the
    /// `size` bytes at `offset` of `src` to the same offset of the new block.
    fn duplicate(
        &self,
        src: &PhysMemBlock,
        offset: usize,
        size: usize,
        min_size: usize,
    ) -> Result<PhysMemBlock> {
        log::warn!(
            "{}: no duplicate implementation registered, can't copy {size} bytes at {offset} of {:?} into {min_size} bytes",
            self.name(),
            src
        );
        Err(ErrorKind::CopyUnsupported.into())
    }

    /// If `first` and `second` are adjacent slices of one reservation, returns
    /// the offset of `first`'s data in it.
    fn is_span(&self, first: &PhysMemory, second: &PhysMemory) -> Option<usize> {
        let _ = (first, second);
        None
    }
}
