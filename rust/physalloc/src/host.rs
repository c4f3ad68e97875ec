//! The boundary to the host buffer framework.
//!
//! The host owns buffer lifetime and reference counting. Within this crate its
//! memory handles are opaque [`Memory`] trait objects that are only inspected
//! through [`MemoryHeader`] and downcasting, and its buffers are ordered lists
//! of such handles.

use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;

use physalloc_common::Result;

use crate::flags::{AllocationParams, MapFlags, MemoryFlags};

/// Generic bookkeeping every memory region carries, regardless of allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeader {
    pub flags: MemoryFlags,
    /// Usable bytes from the start of the region.
    pub maxsize: usize,
    /// Alignment mask the region start satisfies.
    pub align: usize,
    /// Offset of the logical data in the region.
    pub offset: usize,
    /// Length of the logical data.
    pub size: usize,
}

impl MemoryHeader {
    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.flags.contains(MemoryFlags::READONLY)
    }

    /// Unused bytes after the logical data.
    #[inline]
    pub fn padding(&self) -> usize {
        self.maxsize - (self.offset + self.size)
    }
}

/// A memory region handle as seen by the host framework.
pub trait Memory: Any + Send + Sync + std::fmt::Debug {
    fn header(&self) -> &MemoryHeader;

    /// Name of the allocator that produced this region.
    fn allocator_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn Memory + 'a {
    /// Returns the concrete memory type if `self` is a `T`.
    pub fn downcast_ref<T: Memory>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// An ordered collection of memory regions.
///
/// Cloning the buffer or calling [`Buffer::get_memory`] takes a new reference
/// on the regions; [`Buffer::peek_memory`] does not.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    memories: Vec<Arc<dyn Memory>>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    /// Creates a buffer holding a single region.
    pub fn from_memory(mem: impl Memory) -> Buffer {
        let mut buffer = Buffer::new();
        buffer.append_memory(Arc::new(mem));
        buffer
    }

    pub fn append_memory(&mut self, mem: Arc<dyn Memory>) {
        self.memories.push(mem);
    }

    pub fn n_memory(&self) -> usize {
        self.memories.len()
    }

    /// Borrows the region at `idx` without taking a reference.
    pub fn peek_memory(&self, idx: usize) -> Option<&dyn Memory> {
        self.memories.get(idx).map(|mem| mem.as_ref())
    }

    /// Returns a new reference to the region at `idx`.
    pub fn get_memory(&self, idx: usize) -> Option<Arc<dyn Memory>> {
        self.memories.get(idx).cloned()
    }

    /// Total logical size of all regions.
    pub fn size(&self) -> usize {
        self.memories.iter().map(|mem| mem.header().size).sum()
    }
}

/// The callbacks a host framework dispatches onto an allocator and the
/// memory it produced.
pub trait MemoryAllocator: Send + Sync {
    type Memory: Memory;

    /// Allocates a region with `size` bytes of logical data. `None` selects
    /// the allocator's default parameters.
    fn alloc(&self, size: usize, params: Option<&AllocationParams>) -> Result<Self::Memory>;

    /// Releases a region. Never fails; problems are only reported in the log.
    fn free(&self, mem: Self::Memory);

    /// Makes the region accessible to the CPU and returns the start of the region.
    fn map(&self, mem: &Self::Memory, maxsize: usize, flags: MapFlags) -> Result<NonNull<u8>>;

    fn unmap(&self, mem: &Self::Memory);

    /// Copies `size` bytes (`None`: up to the end) starting at `offset` of the
    /// logical data into a new writable region.
    fn copy(&self, mem: &Self::Memory, offset: usize, size: Option<usize>)
    -> Result<Self::Memory>;

    /// Creates a region that aliases part of `mem` without copying.
    fn share(&self, mem: &Self::Memory, offset: usize, size: Option<usize>)
    -> Result<Self::Memory>;

    /// If `first` and `second` are adjacent slices of one region, returns the
    /// offset of `first` in that region.
    fn is_span(&self, first: &Self::Memory, second: &Self::Memory) -> Option<usize>;
}
