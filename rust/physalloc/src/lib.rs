//! Allocator for buffers backed by physically contiguous memory.
//!
//! Memory handed out by [`PhysMemAllocator`] is addressable both through a
//! process-local pointer and through a device-visible physical address, as
//! needed by DMA-capable hardware such as video codecs or GPUs.
//!
//! The allocator owns the allocation contract: sizing with prefix and padding,
//! alignment of the returned region, zeroing, read-only policy, and the
//! map/unmap/copy/share operations a host buffer framework dispatches onto a
//! [`PhysMemory`] view. Reserving and releasing the actual physical memory is
//! delegated to a pluggable [`PhysMemBackend`].
//!
//! ```
//! use std::sync::Arc;
//!
//! use physalloc::{AllocationParams, MemoryFlags, PhysMemAllocator, backends::PinnedPageBackend};
//!
//! let allocator = PhysMemAllocator::new(Arc::new(PinnedPageBackend::default()));
//! let params = AllocationParams::default()
//!     .with_align(63)
//!     .with_prefix(16)
//!     .with_flags(MemoryFlags::ZERO_PREFIXED);
//! let mem = allocator.alloc(1000, Some(&params)).unwrap();
//! assert_eq!(mem.vaddr().as_ptr() as usize % 64, 0);
//! assert_eq!(mem.offset(), 16);
//! ```

pub mod align;
pub mod allocator;
pub mod backend;
pub mod backends;
pub mod block;
pub mod flags;
pub mod host;
pub mod memory;
pub mod query;

pub use allocator::{PhysMemAllocator, PhysMemAllocatorBuilder};
pub use backend::PhysMemBackend;
pub use block::{PhysAddr, PhysMemBlock};
pub use flags::{AllocationParams, MapFlags, MemoryFlags};
pub use host::{Buffer, Memory, MemoryAllocator, MemoryHeader};
pub use memory::{MappedMemory, MappedMemoryMut, PhysMemory};
pub use physalloc_common::{
    Result,
    error::{Error, ErrorKind},
};
