//! Read-only lookups for holders of generic buffers and memory handles.
//!
//! None of these take a reference on the inspected memory or change it.

use crate::block::PhysMemBlock;
use crate::host::{Buffer, Memory};
use crate::memory::PhysMemory;

/// Returns `mem` as a physical memory view, if it is one.
pub fn as_phymem(mem: &dyn Memory) -> Option<&PhysMemory> {
    mem.downcast_ref::<PhysMemory>()
}

/// Returns `true` if the first memory of `buffer` is physical memory with a
/// valid physical address.
pub fn is_phymem(buffer: &Buffer) -> bool {
    let Some(mem) = buffer.peek_memory(0) else {
        log::error!("buffer has no memory");
        return false;
    };
    match as_phymem(mem) {
        Some(phymem) if phymem.block().paddr().is_some() => true,
        Some(phymem) => {
            log::warn!(
                "physical address in memory block is invalid: {:?}",
                phymem.block()
            );
            false
        }
        None => false,
    }
}

/// Returns the block backing the first memory of `buffer`, if it is physical
/// memory.
pub fn query_phymem_block(buffer: &Buffer) -> Option<&PhysMemBlock> {
    let Some(mem) = buffer.peek_memory(0) else {
        log::error!("buffer has no memory");
        return None;
    };
    query_memory_phymem_block(mem)
}

/// Returns the block backing `mem`, if it is physical memory.
pub fn query_memory_phymem_block(mem: &dyn Memory) -> Option<&PhysMemBlock> {
    as_phymem(mem).map(PhysMemory::block)
}
