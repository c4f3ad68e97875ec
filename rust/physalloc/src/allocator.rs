use std::ptr::NonNull;
use std::sync::Arc;

use physalloc_common::{
    Result,
    error::{Error, ErrorKind},
    verify_arg,
};
use physalloc_common_traits::phys_memory::PhysAddrQuery;

use crate::align;
use crate::backend::PhysMemBackend;
use crate::block::PhysMemBlock;
use crate::flags::{AllocationParams, MapFlags, MemoryFlags};
use crate::host::{Memory, MemoryAllocator, MemoryHeader};
use crate::memory::PhysMemory;

/// Allocator of physically contiguous memory views.
///
/// The allocator is a cheap, clonable handle. Every [`PhysMemory`] it produces
/// keeps a clone, so the backend lives as long as the last view.
#[derive(Clone)]
pub struct PhysMemAllocator(Arc<AllocatorInner>);

struct AllocatorInner {
    name: String,
    backend: Arc<dyn PhysMemBackend>,
    min_align: usize,
    default_params: AllocationParams,
}

impl PhysMemAllocator {
    pub const DEFAULT_NAME: &'static str = "PhysMem";

    /// Creates an allocator with default configuration over `backend`.
    pub fn new(backend: Arc<dyn PhysMemBackend>) -> PhysMemAllocator {
        PhysMemAllocator(Arc::new(AllocatorInner {
            name: Self::DEFAULT_NAME.to_string(),
            backend,
            min_align: 0,
            default_params: AllocationParams::default(),
        }))
    }

    pub fn builder(backend: Arc<dyn PhysMemBackend>) -> PhysMemAllocatorBuilder {
        PhysMemAllocatorBuilder {
            backend,
            name: None,
            min_align: 0,
            default_params: AllocationParams::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn backend(&self) -> &Arc<dyn PhysMemBackend> {
        &self.0.backend
    }

    /// Alignment mask applied to every allocation on top of the requested one.
    pub fn min_align(&self) -> usize {
        self.0.min_align
    }

    /// Parameters used by [`alloc`](Self::alloc) when none are given.
    pub fn default_params(&self) -> &AllocationParams {
        &self.0.default_params
    }

    /// Returns `true` if both handles refer to the same allocator instance.
    pub fn is_same(&self, other: &PhysMemAllocator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Allocates a view with `size` bytes of logical data.
    ///
    /// The backend is asked for `size + prefix + padding` bytes plus room for
    /// the largest alignment correction its reservations may need. The start
    /// of the returned view is aligned to `align + 1` on both the virtual and
    /// the physical side; any bytes skipped to get there are subtracted from
    /// the view's `maxsize`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a malformed alignment mask or an overflowing size.
    /// - `BackendUnavailable` if the backend has no reserve implementation.
    /// - `ReservationFailed` if the backend fails, or returns a block that can't
    ///   hold the request after alignment or whose physical address can't be
    ///   aligned along with the virtual one. Such a block is released again.
    pub fn alloc(&self, size: usize, params: Option<&AllocationParams>) -> Result<PhysMemory> {
        let params = params.unwrap_or(&self.0.default_params);
        verify_arg!(align, align::is_valid_align_mask(params.align));
        let align = params.align | self.0.min_align;
        let prefix = params.prefix;

        log::debug!(
            "{}: allocate params, size ({size}), prefix ({prefix}), padding ({}), align ({align:#x}), flags ({:?})",
            self.0.name,
            params.padding,
            params.flags
        );

        let requested = size
            .checked_add(prefix)
            .and_then(|n| n.checked_add(params.padding))
            .ok_or_else(|| Error::invalid_arg("size", "size + prefix + padding overflows"))?;
        let reserve_size = requested
            .checked_add(self.headroom(align))
            .ok_or_else(|| Error::invalid_arg("align", "size + alignment overflows"))?;
        let block = self.reserve(reserve_size)?;

        let correction = align::alignment_correction(block.vaddr() as usize, align);
        if block.size() < correction + requested {
            log::error!(
                "{}: block of {} bytes can't hold {requested} bytes after skipping {correction} bytes for alignment",
                self.0.name,
                block.size()
            );
            self.release_block(block);
            return Err(Error::reservation_failed(
                requested,
                "reservation too small after alignment",
            ));
        }
        if !physically_aligned(&block, correction, align) {
            log::error!(
                "{}: physical and virtual base of {:?} disagree modulo {:#x}",
                self.0.name,
                block,
                align + 1
            );
            self.release_block(block);
            return Err(Error::reservation_failed(
                requested,
                "physical address can't be aligned",
            ));
        }
        let maxsize = block.size() - correction;

        let header = MemoryHeader {
            flags: params.flags - (MemoryFlags::ZERO_PREFIXED | MemoryFlags::ZERO_PADDED),
            maxsize,
            align,
            offset: prefix,
            size,
        };
        let mem = PhysMemory::new(self.clone(), block, correction, header);

        log::debug!(
            "{}: aligned vaddr ({:p}), paddr ({}), maxsize ({maxsize})",
            self.0.name,
            mem.vaddr(),
            mem.paddr()
        );

        let data = mem.vaddr().as_ptr();
        if prefix != 0 && params.flags.contains(MemoryFlags::ZERO_PREFIXED) {
            // SAFETY: `[0, prefix)` lies within `maxsize`, which the backend
            // guarantees to be writable.
            unsafe { data.write_bytes(0, prefix) };
        }
        let padding = header.padding();
        if padding != 0 && params.flags.contains(MemoryFlags::ZERO_PADDED) {
            // SAFETY: `[prefix + size, maxsize)` is within the reservation.
            unsafe { data.add(prefix + size).write_bytes(0, padding) };
        }

        Ok(mem)
    }

    /// Releases a view. Equivalent to dropping it.
    pub fn free(&self, mem: PhysMemory) {
        if !self.is_same(mem.allocator()) {
            log::error!(
                "{}: {}",
                self.0.name,
                Error::invalid_allocator(format!("freeing memory of '{}'", mem.allocator().name()))
            );
        }
        drop(mem);
    }

    /// Returns the aligned virtual base of `mem`.
    ///
    /// Physical memory is always resident and mapped, so mapping is only a
    /// policy check: write access to read-only memory is denied. The check only
    /// covers the CPU; a device may still write to the memory through DMA.
    pub fn map(&self, mem: &PhysMemory, maxsize: usize, flags: MapFlags) -> Result<NonNull<u8>> {
        self.verify_owner(mem)?;
        if mem.is_readonly() && flags.contains(MapFlags::WRITE) {
            log::error!("{}: memory is read only", self.0.name);
            return Err(ErrorKind::AccessDenied.into());
        }
        log::trace!(
            "{}: map {:p} ({maxsize} bytes, {flags:?})",
            self.0.name,
            mem.vaddr()
        );
        Ok(mem.vaddr())
    }

    /// Nothing to undo: the mapping lives as long as the view.
    pub fn unmap(&self, _mem: &PhysMemory) {}

    /// Copies part of `mem` into a new, writable view.
    ///
    /// `offset` is relative to the logical data, `size` of `None` copies up to
    /// the end of it. The new view keeps the layout (`maxsize`, `align`,
    /// `offset`, `size`) of the source and is aligned on its own block, which
    /// may need a different correction than the source's.
    ///
    /// # Errors
    ///
    /// - `CopyUnsupported` if the backend has no duplicate implementation.
    /// - `CopyFailed` if the backend fails or returns a block that can't hold
    ///   the source layout once aligned.
    pub fn copy(&self, mem: &PhysMemory, offset: usize, size: Option<usize>) -> Result<PhysMemory> {
        self.verify_owner(mem)?;
        let header = *mem.header();
        verify_arg!(offset, offset <= header.size);
        let size = size.unwrap_or(header.size - offset);
        verify_arg!(size, size <= header.size - offset);

        let src = mem.block();
        let block_offset = mem.alignment_correction() + header.offset + offset;
        let min_size = src
            .size()
            .checked_add(self.headroom(header.align))
            .ok_or_else(|| Error::copy_failed(size, "block size overflows"))?;
        let block = self
            .0
            .backend
            .duplicate(src, block_offset, size, min_size)
            .map_err(|e| match e.kind() {
                ErrorKind::CopyUnsupported
                | ErrorKind::CopyFailed { .. }
                | ErrorKind::BackendUnavailable { .. } => e,
                _ => Error::copy_failed(size, e),
            })?;

        let correction = align::alignment_correction(block.vaddr() as usize, header.align);
        if !block.is_reserved()
            || block.size() < min_size
            || block.size() < correction + header.maxsize
            || !physically_aligned(&block, correction, header.align)
        {
            log::warn!(
                "{}: duplicated {:?} can't hold the layout of {:?}",
                self.0.name,
                block,
                src
            );
            if block.is_reserved() {
                self.release_block(block);
            }
            return Err(Error::copy_failed(size, "duplicated block can't hold the layout"));
        }
        if correction != mem.alignment_correction() {
            let data_offset = correction + header.offset + offset;
            log::debug!(
                "{}: moving {size} copied bytes from {block_offset} to {data_offset} for alignment",
                self.0.name
            );
            // SAFETY: Both ranges end within the block: `block_offset + size`
            // is bounded by `src.size() <= min_size`, `data_offset + size` by
            // `correction + maxsize`. `copy` allows them to overlap.
            unsafe {
                let base = block.vaddr();
                std::ptr::copy(base.add(block_offset), base.add(data_offset), size);
            }
        }

        log::debug!(
            "{}: copied phymem, vaddr ({:p}), paddr ({:?}), size ({}).",
            self.0.name,
            block.vaddr(),
            block.paddr(),
            block.size()
        );

        let header = MemoryHeader {
            flags: header.flags - MemoryFlags::READONLY,
            ..header
        };
        Ok(PhysMemory::new(self.clone(), block, correction, header))
    }

    /// Always fails with `ShareUnsupported`; the host falls back to [`copy`](Self::copy).
    pub fn share(&self, mem: &PhysMemory, offset: usize, size: Option<usize>) -> Result<PhysMemory> {
        log::trace!(
            "{}: share of {:p} at {offset} ({size:?} bytes) is not supported",
            self.0.name,
            mem.vaddr()
        );
        Err(ErrorKind::ShareUnsupported.into())
    }

    /// Asks the backend whether `first` and `second` are adjacent slices of one
    /// reservation. Views of different allocators never are.
    pub fn is_span(&self, first: &PhysMemory, second: &PhysMemory) -> Option<usize> {
        if !self.is_same(first.allocator()) || !self.is_same(second.allocator()) {
            return None;
        }
        self.0.backend.is_span(first, second)
    }

    /// Bytes to reserve on top of a request so that a block aligned only to
    /// the backend's base alignment can be corrected to `align`.
    fn headroom(&self, align: usize) -> usize {
        align & !self.0.backend.base_align()
    }

    fn reserve(&self, size: usize) -> Result<PhysMemBlock> {
        let block = self.0.backend.reserve(size).map_err(|e| match e.kind() {
            ErrorKind::BackendUnavailable { .. } | ErrorKind::ReservationFailed { .. } => e,
            _ => Error::reservation_failed(size, e),
        })?;

        log::debug!(
            "{}: allocated phymem, vaddr ({:p}), paddr ({:?}), size ({}).",
            self.0.name,
            block.vaddr(),
            block.paddr(),
            block.size()
        );

        if !block.is_reserved() {
            log::error!("{}: backend returned an unreserved block", self.0.name);
            return Err(Error::reservation_failed(size, "backend returned no addresses"));
        }
        if block.size() < size {
            self.release_block(block);
            return Err(Error::reservation_failed(
                size,
                "backend returned a smaller block",
            ));
        }
        Ok(block)
    }

    /// Hands `block` back to the backend. Failures are logged, never returned.
    pub(crate) fn release_block(&self, block: PhysMemBlock) {
        log::debug!("{}: free phymem {:?}", self.0.name, block);
        if let Err(e) = self.0.backend.release(block) {
            if e.is_unsupported() {
                log::error!(
                    "{}: physical memory is not returned to '{}': {e}",
                    self.0.name,
                    self.0.backend.name()
                );
            } else {
                log::error!("{}: {}", self.0.name, Error::release_failed(e));
            }
        }
    }

    fn verify_owner(&self, mem: &PhysMemory) -> Result<()> {
        if self.is_same(mem.allocator()) {
            Ok(())
        } else {
            Err(Error::invalid_allocator(format!(
                "memory of '{}' passed to '{}'",
                mem.allocator().name(),
                self.0.name
            )))
        }
    }
}

/// Returns `true` if skipping `correction` bytes aligns the physical side of
/// `block` too.
fn physically_aligned(block: &PhysMemBlock, correction: usize, align: usize) -> bool {
    block
        .paddr()
        .is_some_and(|paddr| paddr.add(correction).get() & align as u64 == 0)
}

impl std::fmt::Debug for PhysMemAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysMemAllocator")
            .field("name", &self.0.name)
            .field("backend", &self.0.backend.name())
            .field("min_align", &self.0.min_align)
            .finish()
    }
}

impl MemoryAllocator for PhysMemAllocator {
    type Memory = PhysMemory;

    fn alloc(&self, size: usize, params: Option<&AllocationParams>) -> Result<PhysMemory> {
        PhysMemAllocator::alloc(self, size, params)
    }

    fn free(&self, mem: PhysMemory) {
        PhysMemAllocator::free(self, mem)
    }

    fn map(&self, mem: &PhysMemory, maxsize: usize, flags: MapFlags) -> Result<NonNull<u8>> {
        PhysMemAllocator::map(self, mem, maxsize, flags)
    }

    fn unmap(&self, mem: &PhysMemory) {
        PhysMemAllocator::unmap(self, mem)
    }

    fn copy(&self, mem: &PhysMemory, offset: usize, size: Option<usize>) -> Result<PhysMemory> {
        PhysMemAllocator::copy(self, mem, offset, size)
    }

    fn share(&self, mem: &PhysMemory, offset: usize, size: Option<usize>) -> Result<PhysMemory> {
        PhysMemAllocator::share(self, mem, offset, size)
    }

    fn is_span(&self, first: &PhysMemory, second: &PhysMemory) -> Option<usize> {
        PhysMemAllocator::is_span(self, first, second)
    }
}

impl PhysAddrQuery<dyn Memory> for PhysMemAllocator {
    type Error = Error;

    fn phys_addr(&self, mem: &dyn Memory) -> Result<u64> {
        let mem = mem.downcast_ref::<PhysMemory>().ok_or_else(|| {
            Error::invalid_allocator(format!(
                "memory of '{}' is not physical memory",
                mem.allocator_name()
            ))
        })?;
        self.verify_owner(mem)?;
        Ok(mem.paddr().get())
    }
}

/// Configures a [`PhysMemAllocator`].
pub struct PhysMemAllocatorBuilder {
    backend: Arc<dyn PhysMemBackend>,
    name: Option<String>,
    min_align: usize,
    default_params: AllocationParams,
}

impl PhysMemAllocatorBuilder {
    /// Name used in diagnostics and reported by [`Memory::allocator_name`].
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Alignment mask OR-ed into every request, e.g. a device's DMA alignment.
    pub fn min_align(mut self, min_align: usize) -> Self {
        self.min_align = min_align;
        self
    }

    /// Parameters used when [`PhysMemAllocator::alloc`] is called without any.
    pub fn default_params(mut self, params: AllocationParams) -> Self {
        self.default_params = params;
        self
    }

    /// Creates the allocator.
    ///
    /// Fails with `InvalidArgument` if an alignment mask is malformed.
    pub fn build(self) -> Result<PhysMemAllocator> {
        verify_arg!(min_align, align::is_valid_align_mask(self.min_align));
        verify_arg!(
            default_params,
            align::is_valid_align_mask(self.default_params.align)
        );
        Ok(PhysMemAllocator(Arc::new(AllocatorInner {
            name: self
                .name
                .unwrap_or_else(|| PhysMemAllocator::DEFAULT_NAME.to_string()),
            backend: self.backend,
            min_align: self.min_align,
            default_params: self.default_params,
        })))
    }
}
