use bitflags::bitflags;

bitflags! {
    /// Flags of a memory region, and of a request to allocate one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryFlags: u32 {
        /// The memory may not be mapped for writing.
        const READONLY = 1 << 1;
        /// The memory may not be shared with other views.
        const NO_SHARE = 1 << 4;
        /// Zero the prefix when allocating. Consumed by the allocator.
        const ZERO_PREFIXED = 1 << 5;
        /// Zero the trailing padding when allocating. Consumed by the allocator.
        const ZERO_PADDED = 1 << 6;
        /// The memory is physically contiguous.
        const PHYSICALLY_CONTIGUOUS = 1 << 7;
        /// The memory can not be mapped into the process.
        const NOT_MAPPABLE = 1 << 8;
    }
}

bitflags! {
    /// Access requested when mapping memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Parameters of a single allocation request.
///
/// `align` is an alignment mask: a 16-byte aligned region is requested with
/// `align = 15`. `prefix` bytes are reserved in front of the logical data and
/// `padding` bytes after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationParams {
    pub flags: MemoryFlags,
    pub align: usize,
    pub prefix: usize,
    pub padding: usize,
}

impl AllocationParams {
    pub fn with_flags(mut self, flags: MemoryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    pub fn with_prefix(mut self, prefix: usize) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }
}
