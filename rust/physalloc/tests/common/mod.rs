#![allow(dead_code)]

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use physalloc::{Error, ErrorKind, PhysAddr, PhysMemBackend, PhysMemBlock, Result};

/// Physical base of the first reservation of a [`HeapBackend`].
pub const PHYS_BASE: u64 = 0x1007;

/// Virtual and physical addresses of a reservation agree modulo this value.
pub const PHASE_MODULUS: usize = 4096;

/// Fill pattern of fresh reservations, so zeroing is observable.
pub const FILL: u8 = 0xA5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateMode {
    Copy,
    Fail,
    ShortBlock,
}

/// Heap memory posing as physical memory.
///
/// Reservation `n` reports physical address `PHYS_BASE + n * 1MB` and its
/// virtual address is congruent to it modulo [`PHASE_MODULUS`], so both sides
/// need the same alignment correction. Duplicates can be placed at another
/// phase, and the virtual side can be skewed against the physical one.
pub struct HeapBackend {
    name: String,
    extra: usize,
    duplicate_mode: DuplicateMode,
    fail_reserve: bool,
    short_reserve: bool,
    base_align: usize,
    duplicate_phase: u64,
    vaddr_skew: usize,
    pub reserves: AtomicUsize,
    pub releases: AtomicUsize,
    pub duplicates: AtomicUsize,
    storage: Mutex<HashMap<usize, Vec<u8>>>,
}

impl HeapBackend {
    pub fn new(name: &str) -> HeapBackend {
        HeapBackend {
            name: name.to_string(),
            extra: 64,
            duplicate_mode: DuplicateMode::Copy,
            fail_reserve: false,
            short_reserve: false,
            base_align: 0,
            duplicate_phase: 0,
            vaddr_skew: 0,
            reserves: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
            storage: Mutex::new(HashMap::new()),
        }
    }

    /// Bytes reserved on top of each request.
    pub fn with_extra(mut self, extra: usize) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_duplicate_mode(mut self, mode: DuplicateMode) -> Self {
        self.duplicate_mode = mode;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_reserve = true;
        self
    }

    /// Claimed base alignment; reservations don't actually honor it.
    pub fn with_base_align(mut self, base_align: usize) -> Self {
        self.base_align = base_align;
        self
    }

    /// Physical offset added to duplicated blocks, shifting their phase.
    pub fn with_duplicate_phase(mut self, phase: u64) -> Self {
        self.duplicate_phase = phase;
        self
    }

    /// Virtual addresses are `skew` bytes past the physical phase.
    pub fn with_vaddr_skew(mut self, skew: usize) -> Self {
        self.vaddr_skew = skew;
        self
    }

    /// Reserve fewer bytes than requested.
    pub fn short(mut self) -> Self {
        self.short_reserve = true;
        self
    }

    /// Reservations not yet released.
    pub fn live(&self) -> usize {
        self.storage.lock().unwrap().len()
    }

    fn carve(&self, size: usize, shift: u64) -> PhysMemBlock {
        let idx = self.reserves.fetch_add(1, Ordering::SeqCst);
        let paddr = PHYS_BASE + idx as u64 * 0x10_0000 + shift;
        let phase = (paddr as usize + self.vaddr_skew) % PHASE_MODULUS;

        let mut storage = vec![FILL; size + 2 * PHASE_MODULUS];
        let base = storage.as_mut_ptr() as usize;
        let skip = (phase + PHASE_MODULUS - base % PHASE_MODULUS) % PHASE_MODULUS;
        let vaddr = NonNull::new(storage[skip..].as_mut_ptr()).unwrap();
        self.storage
            .lock()
            .unwrap()
            .insert(vaddr.as_ptr() as usize, storage);
        unsafe { PhysMemBlock::from_raw_parts(vaddr, PhysAddr::new(paddr).unwrap(), size) }
    }
}

impl PhysMemBackend for HeapBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn reserve(&self, size: usize) -> Result<PhysMemBlock> {
        if self.fail_reserve {
            return Err(Error::io(
                "reserve",
                std::io::Error::new(std::io::ErrorKind::OutOfMemory, "pool exhausted"),
            ));
        }
        if self.short_reserve {
            return Ok(self.carve(size / 2, 0));
        }
        Ok(self.carve(size + self.extra, 0))
    }

    fn release(&self, block: PhysMemBlock) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        match self.storage.lock().unwrap().remove(&(block.vaddr() as usize)) {
            Some(_) => Ok(()),
            None => Err(Error::release_failed("unknown block")),
        }
    }

    fn base_align(&self) -> usize {
        self.base_align
    }

    fn duplicate(
        &self,
        src: &PhysMemBlock,
        offset: usize,
        size: usize,
        min_size: usize,
    ) -> Result<PhysMemBlock> {
        self.duplicates.fetch_add(1, Ordering::SeqCst);
        match self.duplicate_mode {
            DuplicateMode::Fail => Err(Error::io(
                "duplicate",
                std::io::Error::other("dma engine busy"),
            )),
            DuplicateMode::ShortBlock => Ok(self.carve(min_size - 1, self.duplicate_phase)),
            DuplicateMode::Copy => {
                let dst = self.carve(min_size, self.duplicate_phase);
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        src.vaddr().add(offset),
                        dst.vaddr().add(offset),
                        size,
                    );
                }
                Ok(dst)
            }
        }
    }
}

/// Implements `reserve` only; everything else falls back to the defaults.
pub struct ReserveOnlyBackend(pub HeapBackend);

impl ReserveOnlyBackend {
    pub fn new(name: &str) -> ReserveOnlyBackend {
        ReserveOnlyBackend(HeapBackend::new(name))
    }
}

impl PhysMemBackend for ReserveOnlyBackend {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn reserve(&self, size: usize) -> Result<PhysMemBlock> {
        self.0.reserve(size)
    }
}

pub fn is_kind(err: &Error, pred: impl Fn(&ErrorKind) -> bool) -> bool {
    pred(err.kind())
}

struct CaptureLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

/// Installs the capturing logger. Safe to call from every test.
pub fn init_logging() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}

/// Returns `true` if a record at `level` containing all of `parts` was logged.
pub fn logged(level: Level, parts: &[&str]) -> bool {
    LOGGER
        .records
        .lock()
        .unwrap()
        .iter()
        .any(|(l, msg)| *l == level && parts.iter().all(|part| msg.contains(part)))
}
