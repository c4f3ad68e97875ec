use std::os::unix::fs::FileExt;
use std::sync::OnceLock;

/// Size of one `/proc/self/pagemap` entry in bytes.
const PAGEMAP_ENTRY_SIZE: u64 = 8;
/// Bit 63 of a pagemap entry: the page is present in RAM.
const PAGEMAP_PRESENT: u64 = 1 << 63;
/// Bits 0-54 of a pagemap entry: the page frame number.
const PAGEMAP_PFN_MASK: u64 = (1 << 55) - 1;

/// Reserves and pre-faults memory backed by large pages (huge pages).
///
/// The mapping uses `MAP_HUGETLB | MAP_POPULATE`, so on success every page is
/// already resident. A single huge page is physically contiguous, which makes
/// this the only way for a regular process to obtain contiguous regions larger
/// than one base page.
///
/// # Arguments
///
/// * `size` - The number of bytes to reserve. The actual reservation is rounded
///   up to the nearest large page boundary.
///
/// # Returns
///
/// `Ok((ptr, capacity))` with the start of the mapping and its rounded size, or the
/// OS error if huge pages are not configured or exhausted.
///
/// # Prerequisites
///
/// Huge pages must be reserved by the administrator, e.g.:
/// ```bash
/// echo COUNT > /proc/sys/vm/nr_hugepages
/// ```
///
/// # Safety
///
/// The returned pointer must be released using [`free_large_pages`] with the same
/// capacity value.
pub fn allocate_large_pages(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_large_page_size();
    map_anonymous(
        size,
        page_size,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE | libc::MAP_HUGETLB,
    )
}

/// Releases memory that was reserved using [`allocate_large_pages`].
///
/// # Safety
///
/// - `ptr` was returned by a previous call to [`allocate_large_pages`]
/// - `size` matches the capacity returned by that call
/// - The memory has not already been freed and no references to it remain
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free(ptr, size) }
}

/// Reserves and pre-faults memory backed by standard pages.
///
/// The mapping is anonymous, private and populated (`MAP_POPULATE`), so the pages
/// are resident when this function returns. Use [`lock`] to keep them resident.
///
/// # Arguments
///
/// * `size` - The number of bytes to reserve, rounded up to the page size.
///
/// # Safety
///
/// The returned pointer must be released using [`free`] with the same capacity value.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    map_anonymous(
        size,
        page_size,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE,
    )
}

fn map_anonymous(
    size: usize,
    page_size: usize,
    flags: libc::c_int,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    assert!(page_size.is_power_of_two());
    let capacity = (size.max(1) + page_size - 1) & !(page_size - 1);
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok((ptr, capacity))
}

/// Releases memory that was reserved using [`allocate`].
///
/// # Safety
///
/// - `ptr` was returned by a previous call to [`allocate`]
/// - `size` matches the capacity returned by that call
/// - The memory has not already been freed and no references to it remain
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Pins the pages of `[ptr, ptr + size)` in RAM (`mlock`).
///
/// Fails with the OS error when the `RLIMIT_MEMLOCK` limit would be exceeded.
///
/// # Safety
///
/// The range must belong to a live mapping owned by the caller.
pub unsafe fn lock(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::mlock(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Reverses [`lock`].
///
/// # Safety
///
/// The range must belong to a live mapping owned by the caller.
pub unsafe fn unlock(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munlock(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Translates a virtual address of the current process into a physical address.
///
/// Reads the page frame number from `/proc/self/pagemap`. Since Linux 4.0 the frame
/// number is reported as zero unless the process has `CAP_SYS_ADMIN`; this is
/// reported as an error rather than as physical address zero.
///
/// The page containing `vaddr` must be resident, otherwise the entry carries no
/// frame number.
pub fn translate(vaddr: *const u8) -> std::io::Result<u64> {
    let page_size = get_page_size() as u64;
    let vaddr = vaddr as u64;
    let file = std::fs::File::open("/proc/self/pagemap")?;
    let mut entry = [0u8; PAGEMAP_ENTRY_SIZE as usize];
    file.read_exact_at(&mut entry, (vaddr / page_size) * PAGEMAP_ENTRY_SIZE)?;
    let entry = u64::from_le_bytes(entry);
    if entry & PAGEMAP_PRESENT == 0 {
        return Err(std::io::Error::other("page is not present"));
    }
    let pfn = entry & PAGEMAP_PFN_MASK;
    if pfn == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "page frame numbers are hidden from this process",
        ));
    }
    Ok(pfn * page_size + vaddr % page_size)
}

/// Gets the system's large page (huge page) size in bytes.
///
/// The value is read from `/proc/meminfo` once and cached. Falls back to 2MB when
/// the size cannot be determined.
pub fn get_large_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_large_page_size().unwrap_or(2 * 1024 * 1024))
}

/// Gets the system's standard page size in bytes.
///
/// The value is read via `sysconf(_SC_PAGESIZE)` once and cached. Falls back to 4KB
/// when the size cannot be determined.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_page_size().unwrap_or(4 * 1024))
}

/// Parses the `Hugepagesize:` line of `/proc/meminfo`, e.g.
/// ```text
/// Hugepagesize:    2048 kB
/// ```
fn read_large_page_size() -> std::io::Result<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")?;
    meminfo
        .lines()
        .find(|line| line.starts_with("Hugepagesize:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<usize>().ok())
        .map(|kb| kb * 1024)
        .ok_or_else(|| std::io::Error::other("Failed to read Hugepagesize"))
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
