use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Reserves memory using large pages (emulated by large-page-aligned heap memory).
pub fn allocate_large_pages(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    allocate_aligned(size, get_large_page_size())
}

/// Releases memory that was reserved using [`allocate_large_pages`].
///
/// # Safety
///
/// `ptr` and `size` must come from a previous call to [`allocate_large_pages`].
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_aligned(ptr, size, get_large_page_size()) }
}

/// Reserves memory using standard pages (emulated by page-aligned heap memory).
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    allocate_aligned(size, get_page_size())
}

/// Releases memory that was reserved using [`allocate`].
///
/// # Safety
///
/// `ptr` and `size` must come from a previous call to [`allocate`].
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_aligned(ptr, size, get_page_size()) }
}

/// Page pinning is not available; heap memory is reported as pinned.
///
/// # Safety
///
/// No requirements.
pub unsafe fn lock(_ptr: *mut std::ffi::c_void, _size: usize) -> std::io::Result<()> {
    Ok(())
}

/// # Safety
///
/// No requirements.
pub unsafe fn unlock(_ptr: *mut std::ffi::c_void, _size: usize) -> std::io::Result<()> {
    Ok(())
}

/// Physical address translation is not available on this platform.
pub fn translate(_vaddr: *const u8) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "physical address translation is not supported on this platform",
    ))
}

/// Returns the "large page" size in bytes.
pub fn get_large_page_size() -> usize {
    2 * 1024 * 1024
}

/// Returns the "standard page" size in bytes.
pub fn get_page_size() -> usize {
    4 * 1024
}

fn allocate_aligned(
    size: usize,
    page_size: usize,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    assert!(page_size.is_power_of_two());
    let capacity = (size.max(1) + page_size - 1) & !(page_size - 1);

    let layout = Layout::from_size_align(capacity, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "Failed to allocate memory",
        ));
    }

    Ok((ptr as *mut std::ffi::c_void, capacity))
}

unsafe fn free_aligned(
    ptr: *mut std::ffi::c_void,
    size: usize,
    page_size: usize,
) -> std::io::Result<()> {
    assert!(size.is_multiple_of(page_size));

    let layout = Layout::from_size_align(size, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    unsafe {
        dealloc(ptr as *mut u8, layout);
    }
    Ok(())
}
