use crate::mmap;
use crate::pinned_buffer::{self, PinnedBuffer};

#[test]
fn test_normal_allocations() {
    let p = Pages::allocate_normal(1).unwrap();
    assert!(!p.ptr.is_null());
    assert!(p.size >= mmap::get_page_size());
    assert!(p.is_aligned(mmap::get_page_size()));

    let p = Pages::allocate_normal(0).unwrap();
    assert!(!p.ptr.is_null());
    assert_eq!(p.size, mmap::get_page_size(), "Zero size should reserve one page");
}

#[test]
fn test_allocate_multiple_pages() {
    let page_size = mmap::get_page_size();
    let result = Pages::allocate_normal(page_size * 3 + 100).expect("allocate");
    assert_eq!(result.size, page_size * 4);
}

#[test]
fn test_allocations_are_zeroed() {
    let p = Pages::allocate_normal(3000).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(p.ptr as *const u8, p.size) };
    assert!(bytes.iter().all(|&b| b == 0));
}

struct Pages {
    ptr: *mut std::ffi::c_void,
    size: usize,
}

impl Pages {
    fn allocate_normal(size: usize) -> std::io::Result<Pages> {
        let (ptr, size) = mmap::allocate(size)?;
        Ok(Pages { ptr, size })
    }

    fn is_aligned(&self, alignment: usize) -> bool {
        (self.ptr as usize).is_multiple_of(alignment)
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                mmap::free(self.ptr, self.size).expect("free");
            }
        }
    }
}

#[test]
fn test_pinned_buffer_allocate_regular() {
    let size = 1024;
    let buffer = PinnedBuffer::allocate_regular(size).expect("Failed to reserve buffer");

    assert_eq!(buffer.len(), size);
    assert!(buffer.capacity() >= PinnedBuffer::regular_page_size());
    assert!(!buffer.uses_large_pages());
    assert!(!buffer.is_pinned());
    assert_eq!(buffer.alignment(), PinnedBuffer::regular_page_size());
    assert!((buffer.ptr() as usize).is_multiple_of(buffer.alignment()));
}

#[test]
fn test_pinned_buffer_zero_size() {
    let buffer = PinnedBuffer::allocate_regular(0).expect("Failed to reserve buffer");
    assert!(buffer.is_empty());
    assert!(buffer.capacity() >= PinnedBuffer::regular_page_size());
    assert!(!buffer.ptr().is_null());
}

#[test]
fn test_pinned_buffer_allocate_large_pages() {
    if pinned_buffer::check_large_page_support().is_err() {
        println!("Large pages not available, skipping test");
        return;
    }

    if let Ok(buffer) = PinnedBuffer::allocate_large_pages(1024 * 1024) {
        assert!(buffer.uses_large_pages());
        assert_eq!(buffer.alignment(), PinnedBuffer::large_page_size());
        assert!(buffer.capacity() >= PinnedBuffer::large_page_size());
    }
}

#[test]
fn test_pinned_buffer_allocate_with_fallback() {
    let buffer = PinnedBuffer::allocate_with_fallback(1024).expect("allocate_with_fallback");
    assert_eq!(buffer.len(), 1024);
    if buffer.uses_large_pages() {
        assert_eq!(buffer.alignment(), PinnedBuffer::large_page_size());
    } else {
        assert_eq!(buffer.alignment(), PinnedBuffer::regular_page_size());
    }
}

#[test]
fn test_pinned_buffer_pin() {
    let mut buffer = PinnedBuffer::allocate_regular(100).unwrap();
    // RLIMIT_MEMLOCK may be tiny in CI containers.
    if let Err(e) = buffer.pin() {
        println!("pin: {e:?}");
        return;
    }
    assert!(buffer.is_pinned());
    buffer.pin().unwrap();
    assert!(buffer.is_pinned());
}

#[test]
fn test_pinned_buffer_read_write() {
    let mut buffer = PinnedBuffer::allocate_regular(256).unwrap();
    buffer[..4].copy_from_slice(&[1, 2, 3, 4]);
    let last = buffer.capacity() - 1;
    buffer[last] = 0xAA;
    assert_eq!(&buffer[..4], &[1, 2, 3, 4]);
    assert_eq!(buffer[last], 0xAA);
}

#[test]
fn test_single_page_is_contiguous() {
    let buffer = PinnedBuffer::allocate_regular(16).unwrap();
    match buffer.is_physically_contiguous() {
        Ok(contiguous) => {
            assert!(contiguous);
            let paddr = buffer.physical_address().unwrap();
            assert_eq!(paddr % PinnedBuffer::regular_page_size() as u64, 0);
        }
        Err(e) => println!("physical address translation unavailable: {e:?}"),
    }
}
