//! Alignment arithmetic on alignment *masks*.
//!
//! Allocation parameters express alignment as a mask (`alignment - 1`), so an
//! alignment of 16 bytes is requested as `15` and "no alignment" as `0`.

/// Checks that `align` is a valid alignment mask, i.e. `align + 1` is a power of two.
///
/// # Examples
///
/// ```
/// use physalloc::align::is_valid_align_mask;
///
/// assert!(is_valid_align_mask(0));
/// assert!(is_valid_align_mask(15));
/// assert!(is_valid_align_mask(4095));
/// assert!(!is_valid_align_mask(16));
/// assert!(!is_valid_align_mask(usize::MAX));
/// ```
#[inline]
pub fn is_valid_align_mask(align: usize) -> bool {
    align.checked_add(1).is_some_and(usize::is_power_of_two)
}

/// Returns the number of bytes to skip from `addr` to reach the next address
/// aligned to `align + 1`.
///
/// Returns 0 when `addr` is already aligned.
///
/// # Examples
///
/// ```
/// use physalloc::align::alignment_correction;
///
/// assert_eq!(alignment_correction(0x1000, 15), 0);
/// assert_eq!(alignment_correction(0x1007, 15), 9);
/// assert_eq!(alignment_correction(0x100f, 15), 1);
/// assert_eq!(alignment_correction(0x1007, 0), 0);
/// ```
///
/// # Panics
///
/// Panics in debug builds if `align` is not a valid alignment mask.
#[inline]
pub fn alignment_correction(addr: usize, align: usize) -> usize {
    debug_assert!(is_valid_align_mask(align));
    match addr & align {
        0 => 0,
        rem => (align + 1) - rem,
    }
}

/// Checks if `addr` is aligned to `align + 1`.
///
/// # Panics
///
/// Panics in debug builds if `align` is not a valid alignment mask.
#[inline]
pub fn is_aligned(addr: usize, align: usize) -> bool {
    debug_assert!(is_valid_align_mask(align));
    addr & align == 0
}
