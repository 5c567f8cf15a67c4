/// Native word width in bytes. Pool carving and block sizing are rounded up to
/// this boundary.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Aligns a number up to the next multiple of the specified alignment.
///
/// Returns `None` if the result would overflow `usize`.
///
/// # Examples
///
/// ```
/// use netmem_raw_alloc::align::align_up;
///
/// assert_eq!(align_up(0, 8), Some(0));
/// assert_eq!(align_up(1, 8), Some(8));
/// assert_eq!(align_up(8, 8), Some(8));
/// assert_eq!(align_up(9, 8), Some(16));
/// assert_eq!(align_up(usize::MAX, 8), None);
/// ```
///
/// # Panics
///
/// This function will panic in debug builds if:
/// - `alignment` is 0
/// - `alignment` is not a power of 2
#[inline]
pub fn align_up(n: usize, alignment: usize) -> Option<usize> {
    debug_assert_ne!(alignment, 0);
    debug_assert!(alignment.is_power_of_two());
    n.checked_add(alignment - 1).map(|v| v & !(alignment - 1))
}

/// Aligns `n` up to the native word width.
#[inline]
pub fn align_to_word(n: usize) -> Option<usize> {
    align_up(n, WORD_SIZE)
}

/// Checks if a number is aligned to the specified alignment boundary.
///
/// ```
/// use netmem_raw_alloc::align::is_aligned;
///
/// assert!(is_aligned(0, 8));
/// assert!(!is_aligned(7, 8));
/// assert!(is_aligned(16, 8));
/// ```
#[inline]
pub fn is_aligned(n: usize, alignment: usize) -> bool {
    debug_assert_ne!(alignment, 0);
    debug_assert!(alignment.is_power_of_two());
    (n & (alignment - 1)) == 0
}
