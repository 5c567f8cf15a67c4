use std::sync::OnceLock;

/// Allocates `size` zero-filled bytes from the C heap.
///
/// A zero `size` is bumped to one byte so that every successful call returns a
/// distinct, non-null address.
///
/// # Returns
///
/// - `Ok(ptr)` - pointer to the allocated memory, aligned for any fundamental type
/// - `Err(io::Error)` - `OutOfMemory` if the C allocator returned null
///
/// # Safety
///
/// The returned pointer must be released with [`free`] exactly once.
pub fn allocate(size: usize) -> std::io::Result<*mut std::ffi::c_void> {
    let ptr = unsafe { libc::calloc(1, size.max(1)) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            format!("calloc failed for {size} bytes"),
        ));
    }
    Ok(ptr)
}

/// Frees memory previously returned by [`allocate`].
///
/// # Safety
///
/// - `ptr` was returned by a previous call to [`allocate`]
/// - The memory has not already been freed
/// - No other references to the memory exist
pub unsafe fn free(ptr: *mut std::ffi::c_void, _size: usize) {
    unsafe { libc::free(ptr) }
}

/// Gets the amount of physical memory installed on the system, in bytes.
///
/// The value is cached after the first call. Returns `None` when the system does not
/// report it.
pub fn physical_memory() -> Option<u64> {
    static PHYSICAL: OnceLock<Option<u64>> = OnceLock::new();
    *PHYSICAL.get_or_init(|| {
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if pages <= 0 || page_size <= 0 {
            None
        } else {
            (pages as u64).checked_mul(page_size as u64)
        }
    })
}
