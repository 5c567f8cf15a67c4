use std::alloc::{Layout, alloc_zeroed, dealloc};

use crate::align::WORD_SIZE;

/// Allocates `size` zero-filled bytes (emulated with the Rust global allocator).
pub fn allocate(size: usize) -> std::io::Result<*mut std::ffi::c_void> {
    let layout = Layout::from_size_align(size.max(1), WORD_SIZE)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "Failed to allocate memory",
        ));
    }
    Ok(ptr as *mut std::ffi::c_void)
}

/// Frees memory previously returned by [`allocate`]. `size` must be the size that was
/// requested.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) {
    if let Ok(layout) = Layout::from_size_align(size.max(1), WORD_SIZE) {
        unsafe { dealloc(ptr as *mut u8, layout) }
    }
}

pub fn physical_memory() -> Option<u64> {
    None
}
