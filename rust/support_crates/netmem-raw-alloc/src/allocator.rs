//! The `rawAllocate` / `rawFree` seam between managed regions and the native heap.

use std::{
    collections::HashMap,
    ptr::NonNull,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::malloc;

/// Source of native memory for off-heap regions.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - `allocate(size)` returns memory that is readable and writable for at least
///   `size` bytes, zero-filled, and aligned to at least the native word width.
/// - The memory stays valid until it is passed to `free` with the same `size`.
/// - Distinct live allocations never overlap.
pub unsafe trait RawAllocator: Send + Sync {
    /// Allocates `size` bytes.
    fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>>;

    /// Releases an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same `size`, and must
    /// not have been freed already.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);
}

/// The platform C heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

unsafe impl RawAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>> {
        let ptr = malloc::allocate(size)?;
        log::trace!("native allocate: {size} bytes at {ptr:p}");
        NonNull::new(ptr as *mut u8).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::OutOfMemory, "null allocation")
        })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        log::trace!("native free: {size} bytes at {ptr:p}");
        unsafe { malloc::free(ptr.as_ptr() as *mut std::ffi::c_void, size) }
    }
}

/// An allocator wrapper that records every live allocation.
///
/// Used for diagnostics and tests: it detects frees of unknown addresses, size
/// mismatches and double frees, and reports how many frees each address received.
pub struct TrackingAllocator<A = SystemAllocator> {
    inner: A,
    live: Mutex<HashMap<usize, usize>>,
    allocations: AtomicU64,
    frees: AtomicU64,
    invalid_frees: AtomicU64,
}

impl TrackingAllocator<SystemAllocator> {
    pub fn new() -> Self {
        Self::wrap(SystemAllocator)
    }
}

impl Default for TrackingAllocator<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RawAllocator> TrackingAllocator<A> {
    pub fn wrap(inner: A) -> Self {
        TrackingAllocator {
            inner,
            live: Mutex::new(HashMap::new()),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            invalid_frees: AtomicU64::new(0),
        }
    }

    /// Number of allocations that have not been freed yet.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if `address` is currently allocated.
    pub fn is_live(&self, address: usize) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&address)
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn free_count(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }

    /// Frees that targeted an unknown address or carried the wrong size. These are
    /// never forwarded to the inner allocator.
    pub fn invalid_free_count(&self) -> u64 {
        self.invalid_frees.load(Ordering::Relaxed)
    }
}

unsafe impl<A: RawAllocator> RawAllocator for TrackingAllocator<A> {
    fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>> {
        let ptr = self.inner.allocate(size)?;
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ptr.as_ptr() as usize, size);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(ptr.as_ptr() as usize));
        match removed {
            Some(recorded) if recorded == size => {
                self.frees.fetch_add(1, Ordering::Relaxed);
                unsafe { self.inner.free(ptr, size) }
            }
            Some(recorded) => {
                log::warn!("free size mismatch at {ptr:p}: recorded {recorded}, got {size}");
                self.invalid_frees.fetch_add(1, Ordering::Relaxed);
                // Put it back; the memory is still owned by someone.
                self.live
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(ptr.as_ptr() as usize, recorded);
            }
            None => {
                log::warn!("free of unknown address {ptr:p} ({size} bytes)");
                self.invalid_frees.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<A> std::fmt::Debug for TrackingAllocator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("allocations", &self.allocations.load(Ordering::Relaxed))
            .field("frees", &self.frees.load(Ordering::Relaxed))
            .field("invalid_frees", &self.invalid_frees.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
