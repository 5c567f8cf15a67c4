//! Deallocation of owned native memory.
//!
//! Every native allocation is bound to exactly one [`LifecycleTracker`]. The owning
//! region and all of its aliases share the tracker through an `Arc`; when the last of
//! them lets go, the tracker is dropped and frees the memory. Nothing else frees native
//! memory, so an alias can never observe a freed allocation and no allocation can be
//! freed twice.

use std::ptr::NonNull;

use crate::context::MemoryContext;

pub struct LifecycleTracker {
    ptr: Option<NonNull<u8>>,
    size: usize,
    context: MemoryContext,
}

// SAFETY: the tracker only stores the allocation's address and hands it back to a
// `Send + Sync` allocator exactly once.
unsafe impl Send for LifecycleTracker {}

unsafe impl Sync for LifecycleTracker {}

impl LifecycleTracker {
    pub(crate) fn new(context: MemoryContext, ptr: NonNull<u8>, size: usize) -> LifecycleTracker {
        LifecycleTracker {
            ptr: Some(ptr),
            size,
            context,
        }
    }

    /// Start of the tracked allocation, or 0 once disposed.
    pub fn address(&self) -> usize {
        self.ptr.map_or(0, |p| p.as_ptr() as usize)
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    /// Size of the tracked allocation in bytes, or 0 once disposed.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_disposed(&self) -> bool {
        self.ptr.is_none()
    }

    pub fn context(&self) -> &MemoryContext {
        &self.context
    }

    /// Frees the allocation. Subsequent calls are no-ops.
    fn dispose(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            let size = std::mem::take(&mut self.size);
            // SAFETY: `ptr`/`size` came from `MemoryContext::allocate` on this context and
            // `take()` guarantees this branch runs once.
            unsafe { self.context.free(ptr, size) };
        }
    }
}

impl Drop for LifecycleTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for LifecycleTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleTracker")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
