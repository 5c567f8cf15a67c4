//! The allocator and accounting pair that every owning region draws from.

use std::{
    ptr::NonNull,
    sync::{Arc, OnceLock},
};

use netmem_accounting::MemoryAccounting;
use netmem_common::{Error, Result};
use netmem_raw_alloc::allocator::{RawAllocator, SystemAllocator};

use crate::{config::MemoryConfig, tracker::LifecycleTracker};

/// Shared handle to a native allocator and the accounting that limits it.
///
/// Cloning is cheap. Trackers hold a clone so that memory is always returned to the
/// allocator and accounting it came from.
#[derive(Clone)]
pub struct MemoryContext(Arc<ContextInner>);

struct ContextInner {
    config: MemoryConfig,
    allocator: Arc<dyn RawAllocator>,
    accounting: MemoryAccounting,
}

impl MemoryContext {
    /// Creates a context backed by the system allocator.
    pub fn new(config: MemoryConfig) -> MemoryContext {
        MemoryContext::with_allocator(config, Arc::new(SystemAllocator))
    }

    pub fn with_allocator(config: MemoryConfig, allocator: Arc<dyn RawAllocator>) -> MemoryContext {
        let accounting = MemoryAccounting::new(config.limits());
        MemoryContext(Arc::new(ContextInner {
            config,
            allocator,
            accounting,
        }))
    }

    /// The process-wide context, configured from the environment on first use.
    pub fn global() -> &'static MemoryContext {
        static GLOBAL: OnceLock<MemoryContext> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = MemoryConfig::from_env();
            log::debug!("initializing global memory context: {config:?}");
            MemoryContext::new(config)
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.0.config
    }

    pub fn accounting(&self) -> &MemoryAccounting {
        &self.0.accounting
    }

    pub fn allocator(&self) -> &dyn RawAllocator {
        self.0.allocator.as_ref()
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn same_as(&self, other: &MemoryContext) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Reserves `size` bytes under the limits, allocates them natively and binds the
    /// allocation to a new tracker.
    pub(crate) fn allocate(&self, size: usize) -> Result<LifecycleTracker> {
        let reservation = self.accounting().reserve(size as u64)?;
        let ptr = self
            .allocator()
            .allocate(size)
            .map_err(|e| Error::io(format!("native allocation of {size} bytes"), e))?;
        reservation.commit();
        Ok(LifecycleTracker::new(self.clone(), ptr, size))
    }

    /// Returns a tracked allocation to the allocator and the accounting.
    ///
    /// # Safety
    ///
    /// `ptr` and `size` must describe a live allocation made by [`Self::allocate`] on
    /// this context, and nothing may access it afterwards.
    pub(crate) unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        unsafe { self.allocator().free(ptr, size) };
        self.accounting().release(size as u64);
    }
}

impl std::fmt::Debug for MemoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContext")
            .field("config", &self.0.config)
            .field("usage", &self.0.accounting.usage())
            .finish_non_exhaustive()
    }
}
