//! Memory held outside of any [`MemoryContext`](crate::context::MemoryContext).
//!
//! Regions can peer onto buffers owned by someone else, for example a capture driver's
//! ring or a byte vector handed over by the caller. The holder is kept alive by every
//! region that peers onto it and is never freed through the native allocator.

use std::cell::UnsafeCell;

use netmem_raw_alloc::align::WORD_SIZE;

/// The span an external holder exposes.
#[derive(Debug, Clone, Copy)]
pub struct ExternalAllocation {
    pub ptr: *mut u8,
    pub len: usize,
    pub read_only: bool,
}

/// A holder of memory that regions may peer onto.
///
/// # Safety
///
/// `memory()` must return the same span for the whole lifetime of the holder, the span
/// must be valid for reads of `len` bytes, and, unless `read_only` is set, valid for
/// writes through the returned pointer while the holder is shared.
pub unsafe trait ExternalMemory: Send + Sync {
    fn memory(&self) -> ExternalAllocation;
}

unsafe impl ExternalMemory for Vec<u8> {
    fn memory(&self) -> ExternalAllocation {
        ExternalAllocation {
            ptr: self.as_ptr() as *mut u8,
            len: self.len(),
            read_only: true,
        }
    }
}

unsafe impl ExternalMemory for Box<[u8]> {
    fn memory(&self) -> ExternalAllocation {
        ExternalAllocation {
            ptr: self.as_ptr() as *mut u8,
            len: self.len(),
            read_only: true,
        }
    }
}

unsafe impl ExternalMemory for &'static [u8] {
    fn memory(&self) -> ExternalAllocation {
        ExternalAllocation {
            ptr: self.as_ptr() as *mut u8,
            len: self.len(),
            read_only: true,
        }
    }
}

/// A writable, zero-filled, word-aligned buffer owned outside of the native allocator.
///
/// Stands in for buffers that a capture driver hands out: regions can peer onto it and
/// write through it, but its storage is released by Rust when the last holder goes away.
pub struct ExternalBuffer {
    words: Box<[UnsafeCell<usize>]>,
    len: usize,
}

// SAFETY: the storage is only reached through raw pointers handed out by `memory()`;
// synchronizing those accesses is the caller's responsibility, as for native regions.
unsafe impl Send for ExternalBuffer {}

unsafe impl Sync for ExternalBuffer {}

impl ExternalBuffer {
    pub fn new(len: usize) -> ExternalBuffer {
        let words = len.div_ceil(WORD_SIZE);
        ExternalBuffer {
            words: (0..words).map(|_| UnsafeCell::new(0)).collect(),
            len,
        }
    }

    /// Creates a buffer holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> ExternalBuffer {
        let buffer = ExternalBuffer::new(bytes.len());
        // SAFETY: the buffer was just created with room for `bytes.len()` bytes and is not
        // shared yet.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.as_mut_ptr(), bytes.len());
        }
        buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the current contents out.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.len];
        // SAFETY: `len` bytes are always backed by `words`.
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_mut_ptr(), bytes.as_mut_ptr(), self.len);
        }
        bytes
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.words.as_ptr()) as *mut u8
    }
}

unsafe impl ExternalMemory for ExternalBuffer {
    fn memory(&self) -> ExternalAllocation {
        ExternalAllocation {
            ptr: self.as_mut_ptr(),
            len: self.len,
            read_only: false,
        }
    }
}

impl std::fmt::Debug for ExternalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBuffer")
            .field("address", &self.as_mut_ptr())
            .field("len", &self.len)
            .finish()
    }
}
