//! Handles onto native and external memory.
//!
//! A [`MemoryRegion`] is an address and a length. Exactly one region per native
//! allocation is its *owner*; every other region addressing the same allocation is an
//! alias created by peering. Owner and aliases share the allocation's
//! [`LifecycleTracker`], so the memory stays valid for as long as any of them exists and
//! is freed exactly once, after the last one is cleaned up or dropped.
//!
//! Aliases always hold the owning allocation (or the external holder) directly, never
//! another alias, so keeper chains are one level deep and cannot form cycles.

use std::{fmt::Write as _, sync::Arc};

use netmem_common::{Error, Result, result::check_range, verify_arg};

use crate::{
    context::MemoryContext,
    external::ExternalMemory,
    tracker::LifecycleTracker,
};

/// What keeps the memory behind a region alive.
#[derive(Clone)]
enum Keeper {
    Native(Arc<LifecycleTracker>),
    External(Arc<dyn ExternalMemory>),
}

pub struct MemoryRegion {
    ptr: *mut u8,
    size: usize,
    owner: bool,
    read_only: bool,
    keeper: Option<Keeper>,
}

// SAFETY: the pointed-to memory is kept alive by `keeper`, which is `Send + Sync`.
// Concurrent access to the bytes themselves must be coordinated by the caller.
unsafe impl Send for MemoryRegion {}

unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    /// Creates an uninitialized region. Every access fails until it is allocated or
    /// peered.
    pub fn new() -> MemoryRegion {
        MemoryRegion {
            ptr: std::ptr::null_mut(),
            size: 0,
            owner: false,
            read_only: false,
            keeper: None,
        }
    }

    /// Allocates `size` zero-filled bytes from the global context.
    pub fn allocate(size: usize) -> Result<MemoryRegion> {
        MemoryRegion::allocate_in(MemoryContext::global(), size)
    }

    /// Allocates `size` zero-filled bytes from `context`. The new region owns them.
    ///
    /// Fails with `OutOfMemory` if the context's hard limit cannot accommodate the
    /// allocation within its collect timeout.
    pub fn allocate_in(context: &MemoryContext, size: usize) -> Result<MemoryRegion> {
        verify_arg!(size, size > 0);
        let tracker = Arc::new(context.allocate(size)?);
        Ok(MemoryRegion {
            ptr: tracker.as_ptr(),
            size,
            owner: true,
            read_only: false,
            keeper: Some(Keeper::Native(tracker)),
        })
    }

    /// Allocates a new owning region holding a copy of `src`.
    pub fn copy_of(src: &MemoryRegion) -> Result<MemoryRegion> {
        MemoryRegion::copy_of_in(MemoryContext::global(), src)
    }

    pub fn copy_of_in(context: &MemoryContext, src: &MemoryRegion) -> Result<MemoryRegion> {
        let size = src.size()?;
        let mut region = MemoryRegion::allocate_in(context, size)?;
        src.transfer_to(0, &mut region, 0, size)?;
        Ok(region)
    }

    /// Allocates a new owning region holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<MemoryRegion> {
        MemoryRegion::from_slice_in(MemoryContext::global(), bytes)
    }

    pub fn from_slice_in(context: &MemoryContext, bytes: &[u8]) -> Result<MemoryRegion> {
        let mut region = MemoryRegion::allocate_in(context, bytes.len())?;
        region.transfer_from_slice(0, bytes, 0, bytes.len())?;
        Ok(region)
    }

    /// Points this region at `[offset, offset + len)` of `src`.
    ///
    /// The region becomes an alias of whatever keeps `src` alive and inherits its
    /// read-only flag. If this region owned an allocation at a different address, that
    /// ownership is released first; re-peering onto the address it already owns keeps
    /// ownership.
    ///
    /// On error the region is left untouched.
    pub fn peer(&mut self, src: &MemoryRegion, offset: usize, len: usize) -> Result<()> {
        src.check_initialized()?;
        check_range(offset, len, src.size)?;
        // SAFETY: `offset + len <= src.size`, so the result stays within src's span.
        let ptr = unsafe { src.ptr.add(offset) };
        self.attach(ptr, len, src.read_only, src.keeper.clone());
        Ok(())
    }

    /// Peers onto the whole of `src`.
    pub fn peer_region(&mut self, src: &MemoryRegion) -> Result<()> {
        src.check_initialized()?;
        self.peer(src, 0, src.size)
    }

    /// Creates a new alias spanning the whole of this region.
    pub fn alias(&self) -> Result<MemoryRegion> {
        let mut region = MemoryRegion::new();
        region.peer_region(self)?;
        Ok(region)
    }

    /// Peers onto the whole span exposed by an external holder.
    pub fn peer_external(&mut self, holder: Arc<dyn ExternalMemory>) -> Result<()> {
        let len = holder.memory().len;
        self.peer_external_range(holder, 0, len)
    }

    /// Peers onto `[offset, offset + len)` of an external holder.
    pub fn peer_external_range(
        &mut self,
        holder: Arc<dyn ExternalMemory>,
        offset: usize,
        len: usize,
    ) -> Result<()> {
        let memory = holder.memory();
        if memory.ptr.is_null() {
            return Err(Error::invalid_state("external memory has a null address"));
        }
        check_range(offset, len, memory.len)?;
        // SAFETY: bounds checked against the holder's span above.
        let ptr = unsafe { memory.ptr.add(offset) };
        self.attach(ptr, len, memory.read_only, Some(Keeper::External(holder)));
        Ok(())
    }

    fn attach(&mut self, ptr: *mut u8, len: usize, read_only: bool, keeper: Option<Keeper>) {
        if self.owner && self.ptr == ptr {
            self.size = len;
            self.read_only = read_only;
            return;
        }
        self.cleanup();
        self.ptr = ptr;
        self.size = len;
        self.read_only = read_only;
        self.keeper = keeper;
    }

    /// Resets the region to the uninitialized state.
    ///
    /// An owning region gives up its handle on the allocation; the memory is freed once
    /// no alias refers to it anymore. Calling this on an uninitialized region is a no-op.
    pub fn cleanup(&mut self) {
        if self.owner {
            log::trace!("releasing ownership of {:p} ({} bytes)", self.ptr, self.size);
        }
        self.ptr = std::ptr::null_mut();
        self.size = 0;
        self.owner = false;
        self.read_only = false;
        self.keeper = None;
    }

    /// Takes over ownership from `from`, which must own the allocation this region
    /// already peers onto at the same start address.
    ///
    /// Returns `false` without changing either region if `from` is not an owner, the
    /// addresses differ or this region already owns memory.
    pub fn transfer_ownership(&mut self, from: &mut MemoryRegion) -> bool {
        if !from.owner || self.owner || self.ptr.is_null() || self.ptr != from.ptr {
            log::debug!(
                "ownership transfer rejected: {} <- {}",
                self.to_debug_string(),
                from.to_debug_string()
            );
            return false;
        }
        self.keeper = from.keeper.clone();
        self.owner = true;
        from.owner = false;
        true
    }

    pub fn is_initialized(&self) -> bool {
        !self.ptr.is_null()
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns `true` if the memory belongs to a native allocation, either owned by
    /// this region or kept alive by its owner.
    pub fn is_region_based_owner(&self) -> bool {
        self.is_initialized()
            && (self.owner || matches!(self.keeper, Some(Keeper::Native(_))))
    }

    /// Returns the start address, or 0 if uninitialized.
    pub fn address(&self) -> usize {
        self.ptr as usize
    }

    pub fn size(&self) -> Result<usize> {
        self.check_initialized()?;
        Ok(self.size)
    }

    /// Narrows the region to its first `size` bytes.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        self.check_initialized()?;
        if size > self.size {
            return Err(Error::invalid_arg(
                "size",
                format!("{size} exceeds the current size {}", self.size),
            ));
        }
        self.size = size;
        Ok(())
    }

    /// Copies `len` bytes starting at `src_offset` into `dst` at `dst_offset`.
    ///
    /// Both regions may address the same memory; overlapping spans are handled.
    pub fn transfer_to(
        &self,
        src_offset: usize,
        dst: &mut MemoryRegion,
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        let src = self.read_ptr(src_offset, len)?;
        let dst = dst.write_ptr(dst_offset, len)?;
        // SAFETY: both spans were bounds checked against live regions.
        unsafe { std::ptr::copy(src, dst, len) };
        Ok(())
    }

    /// Copies `len` bytes from `src` at `src_offset` into this region at `dst_offset`.
    pub fn transfer_from(
        &mut self,
        dst_offset: usize,
        src: &MemoryRegion,
        src_offset: usize,
        len: usize,
    ) -> Result<()> {
        src.transfer_to(src_offset, self, dst_offset, len)
    }

    /// Copies `len` bytes at `index` into `dst[dst_offset..]`.
    pub fn transfer_to_slice(
        &self,
        index: usize,
        dst: &mut [u8],
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        check_array(dst_offset, len, dst.len())?;
        let src = self.read_ptr(index, len)?;
        // SAFETY: the region span and the array span were both checked; a region never
        // addresses memory borrowed as `dst`.
        unsafe { std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr().add(dst_offset), len) };
        Ok(())
    }

    /// Copies `len` bytes from `src[src_offset..]` into this region at `index`.
    pub fn transfer_from_slice(
        &mut self,
        index: usize,
        src: &[u8],
        src_offset: usize,
        len: usize,
    ) -> Result<()> {
        check_array(src_offset, len, src.len())?;
        let dst = self.write_ptr(index, len)?;
        // SAFETY: both spans were checked above. `src` is a live shared borrow, so it never
        // aliases region memory that is being written.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr().add(src_offset), dst, len) };
        Ok(())
    }

    /// Describes the region's address, size and what keeps it alive.
    pub fn to_debug_string(&self) -> String {
        let mut s = String::new();
        if !self.is_initialized() {
            s.push_str("MemoryRegion[uninitialized]");
            return s;
        }
        let _ = write!(s, "MemoryRegion[address={:#x}, size={}", self.address(), self.size);
        if self.owner {
            s.push_str(", owner");
        } else {
            match &self.keeper {
                Some(Keeper::Native(tracker)) => {
                    let _ = write!(
                        s,
                        ", alias of native {:#x}+{}",
                        tracker.address(),
                        self.address().wrapping_sub(tracker.address())
                    );
                }
                Some(Keeper::External(_)) => s.push_str(", alias of external memory"),
                None => s.push_str(", unkept"),
            }
        }
        if self.read_only {
            s.push_str(", read-only");
        }
        s.push(']');
        s
    }

    pub(crate) fn check_initialized(&self) -> Result<()> {
        if self.ptr.is_null() {
            return Err(Error::invalid_state("memory region is not initialized"));
        }
        Ok(())
    }

    /// Validates `[index, index + len)` and returns a pointer to its start.
    pub(crate) fn read_ptr(&self, index: usize, len: usize) -> Result<*const u8> {
        self.check_initialized()?;
        check_range(index, len, self.size)?;
        // SAFETY: `index <= size`.
        Ok(unsafe { self.ptr.add(index) })
    }

    /// Validates `[index, index + len)` for writing and returns a pointer to its start.
    pub(crate) fn write_ptr(&mut self, index: usize, len: usize) -> Result<*mut u8> {
        self.check_initialized()?;
        if self.read_only {
            return Err(Error::invalid_state("memory region is read-only"));
        }
        check_range(index, len, self.size)?;
        // SAFETY: `index <= size`.
        Ok(unsafe { self.ptr.add(index) })
    }

    pub(crate) fn bytes(&self, index: usize, len: usize) -> Result<&[u8]> {
        let ptr = self.read_ptr(index, len)?;
        // SAFETY: the span is in bounds and kept alive by `self`.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    pub(crate) fn bytes_mut(&mut self, index: usize, len: usize) -> Result<&mut [u8]> {
        let ptr = self.write_ptr(index, len)?;
        // SAFETY: the span is in bounds, writable and kept alive by `self`.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }
}

impl Default for MemoryRegion {
    fn default() -> Self {
        MemoryRegion::new()
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_debug_string())
    }
}

fn check_array(offset: usize, len: usize, array_len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= array_len => Ok(()),
        _ => Err(Error::array_out_of_range(offset, len, array_len)),
    }
}
