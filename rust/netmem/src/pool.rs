//! Arena sub-allocation for short-lived regions.
//!
//! A [`MemoryPool`] carves word-aligned slices out of large owning [`Block`]s and peers
//! caller regions onto them, so that a burst of small allocations (one per captured
//! packet, typically) costs one native allocation per block rather than one per region.
//!
//! Blocks are never reused. When the current block cannot fit a request it is retired
//! and a new one becomes current; the retired block's memory stays alive for as long as
//! any region carved from it does and is freed after the last of them is dropped.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError,
        atomic::{AtomicUsize, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use netmem_accounting::Collect;
use netmem_common::{Error, Result, verify_arg};
use netmem_raw_alloc::align::align_to_word;

use crate::{buffer::NativeBuffer, context::MemoryContext, region::MemoryRegion};

/// A single owning allocation that slices are carved from.
pub struct Block {
    region: MemoryRegion,
    cursor: Mutex<Cursor>,
    created_on: SystemTime,
}

struct Cursor {
    offset: usize,
    available: usize,
}

impl Block {
    fn new_in(context: &MemoryContext, capacity: usize) -> Result<Block> {
        let region = MemoryRegion::allocate_in(context, capacity)?;
        Ok(Block {
            region,
            cursor: Mutex::new(Cursor {
                offset: 0,
                available: capacity,
            }),
            created_on: SystemTime::now(),
        })
    }

    /// Carves `size` bytes, rounded up to the native word size.
    ///
    /// Returns the offset of the slice within the block, or `None` if the block does not
    /// have enough space left.
    pub fn allocate(&self, size: usize) -> Option<usize> {
        let size = align_to_word(size)?;
        let mut cursor = self.lock_cursor();
        if size > cursor.available {
            return None;
        }
        let offset = cursor.offset;
        cursor.offset += size;
        cursor.available -= size;
        Some(offset)
    }

    /// Individual slices are not reclaimed; their space is freed with the whole block.
    pub fn free(&self, _offset: usize, _len: usize) {}

    /// The owning region covering the whole block.
    pub fn region(&self) -> &MemoryRegion {
        &self.region
    }

    pub fn capacity(&self) -> usize {
        self.region.size().unwrap_or(0)
    }

    pub fn available(&self) -> usize {
        self.lock_cursor().available
    }

    pub fn used(&self) -> usize {
        self.lock_cursor().offset
    }

    pub fn created_on(&self) -> SystemTime {
        self.created_on
    }

    fn lock_cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let created_on = self
            .created_on
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        write!(
            f,
            "Block[address={:#x}, capacity={}, available={}, created_on={created_on}]",
            self.region.address(),
            self.capacity(),
            self.available(),
        )
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// Sub-allocates regions from a sequence of blocks.
///
/// Carving is serialized by the pool's lock, so concurrent callers never receive
/// overlapping slices.
pub struct MemoryPool {
    context: MemoryContext,
    block_size: AtomicUsize,
    current: Mutex<Option<Arc<Block>>>,
}

impl MemoryPool {
    /// Creates a pool on the global context.
    pub fn new(block_size: usize) -> Result<Arc<MemoryPool>> {
        MemoryPool::with_context(MemoryContext::global().clone(), block_size)
    }

    /// Creates a pool that allocates its blocks from `context` and registers with the
    /// context's accounting, so that memory pressure retires the current block.
    pub fn with_context(context: MemoryContext, block_size: usize) -> Result<Arc<MemoryPool>> {
        verify_arg!(block_size, block_size > 0);
        let pool = Arc::new(MemoryPool {
            context,
            block_size: AtomicUsize::new(block_size),
            current: Mutex::new(None),
        });
        let collector = Arc::downgrade(&pool);
        pool.context.accounting().register_collector(collector);
        Ok(pool)
    }

    /// The process-wide pool, using the block size configured for the global context.
    pub fn global() -> Result<&'static Arc<MemoryPool>> {
        static GLOBAL: OnceLock<Arc<MemoryPool>> = OnceLock::new();
        if let Some(pool) = GLOBAL.get() {
            return Ok(pool);
        }
        let context = MemoryContext::global();
        let pool = MemoryPool::with_context(context.clone(), context.config().block_size())?;
        Ok(GLOBAL.get_or_init(|| pool))
    }

    pub fn context(&self) -> &MemoryContext {
        &self.context
    }

    /// Minimum capacity of newly created blocks.
    pub fn block_size(&self) -> usize {
        self.block_size.load(Ordering::Relaxed)
    }

    /// Changes the minimum capacity of blocks created from now on.
    pub fn set_block_size(&self, block_size: usize) -> Result<()> {
        verify_arg!(block_size, block_size > 0);
        self.block_size.store(block_size, Ordering::Relaxed);
        Ok(())
    }

    /// Returns a block that can fit `size` bytes.
    ///
    /// The current block is returned if it has enough room. Otherwise it is retired and a
    /// new block of `max(size, block_size)` bytes, word aligned, becomes current.
    pub fn get_block(&self, size: usize) -> Result<Arc<Block>> {
        let mut current = self.lock_current();
        self.block_for(&mut current, size)
    }

    /// Carves `size` bytes and peers `dst` onto them.
    pub fn allocate(&self, size: usize, dst: &mut MemoryRegion) -> Result<()> {
        verify_arg!(size, size > 0);
        let (block, offset) = {
            let mut current = self.lock_current();
            let block = self.block_for(&mut current, size)?;
            let offset = block.allocate(size).ok_or_else(|| {
                Error::invalid_state(format!("{block} cannot fit {size} bytes"))
            })?;
            (block, offset)
        };
        dst.peer(block.region(), offset, size)
    }

    /// Carves a pooled buffer of `size` bytes.
    pub fn buffer(&self, size: usize) -> Result<NativeBuffer> {
        let mut buffer = NativeBuffer::new();
        self.allocate(size, &mut buffer)?;
        Ok(buffer)
    }

    /// Allocates a dedicated owning region, bypassing the blocks.
    pub fn allocate_exclusive(&self, size: usize) -> Result<MemoryRegion> {
        MemoryRegion::allocate_in(&self.context, size)
    }

    /// Copies `src` into pooled memory and peers `dst` onto the copy.
    pub fn duplicate(&self, src: &MemoryRegion, dst: &mut MemoryRegion) -> Result<()> {
        let size = src.size()?;
        let mut copy = MemoryRegion::new();
        self.allocate(size, &mut copy)?;
        src.transfer_to(0, &mut copy, 0, size)?;
        dst.peer_region(&copy)
    }

    pub fn duplicate_slice(&self, src: &[u8], dst: &mut MemoryRegion) -> Result<()> {
        let mut copy = MemoryRegion::new();
        self.allocate(src.len(), &mut copy)?;
        copy.transfer_from_slice(0, src, 0, src.len())?;
        dst.peer_region(&copy)
    }

    /// Copies two regions back to back into one pooled slice and peers `dst1` and `dst2`
    /// onto their respective copies.
    pub fn duplicate2(
        &self,
        src1: &MemoryRegion,
        src2: &MemoryRegion,
        dst1: &mut MemoryRegion,
        dst2: &mut MemoryRegion,
    ) -> Result<()> {
        let (size1, size2) = (src1.size()?, src2.size()?);
        let mut copy = self.allocate_pair(size1, size2)?;
        src1.transfer_to(0, &mut copy, 0, size1)?;
        src2.transfer_to(0, &mut copy, size1, size2)?;
        dst1.peer(&copy, 0, size1)?;
        dst2.peer(&copy, size1, size2)
    }

    pub fn duplicate2_slice(
        &self,
        src1: &[u8],
        src2: &[u8],
        dst1: &mut MemoryRegion,
        dst2: &mut MemoryRegion,
    ) -> Result<()> {
        let (size1, size2) = (src1.len(), src2.len());
        let mut copy = self.allocate_pair(size1, size2)?;
        copy.transfer_from_slice(0, src1, 0, size1)?;
        copy.transfer_from_slice(size1, src2, 0, size2)?;
        dst1.peer(&copy, 0, size1)?;
        dst2.peer(&copy, size1, size2)
    }

    fn allocate_pair(&self, size1: usize, size2: usize) -> Result<MemoryRegion> {
        let total = size1
            .checked_add(size2)
            .ok_or_else(|| Error::invalid_arg("size", "combined size overflows usize"))?;
        let mut copy = MemoryRegion::new();
        self.allocate(total, &mut copy)?;
        Ok(copy)
    }

    /// Retires the current block. Regions already carved from it stay valid.
    pub fn shutdown(&self) {
        if let Some(block) = self.lock_current().take() {
            log::debug!("pool shutdown, retiring {block}");
        }
    }

    fn block_for(&self, current: &mut Option<Arc<Block>>, size: usize) -> Result<Arc<Block>> {
        let size = align_to_word(size)
            .ok_or_else(|| Error::invalid_arg("size", format!("{size} is too large")))?;
        if let Some(block) = current.as_ref().filter(|b| b.available() >= size) {
            return Ok(block.clone());
        }
        if let Some(retired) = current.take() {
            log::debug!("retiring {retired}");
        }
        let capacity = size.max(align_to_word(self.block_size()).unwrap_or(size));
        let block = Arc::new(Block::new_in(&self.context, capacity)?);
        log::debug!("created {block}");
        *current = Some(block.clone());
        Ok(block)
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<Block>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Collect for MemoryPool {
    fn collect(&self) {
        let mut current = match self.current.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        if let Some(block) = current.take() {
            log::debug!("memory pressure, retiring {block}");
        }
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("block_size", &self.block_size())
            .field("current", &*self.lock_current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use netmem_raw_alloc::{align::WORD_SIZE, allocator::TrackingAllocator};

    use super::*;
    use crate::config::MemoryConfig;

    fn pool(block_size: usize) -> (Arc<MemoryPool>, Arc<TrackingAllocator>) {
        let allocator = Arc::new(TrackingAllocator::new());
        let context = MemoryContext::with_allocator(MemoryConfig::default(), allocator.clone());
        (MemoryPool::with_context(context, block_size).unwrap(), allocator)
    }

    #[test]
    fn test_block_offsets_are_aligned_and_monotonic() {
        let (pool, _) = pool(1024);
        let block = pool.get_block(1).unwrap();
        let mut last_end = 0;
        for size in [1, 3, 8, 13, 64, 7] {
            let offset = block.allocate(size).unwrap();
            assert_eq!(offset % WORD_SIZE, 0);
            assert!(offset >= last_end);
            last_end = offset + size;
        }
        assert_eq!(block.used() + block.available(), block.capacity());
    }

    #[test]
    fn test_block_refuses_when_full() {
        let (pool, _) = pool(64);
        let block = pool.get_block(64).unwrap();
        assert_eq!(block.capacity(), 64);
        assert_eq!(block.allocate(64 - WORD_SIZE), Some(0));
        assert_eq!(block.allocate(1), Some(64 - WORD_SIZE));
        assert_eq!(block.allocate(1), None);
        assert_eq!(block.allocate(usize::MAX), None);
        block.free(0, 1);
        assert_eq!(block.available(), 0);
    }

    #[test]
    fn test_get_block_replaces_exhausted_block() {
        let (pool, _) = pool(128);
        let first = pool.get_block(100).unwrap();
        assert!(Arc::ptr_eq(&first, &pool.get_block(16).unwrap()));
        first.allocate(100).unwrap();
        let second = pool.get_block(64).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.capacity(), 128);
    }

    #[test]
    fn test_oversized_request_gets_larger_block() {
        let (pool, _) = pool(32768);
        let mut region = MemoryRegion::new();
        pool.allocate(40000, &mut region).unwrap();
        let block = pool.get_block(0).unwrap();
        assert!(block.capacity() >= 40000);
        assert_eq!(region.address(), block.region().address());
    }

    #[test]
    fn test_allocate_peers_without_ownership() {
        let (pool, allocator) = pool(256);
        let mut a = MemoryRegion::new();
        let mut b = MemoryRegion::new();
        pool.allocate(10, &mut a).unwrap();
        pool.allocate(10, &mut b).unwrap();
        assert!(!a.is_owner());
        assert!(a.is_region_based_owner());
        assert_eq!(a.size().unwrap(), 10);
        assert_eq!(b.address() - a.address(), align_to_word(10).unwrap());
        assert_eq!(allocator.live_count(), 1);
        assert!(pool.allocate(0, &mut a).unwrap_err().is_invalid_arg());
    }

    #[test]
    fn test_retired_block_lives_until_last_region() {
        let (pool, allocator) = pool(64);
        let mut region = MemoryRegion::new();
        pool.allocate(48, &mut region).unwrap();
        let first = region.address();
        let mut next = MemoryRegion::new();
        pool.allocate(48, &mut next).unwrap();
        assert_eq!(allocator.live_count(), 2);
        assert!(allocator.is_live(first));

        drop(region);
        assert!(!allocator.is_live(first));
        pool.shutdown();
        assert_eq!(allocator.live_count(), 1);
        drop(next);
        assert_eq!(allocator.live_count(), 0);
        assert_eq!(allocator.invalid_free_count(), 0);
    }

    #[test]
    fn test_duplicate() {
        let (pool, _) = pool(256);
        let mut src = MemoryRegion::new();
        src.peer_external(Arc::new(b"transient".to_vec())).unwrap();
        let mut dst = MemoryRegion::new();
        pool.duplicate(&src, &mut dst).unwrap();
        assert_ne!(dst.address(), src.address());
        assert!(!dst.is_read_only());
        assert_eq!(dst.bytes(0, 9).unwrap(), b"transient");

        let mut other = MemoryRegion::new();
        pool.duplicate_slice(b"xyz", &mut other).unwrap();
        assert_eq!(other.bytes(0, 3).unwrap(), b"xyz");
        assert!(pool.duplicate(&MemoryRegion::new(), &mut dst).unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_duplicate2_is_contiguous() {
        let (pool, _) = pool(256);
        let header = MemoryRegion::from_slice_in(pool.context(), b"HDR").unwrap();
        let payload = MemoryRegion::from_slice_in(pool.context(), b"payload").unwrap();
        let (mut h, mut p) = (MemoryRegion::new(), MemoryRegion::new());
        pool.duplicate2(&header, &payload, &mut h, &mut p).unwrap();
        assert_eq!(p.address(), h.address() + 3);
        assert_eq!(h.bytes(0, 3).unwrap(), b"HDR");
        assert_eq!(p.bytes(0, 7).unwrap(), b"payload");

        pool.duplicate2_slice(b"ab", b"", &mut h, &mut p).unwrap();
        assert_eq!(h.bytes(0, 2).unwrap(), b"ab");
        assert_eq!(p.size().unwrap(), 0);
    }

    #[test]
    fn test_block_size_is_adjustable() {
        let (pool, _) = pool(64);
        assert_eq!(pool.block_size(), 64);
        pool.set_block_size(512).unwrap();
        pool.shutdown();
        assert_eq!(pool.get_block(1).unwrap().capacity(), 512);
        assert!(pool.set_block_size(0).unwrap_err().is_invalid_arg());
        assert!(MemoryPool::with_context(pool.context().clone(), 0).is_err());
    }

    #[test]
    fn test_collect_retires_current_block() {
        let (pool, allocator) = pool(64);
        pool.get_block(8).unwrap();
        assert_eq!(allocator.live_count(), 1);
        pool.context().accounting().collect();
        assert_eq!(allocator.live_count(), 0);
    }

    #[test]
    fn test_pooled_buffer() {
        let (pool, _) = pool(64);
        let mut buf = pool.buffer(4).unwrap();
        buf.set_u32(0, 7).unwrap();
        assert_eq!(buf.get_u32(0).unwrap(), 7);
        assert!(buf.get_u8(4).unwrap_err().is_out_of_range());
        let exclusive = pool.allocate_exclusive(4).unwrap();
        assert!(exclusive.is_owner());
    }

    #[test]
    fn test_concurrent_allocations_do_not_overlap() {
        let (pool, _) = pool(256);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let mut region = MemoryRegion::new();
                            pool.allocate(24, &mut region).unwrap();
                            region
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut spans: Vec<(usize, usize)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|r| (r.address(), r.address() + r.size().unwrap()))
            .collect();
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
    }
}
