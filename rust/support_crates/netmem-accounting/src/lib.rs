//! Process-wide accounting of native memory handed out to off-heap regions.
//!
//! [`MemoryAccounting`] tracks bytes allocated and released, and enforces two ceilings
//! over the active total:
//!
//! - the **hard limit** blocks a new allocation, asks every registered [`Collect`]
//!   implementation to release what it can, and waits (bounded by the collect timeout)
//!   for deallocations to make room before failing with `OutOfMemory`;
//! - the **soft limit** only asks collectors to release memory, without blocking the
//!   caller. Requests are rate-limited.

use std::{
    sync::{Condvar, Mutex, PoisonError, Weak},
    time::{Duration, Instant},
};

use counter::{Headroom, Tally};
use netmem_common::{Error, Result};

pub mod counter;

/// Allocations up to this size (inclusive) are counted in the small segment bucket.
pub const SMALL_SEGMENT_MAX: u64 = 255;

/// Minimum interval between two soft-limit collection requests.
pub const SOFT_COLLECT_INTERVAL: Duration = Duration::from_millis(200);

/// Something that can give native memory back when the accounting runs short.
///
/// Implementations must not block: they are invoked from allocation paths, possibly
/// while the caller holds its own locks.
pub trait Collect: Send + Sync {
    fn collect(&self);
}

/// Ceilings enforced by [`MemoryAccounting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    hard_limit: u64,
    soft_limit: u64,
    collect_timeout: Duration,
}

impl Limits {
    /// Creates limits; a soft limit above the hard limit is clamped to it.
    pub fn new(hard_limit: u64, soft_limit: u64, collect_timeout: Duration) -> Limits {
        Limits {
            hard_limit,
            soft_limit: soft_limit.min(hard_limit),
            collect_timeout,
        }
    }

    /// No effective ceiling and no waiting.
    pub fn unlimited() -> Limits {
        Limits::new(u64::MAX, u64::MAX, Duration::ZERO)
    }

    pub fn hard_limit(&self) -> u64 {
        self.hard_limit
    }

    pub fn soft_limit(&self) -> u64 {
        self.soft_limit
    }

    pub fn collect_timeout(&self) -> Duration {
        self.collect_timeout
    }
}

/// Tracks native memory usage and enforces the configured [`Limits`].
pub struct MemoryAccounting {
    limits: Limits,
    headroom: Headroom,
    total_allocated: Tally,
    total_deallocated: Tally,
    allocate_calls: Tally,
    deallocate_calls: Tally,
    small_segments: Tally,
    large_segments: Tally,
    soft_collections: Tally,
    forced_collections: Tally,
    collectors: Mutex<Vec<Weak<dyn Collect>>>,
    last_soft_collect: Mutex<Option<Instant>>,
    released: Condvar,
    released_lock: Mutex<()>,
}

impl MemoryAccounting {
    pub fn new(limits: Limits) -> MemoryAccounting {
        MemoryAccounting {
            limits,
            headroom: Headroom::new(limits.hard_limit),
            total_allocated: Tally::default(),
            total_deallocated: Tally::default(),
            allocate_calls: Tally::default(),
            deallocate_calls: Tally::default(),
            small_segments: Tally::default(),
            large_segments: Tally::default(),
            soft_collections: Tally::default(),
            forced_collections: Tally::default(),
            collectors: Mutex::new(Vec::new()),
            last_soft_collect: Mutex::new(None),
            released: Condvar::new(),
            released_lock: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Reserves `size` bytes under the hard limit.
    ///
    /// When the hard limit is breached, collectors are invoked and the call blocks until
    /// enough memory is released or the collect timeout expires. When only the soft limit
    /// is exceeded, a collection is requested and the reservation proceeds.
    ///
    /// The returned [`Reservation`] gives the bytes back when dropped, unless it is
    /// [committed](Reservation::commit) once the native allocation has succeeded.
    pub fn reserve(&self, size: u64) -> Result<Reservation<'_>> {
        if let Err(available) = self.headroom.withdraw(size) {
            self.reserve_blocking(size, available)?;
        } else if self.reserved() > self.limits.soft_limit {
            self.request_collection();
        }
        Ok(Reservation {
            accounting: self,
            size,
            committed: false,
        })
    }

    /// Records the release of a committed allocation of `size` bytes.
    pub fn release(&self, size: u64) {
        self.total_deallocated.add(size);
        self.deallocate_calls.incr();
        self.headroom.deposit(size);
        self.notify_released();
    }

    /// Registers a collector. It is held weakly and dropped from the list once it is gone.
    pub fn register_collector(&self, collector: Weak<dyn Collect>) {
        let mut collectors = self.collectors.lock().unwrap_or_else(PoisonError::into_inner);
        collectors.retain(|c| c.strong_count() > 0);
        collectors.push(collector);
    }

    /// Invokes every live collector.
    pub fn collect(&self) {
        let live: Vec<_> = {
            let mut collectors = self.collectors.lock().unwrap_or_else(PoisonError::into_inner);
            collectors.retain(|c| c.strong_count() > 0);
            collectors.iter().filter_map(Weak::upgrade).collect()
        };
        for collector in live {
            collector.collect();
        }
    }

    /// Total bytes ever allocated.
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated.read()
    }

    /// Total bytes ever released.
    pub fn total_deallocated(&self) -> u64 {
        self.total_deallocated.read()
    }

    /// Bytes currently allocated (allocated minus released).
    pub fn total_active_allocated(&self) -> u64 {
        self.total_allocated().saturating_sub(self.total_deallocated())
    }

    pub fn total_allocate_calls(&self) -> u64 {
        self.allocate_calls.read()
    }

    pub fn total_deallocate_calls(&self) -> u64 {
        self.deallocate_calls.read()
    }

    /// Number of allocations of 0 to 255 bytes.
    pub fn total_segments_0_to_255_bytes(&self) -> u64 {
        self.small_segments.read()
    }

    /// Number of allocations of 256 bytes or more.
    pub fn total_segments_256_or_above(&self) -> u64 {
        self.large_segments.read()
    }

    /// Bytes reserved under the hard limit, including in-flight reservations.
    pub fn reserved(&self) -> u64 {
        self.limits.hard_limit - self.headroom.read()
    }

    /// Bytes that can still be reserved before the hard limit is breached.
    pub fn available(&self) -> u64 {
        self.headroom.read()
    }

    pub fn soft_collections(&self) -> u64 {
        self.soft_collections.read()
    }

    pub fn forced_collections(&self) -> u64 {
        self.forced_collections.read()
    }

    /// Takes a consistent-enough snapshot of all counters for diagnostics.
    pub fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            hard_limit: self.limits.hard_limit,
            soft_limit: self.limits.soft_limit,
            total_allocated: self.total_allocated(),
            total_deallocated: self.total_deallocated(),
            allocate_calls: self.total_allocate_calls(),
            deallocate_calls: self.total_deallocate_calls(),
            segments_0_to_255: self.total_segments_0_to_255_bytes(),
            segments_256_or_above: self.total_segments_256_or_above(),
            reserved: self.reserved(),
        }
    }
}

impl MemoryAccounting {
    #[cold]
    fn reserve_blocking(&self, size: u64, available: u64) -> Result<()> {
        if size > self.limits.hard_limit {
            log::warn!(
                "allocation of {size} bytes exceeds the hard limit of {} bytes",
                self.limits.hard_limit
            );
            return Err(Error::out_of_memory(size, available));
        }

        log::warn!(
            "hard memory limit breached: requested {size} bytes, {available} available; \
             forcing collection"
        );
        self.forced_collections.incr();
        self.collect();

        let deadline = Instant::now() + self.limits.collect_timeout;
        let mut guard = self.released_lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match self.headroom.withdraw(size) {
                Ok(()) => return Ok(()),
                Err(observed) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::warn!(
                            "out of native memory: requested {size} bytes, {observed} available"
                        );
                        return Err(Error::out_of_memory(size, observed));
                    }
                    guard = self
                        .released
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn request_collection(&self) {
        let Ok(mut last) = self.last_soft_collect.try_lock() else {
            return;
        };
        let now = Instant::now();
        if last.is_some_and(|t| now.duration_since(t) < SOFT_COLLECT_INTERVAL) {
            return;
        }
        *last = Some(now);
        drop(last);

        log::debug!(
            "soft memory limit exceeded ({} of {} bytes reserved); requesting collection",
            self.reserved(),
            self.limits.soft_limit
        );
        self.soft_collections.incr();
        self.collect();
    }

    fn commit(&self, size: u64) {
        self.total_allocated.add(size);
        self.allocate_calls.incr();
        if size <= SMALL_SEGMENT_MAX {
            self.small_segments.incr();
        } else {
            self.large_segments.incr();
        }
    }

    fn cancel(&self, size: u64) {
        self.headroom.deposit(size);
        self.notify_released();
    }

    fn notify_released(&self) {
        let _guard = self.released_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.released.notify_all();
    }
}

impl Default for MemoryAccounting {
    fn default() -> Self {
        MemoryAccounting::new(Limits::unlimited())
    }
}

impl std::fmt::Debug for MemoryAccounting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAccounting")
            .field("limits", &self.limits)
            .field("usage", &self.usage())
            .finish_non_exhaustive()
    }
}

/// Bytes reserved under the hard limit for a pending native allocation.
///
/// Dropping an uncommitted reservation returns the bytes.
pub struct Reservation<'a> {
    accounting: &'a MemoryAccounting,
    size: u64,
    committed: bool,
}

impl Reservation<'_> {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Marks the reservation as backing a live allocation. From now on the bytes are
    /// returned only through [`MemoryAccounting::release`].
    pub fn commit(mut self) {
        self.accounting.commit(self.size);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.accounting.cancel(self.size);
        }
    }
}

impl std::fmt::Debug for Reservation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("size", &self.size)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of the accounting counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub hard_limit: u64,
    pub soft_limit: u64,
    pub total_allocated: u64,
    pub total_deallocated: u64,
    pub allocate_calls: u64,
    pub deallocate_calls: u64,
    pub segments_0_to_255: u64,
    pub segments_256_or_above: u64,
    pub reserved: u64,
}

impl MemoryUsage {
    pub fn active(&self) -> u64 {
        self.total_allocated.saturating_sub(self.total_deallocated)
    }
}

impl std::fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "active={} allocated={} deallocated={} calls={}/{} segments(0-255)={} \
             segments(256+)={} reserved={} hard={} soft={}",
            self.active(),
            self.total_allocated,
            self.total_deallocated,
            self.allocate_calls,
            self.deallocate_calls,
            self.segments_0_to_255,
            self.segments_256_or_above,
            self.reserved,
            self.hard_limit,
            self.soft_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn limited(hard: u64, soft: u64, timeout_ms: u64) -> MemoryAccounting {
        MemoryAccounting::new(Limits::new(hard, soft, Duration::from_millis(timeout_ms)))
    }

    struct CountingCollector(AtomicUsize);

    impl Collect for CountingCollector {
        fn collect(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_soft_limit_clamped() {
        let limits = Limits::new(100, 500, Duration::ZERO);
        assert_eq!(limits.soft_limit(), 100);
    }

    #[test]
    fn test_reserve_and_commit() {
        let acc = limited(1000, 1000, 0);
        acc.reserve(100).unwrap().commit();
        acc.reserve(300).unwrap().commit();
        assert_eq!(acc.total_allocated(), 400);
        assert_eq!(acc.total_active_allocated(), 400);
        assert_eq!(acc.total_allocate_calls(), 2);
        assert_eq!(acc.total_segments_0_to_255_bytes(), 1);
        assert_eq!(acc.total_segments_256_or_above(), 1);
        assert_eq!(acc.available(), 600);

        acc.release(100);
        acc.release(300);
        assert_eq!(acc.total_deallocated(), 400);
        assert_eq!(acc.total_active_allocated(), 0);
        assert_eq!(acc.total_deallocate_calls(), 2);
        assert_eq!(acc.available(), 1000);
    }

    #[test]
    fn test_uncommitted_reservation_returns_bytes() {
        let acc = limited(1000, 1000, 0);
        {
            let r = acc.reserve(400).unwrap();
            assert_eq!(r.size(), 400);
            assert_eq!(acc.reserved(), 400);
        }
        assert_eq!(acc.reserved(), 0);
        assert_eq!(acc.total_allocated(), 0);
    }

    #[test]
    fn test_hard_limit_out_of_memory() {
        let acc = limited(100, 100, 10);
        acc.reserve(80).unwrap().commit();
        let err = acc.reserve(40).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(acc.forced_collections(), 1);
        assert_eq!(acc.reserved(), 80);
    }

    #[test]
    fn test_request_above_hard_limit_fails_fast() {
        let acc = limited(100, 100, 60_000);
        let started = Instant::now();
        assert!(acc.reserve(101).unwrap_err().is_out_of_memory());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(acc.forced_collections(), 0);
    }

    #[test]
    fn test_hard_limit_waits_for_release() {
        let acc = Arc::new(limited(100, 100, 10_000));
        acc.reserve(100).unwrap().commit();

        let releaser = {
            let acc = acc.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                acc.release(100);
            })
        };

        acc.reserve(60).unwrap().commit();
        releaser.join().unwrap();
        assert_eq!(acc.total_active_allocated(), 60);
        assert_eq!(acc.forced_collections(), 1);
    }

    #[test]
    fn test_forced_collection_invokes_collectors() {
        let acc = limited(10, 10, 0);
        let collector = Arc::new(CountingCollector(AtomicUsize::new(0)));
        let weak = Arc::downgrade(&collector) as Weak<dyn Collect>;
        acc.register_collector(weak);

        acc.reserve(10).unwrap().commit();
        assert!(acc.reserve(1).is_err());
        assert_eq!(collector.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_soft_limit_requests_collection_without_failing() {
        let acc = limited(1000, 100, 0);
        let collector = Arc::new(CountingCollector(AtomicUsize::new(0)));
        acc.register_collector(Arc::downgrade(&collector) as Weak<dyn Collect>);

        acc.reserve(90).unwrap().commit();
        assert_eq!(acc.soft_collections(), 0);
        acc.reserve(20).unwrap().commit();
        assert_eq!(acc.soft_collections(), 1);
        assert_eq!(collector.0.load(Ordering::Relaxed), 1);

        // Rate limited: an immediate second breach does not collect again.
        acc.reserve(20).unwrap().commit();
        assert_eq!(acc.soft_collections(), 1);
        assert_eq!(acc.total_active_allocated(), 130);
    }

    #[test]
    fn test_dead_collectors_are_pruned() {
        let acc = limited(1000, 1000, 0);
        {
            let collector = Arc::new(CountingCollector(AtomicUsize::new(0)));
            acc.register_collector(Arc::downgrade(&collector) as Weak<dyn Collect>);
        }
        acc.collect();
        assert!(acc.collectors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_usage_snapshot() {
        let acc = limited(4096, 2048, 0);
        acc.reserve(300).unwrap().commit();
        let usage = acc.usage();
        assert_eq!(usage.active(), 300);
        assert_eq!(usage.reserved, 300);
        assert_eq!(usage.hard_limit, 4096);
        let text = usage.to_string();
        assert!(text.contains("active=300"));
        assert!(text.contains("soft=2048"));
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_hard_limit() {
        let acc = Arc::new(limited(10_000, 10_000, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let acc = acc.clone();
                std::thread::spawn(move || {
                    let mut got = 0u64;
                    for _ in 0..100 {
                        if let Ok(r) = acc.reserve(25) {
                            r.commit();
                            got += 25;
                        }
                    }
                    got
                })
            })
            .collect();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 10_000);
        assert_eq!(acc.total_active_allocated(), 10_000);
        assert_eq!(acc.available(), 0);
    }
}
