//! Off-heap memory ownership and typed access for packet capture.
//!
//! Packets live in memory allocated outside of Rust's heap or handed over by a capture
//! driver. This crate provides:
//!
//! - [`MemoryRegion`]: an address and a length with single-owner semantics. Regions can
//!   alias ("peer onto") parts of other regions or external buffers without copying.
//! - [`LifecycleTracker`]: frees a native allocation exactly once, after the owner and
//!   every alias are gone.
//! - [`NativeBuffer`]: bounds-checked, byte-order aware typed reads and writes and
//!   delimiter-based text scanning over a region.
//! - [`MemoryPool`]: arena sub-allocation of short-lived regions from large blocks.
//! - [`MemoryContext`]: the allocator and accounting pair that enforces the configured
//!   hard and soft memory ceilings.
//!
//! ```
//! use netmem::{ByteOrder, MemoryContext, NativeBuffer, config::MemoryConfig};
//!
//! let context = MemoryContext::new(MemoryConfig::default());
//! let mut buf = NativeBuffer::with_size_in(&context, 16)?.with_order(ByteOrder::BigEndian);
//! buf.set_u32(0, 0xDEADBEEF)?;
//! assert_eq!(buf.get_bytes(0, 4)?, [0xDE, 0xAD, 0xBE, 0xEF]);
//! # Ok::<(), netmem::Error>(())
//! ```

pub mod buffer;
pub mod config;
pub mod context;
pub mod external;
pub mod hexdump;
pub mod order;
pub mod pool;
pub mod region;
pub mod text;
pub mod tracker;

pub use buffer::NativeBuffer;
pub use context::MemoryContext;
pub use external::{ExternalAllocation, ExternalBuffer, ExternalMemory};
pub use netmem_accounting::{Collect, Limits, MemoryAccounting, MemoryUsage};
pub use netmem_common::{Error, ErrorKind, Result};
pub use order::ByteOrder;
pub use pool::{Block, MemoryPool};
pub use region::MemoryRegion;
pub use tracker::LifecycleTracker;

/// Total bytes ever allocated through the global context.
pub fn total_allocated() -> u64 {
    MemoryContext::global().accounting().total_allocated()
}

/// Total bytes ever released through the global context.
pub fn total_deallocated() -> u64 {
    MemoryContext::global().accounting().total_deallocated()
}

/// Bytes currently allocated through the global context.
pub fn total_active_allocated() -> u64 {
    MemoryContext::global().accounting().total_active_allocated()
}

pub fn total_allocate_calls() -> u64 {
    MemoryContext::global().accounting().total_allocate_calls()
}

pub fn total_deallocate_calls() -> u64 {
    MemoryContext::global().accounting().total_deallocate_calls()
}

pub fn total_segments_0_to_255_bytes() -> u64 {
    MemoryContext::global()
        .accounting()
        .total_segments_0_to_255_bytes()
}

pub fn total_segments_256_or_above() -> u64 {
    MemoryContext::global()
        .accounting()
        .total_segments_256_or_above()
}

/// Snapshot of the global context's counters and limits.
pub fn usage() -> MemoryUsage {
    MemoryContext::global().accounting().usage()
}
