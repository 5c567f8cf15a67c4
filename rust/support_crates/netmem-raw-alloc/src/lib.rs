//! Native allocation primitives backing off-heap memory regions.
//!
//! The platform backend is selected at compile time; everything above it talks to the
//! [`allocator::RawAllocator`] trait.

pub mod align;
pub mod allocator;

#[cfg_attr(unix, path = "malloc_unix.rs")]
#[cfg_attr(not(unix), path = "malloc_fallback.rs")]
pub mod malloc;
