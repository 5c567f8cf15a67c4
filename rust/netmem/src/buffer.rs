//! Typed, byte-order aware access to a [`MemoryRegion`].

use std::ops::{Deref, DerefMut};

use byteorder::{BE, ByteOrder as _, LE};
use bytemuck::Pod;
use netmem_common::{Error, Result, verify_arg};

use crate::{context::MemoryContext, order::ByteOrder, region::MemoryRegion};

/// A [`MemoryRegion`] with a byte order for its multi-byte accessors.
///
/// Every accessor validates that the region is initialized and that the whole value lies
/// within `[0, size)` before touching memory. Setters fail with `InvalidState` on a
/// read-only region.
///
/// Accessors are not synchronized. A buffer must not be written from one thread while
/// another thread accesses the same memory through any region.
#[derive(Default)]
pub struct NativeBuffer {
    region: MemoryRegion,
    order: ByteOrder,
}

macro_rules! multi_byte_accessors {
    ($($(#[$meta:meta])* $get:ident, $set:ident, $ty:ty, $read:ident, $write:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $get(&self, index: usize) -> Result<$ty> {
                let bytes = self.region.bytes(index, size_of::<$ty>())?;
                Ok(match self.order {
                    ByteOrder::BigEndian => BE::$read(bytes),
                    ByteOrder::LittleEndian => LE::$read(bytes),
                })
            }

            pub fn $set(&mut self, index: usize, value: $ty) -> Result<()> {
                let order = self.order;
                let bytes = self.region.bytes_mut(index, size_of::<$ty>())?;
                match order {
                    ByteOrder::BigEndian => BE::$write(bytes, value),
                    ByteOrder::LittleEndian => LE::$write(bytes, value),
                }
                Ok(())
            }
        )*
    };
}

impl NativeBuffer {
    /// Creates an uninitialized buffer in native byte order.
    pub fn new() -> NativeBuffer {
        NativeBuffer::default()
    }

    pub fn with_order(mut self, order: ByteOrder) -> NativeBuffer {
        self.order = order;
        self
    }

    /// Allocates a zero-filled owning buffer of `size` bytes from the global context.
    pub fn with_size(size: usize) -> Result<NativeBuffer> {
        NativeBuffer::with_size_in(MemoryContext::global(), size)
    }

    pub fn with_size_in(context: &MemoryContext, size: usize) -> Result<NativeBuffer> {
        Ok(NativeBuffer::from_region(MemoryRegion::allocate_in(context, size)?))
    }

    /// Allocates an owning buffer holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<NativeBuffer> {
        NativeBuffer::from_bytes_in(MemoryContext::global(), bytes)
    }

    pub fn from_bytes_in(context: &MemoryContext, bytes: &[u8]) -> Result<NativeBuffer> {
        Ok(NativeBuffer::from_region(MemoryRegion::from_slice_in(context, bytes)?))
    }

    pub fn from_region(region: MemoryRegion) -> NativeBuffer {
        NativeBuffer {
            region,
            order: ByteOrder::native(),
        }
    }

    pub fn into_region(self) -> MemoryRegion {
        self.region
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub fn get_u8(&self, index: usize) -> Result<u8> {
        Ok(self.region.bytes(index, 1)?[0])
    }

    pub fn get_i8(&self, index: usize) -> Result<i8> {
        self.get_u8(index).map(|b| b as i8)
    }

    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        self.region.bytes_mut(index, 1)?[0] = value;
        Ok(())
    }

    pub fn set_i8(&mut self, index: usize, value: i8) -> Result<()> {
        self.set_u8(index, value as u8)
    }

    multi_byte_accessors! {
        get_u16, set_u16, u16, read_u16, write_u16;
        get_i16, set_i16, i16, read_i16, write_i16;
        get_u32, set_u32, u32, read_u32, write_u32;
        get_i32, set_i32, i32, read_i32, write_i32;
        get_u64, set_u64, u64, read_u64, write_u64;
        get_i64, set_i64, i64, read_i64, write_i64;
        /// Reads an IEEE 754 single, interpreting the bits in the buffer's byte order.
        get_f32, set_f32, f32, read_f32, write_f32;
        /// Reads an IEEE 754 double, interpreting the bits in the buffer's byte order.
        get_f64, set_f64, f64, read_f64, write_f64;
    }

    /// Copies `len` bytes starting at `index` into a new vector.
    pub fn get_bytes(&self, index: usize, len: usize) -> Result<Vec<u8>> {
        Ok(self.region.bytes(index, len)?.to_vec())
    }

    /// Copies `len` bytes starting at `index` into `dst[offset..]`.
    pub fn get_bytes_into(
        &self,
        index: usize,
        dst: &mut [u8],
        offset: usize,
        len: usize,
    ) -> Result<()> {
        self.region.transfer_to_slice(index, dst, offset, len)
    }

    pub fn set_bytes(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        self.region.transfer_from_slice(index, bytes, 0, bytes.len())
    }

    /// Reads `count` consecutive values of a plain-old-data type in host byte order.
    pub fn get_values<T: Pod>(&self, index: usize, count: usize) -> Result<Vec<T>> {
        verify_arg!(T, size_of::<T>() > 0);
        let len = values_len::<T>(count)?;
        let bytes = self.region.bytes(index, len)?;
        let mut values = vec![T::zeroed(); count];
        bytemuck::cast_slice_mut::<T, u8>(&mut values).copy_from_slice(bytes);
        Ok(values)
    }

    /// Writes `values` consecutively in host byte order.
    pub fn set_values<T: Pod>(&mut self, index: usize, values: &[T]) -> Result<()> {
        verify_arg!(T, size_of::<T>() > 0);
        let len = values_len::<T>(values.len())?;
        self.region
            .bytes_mut(index, len)?
            .copy_from_slice(bytemuck::cast_slice(values));
        Ok(())
    }
}

fn values_len<T>(count: usize) -> Result<usize> {
    count
        .checked_mul(size_of::<T>())
        .ok_or_else(|| Error::invalid_arg("count", format!("{count} values overflow usize")))
}

impl Deref for NativeBuffer {
    type Target = MemoryRegion;

    fn deref(&self) -> &MemoryRegion {
        &self.region
    }
}

impl DerefMut for NativeBuffer {
    fn deref_mut(&mut self) -> &mut MemoryRegion {
        &mut self.region
    }
}

impl From<MemoryRegion> for NativeBuffer {
    fn from(region: MemoryRegion) -> Self {
        NativeBuffer::from_region(region)
    }
}

impl std::fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("region", &self.region)
            .field("order", &self.order)
            .finish()
    }
}
