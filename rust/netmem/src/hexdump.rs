use std::fmt::Write as _;

use netmem_common::Result;

use crate::region::MemoryRegion;

const BYTES_PER_ROW: usize = 16;

impl MemoryRegion {
    /// Formats the first `len` bytes (clamped to the region size) as a classic hex dump:
    /// one row per 16 bytes with the offset, the hex values and their printable ASCII
    /// rendering.
    ///
    /// ```
    /// # use netmem::{MemoryContext, MemoryRegion, config::MemoryConfig};
    /// let context = MemoryContext::new(MemoryConfig::default());
    /// let region = MemoryRegion::from_slice_in(&context, b"Hi!\n").unwrap();
    /// assert_eq!(region.hexdump(100).unwrap(), "0000: 48 69 21 0a  Hi!.\n");
    /// ```
    pub fn hexdump(&self, len: usize) -> Result<String> {
        let len = len.min(self.size()?);
        let bytes = self.bytes(0, len)?;
        let mut out = String::new();
        for (row, chunk) in bytes.chunks(BYTES_PER_ROW).enumerate() {
            let _ = write!(out, "{:04x}:", row * BYTES_PER_ROW);
            for (i, b) in chunk.iter().enumerate() {
                if i == BYTES_PER_ROW / 2 {
                    out.push(' ');
                }
                let _ = write!(out, " {b:02x}");
            }
            out.push_str("  ");
            out.extend(chunk.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    char::from(b)
                } else {
                    '.'
                }
            }));
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::{config::MemoryConfig, context::MemoryContext, region::MemoryRegion};

    #[test]
    fn test_hexdump_rows() {
        let context = MemoryContext::new(MemoryConfig::default());
        let bytes: Vec<u8> = (0x41..0x41 + 18).collect();
        let region = MemoryRegion::from_slice_in(&context, &bytes).unwrap();
        let dump = region.hexdump(usize::MAX).unwrap();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "0000: 41 42 43 44 45 46 47 48  49 4a 4b 4c 4d 4e 4f 50  ABCDEFGHIJKLMNOP"
        );
        assert_eq!(lines[1], "0010: 51 52  QR");
    }

    #[test]
    fn test_hexdump_limits() {
        let context = MemoryContext::new(MemoryConfig::default());
        let region = MemoryRegion::allocate_in(&context, 4).unwrap();
        assert_eq!(region.hexdump(0).unwrap(), "");
        assert_eq!(region.hexdump(2).unwrap(), "0000: 00 00  ..\n");
        assert!(MemoryRegion::new().hexdump(1).unwrap_err().is_invalid_state());
    }
}
