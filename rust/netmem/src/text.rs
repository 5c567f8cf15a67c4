//! Single-byte text scanning over a [`NativeBuffer`].
//!
//! Characters are synthesized one per byte (ISO-8859-1). Delimiter searches compare the
//! delimiter at every start offset and report the first occurrence. `find_delimited` also
//! gives up at control characters other than tab, carriage return and line feed, which
//! never occur in the text-based protocol headers it is used to measure.

use netmem_common::{Error, Result, result::check_range};

use crate::buffer::NativeBuffer;

fn is_text(c: u8) -> bool {
    !c.is_ascii_control() || matches!(c, b'\t' | b'\r' | b'\n')
}

impl NativeBuffer {
    /// Reads the byte at `index` as a character.
    pub fn get_char(&self, index: usize) -> Result<char> {
        self.get_u8(index).map(char::from)
    }

    /// Searches forward from `index` for `delimiter`.
    ///
    /// Returns the number of bytes from `index` up to and including the end of the first
    /// match, or 0 if the scan reaches the end of the buffer or a non-text byte first.
    pub fn find_delimited(&self, index: usize, delimiter: &[u8]) -> Result<usize> {
        check_delimiter(delimiter)?;
        let bytes = self.remaining(index)?;
        let text_len = bytes.iter().position(|&c| !is_text(c)).unwrap_or(bytes.len());
        Ok(match_end(&bytes[..text_len], delimiter).unwrap_or(0))
    }

    /// Reads characters from `index` up to and including `delimiter`, stopping earlier at
    /// the end of the buffer or after `max_len` characters.
    pub fn read_until_delimiter(
        &self,
        index: usize,
        delimiter: &[u8],
        max_len: usize,
    ) -> Result<String> {
        check_delimiter(delimiter)?;
        let bytes = self.remaining(index)?;
        let window = &bytes[..max_len.min(bytes.len())];
        let end = match_end(window, delimiter).unwrap_or(window.len());
        Ok(window[..end].iter().copied().map(char::from).collect())
    }

    /// Reads up to `len` characters starting at `index`, clamped to the end of the
    /// buffer.
    pub fn read_string(&self, index: usize, len: usize) -> Result<String> {
        let bytes = self.remaining(index)?;
        Ok(bytes.iter().take(len).copied().map(char::from).collect())
    }

    fn remaining(&self, index: usize) -> Result<&[u8]> {
        let size = self.size()?;
        check_range(index, 0, size)?;
        self.bytes(index, size - index)
    }
}

fn check_delimiter(delimiter: &[u8]) -> Result<()> {
    if delimiter.is_empty() {
        return Err(Error::invalid_arg("delimiter", "must not be empty"));
    }
    Ok(())
}

/// End offset of the first occurrence of `delimiter` in `haystack`.
fn match_end(haystack: &[u8], delimiter: &[u8]) -> Option<usize> {
    haystack
        .windows(delimiter.len())
        .position(|w| w == delimiter)
        .map(|start| start + delimiter.len())
}
