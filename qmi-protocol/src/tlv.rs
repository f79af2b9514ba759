//! Typed TLV reading. Writing lives on `Message` directly since every
//! write needs to touch the enclosing message's length fields; reading
//! only needs a byte slice, so it gets its own small cursor type.

use crate::error::{Error, Result};

/// Endianness selector for multi-byte TLV fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A length-prefix convention for TLV-embedded strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPrefix {
    /// No prefix; the string consumes the remainder of the TLV.
    None,
    /// A one-byte length prefix.
    U8,
    /// A two-byte little-endian length prefix.
    U16,
}

/// A read cursor over a single TLV's value bytes. Every read is bounds
/// checked against the remaining slice; a short read yields
/// `Error::TlvOverflow` and leaves the cursor position exactly where it
/// was (the caller cannot observe a partially-advanced read).
pub struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        TlvReader { data, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::TlvOverflow)?;
        if end > self.data.len() {
            return Err(Error::TlvOverflow);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self, endian: Endian) -> Result<u16> {
        let b = self.take(2)?;
        Ok(match endian {
            Endian::Little => u16::from_le_bytes([b[0], b[1]]),
            Endian::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    pub fn read_i16(&mut self, endian: Endian) -> Result<i16> {
        Ok(self.read_u16(endian)? as i16)
    }

    pub fn read_u32(&mut self, endian: Endian) -> Result<u32> {
        let b = self.take(4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Ok(match endian {
            Endian::Little => u32::from_le_bytes(arr),
            Endian::Big => u32::from_be_bytes(arr),
        })
    }

    pub fn read_i32(&mut self, endian: Endian) -> Result<i32> {
        Ok(self.read_u32(endian)? as i32)
    }

    pub fn read_u64(&mut self, endian: Endian) -> Result<u64> {
        let b = self.take(8)?;
        let arr = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        Ok(match endian {
            Endian::Little => u64::from_le_bytes(arr),
            Endian::Big => u64::from_be_bytes(arr),
        })
    }

    pub fn read_i64(&mut self, endian: Endian) -> Result<i64> {
        Ok(self.read_u64(endian)? as i64)
    }

    /// Reads an arbitrary-width (1..=8 byte) unsigned integer, as used by
    /// several QMI TLVs that pack sub-byte-aligned counters.
    pub fn read_sized_uint(&mut self, n_bytes: u8, endian: Endian) -> Result<u64> {
        if !(1..=8).contains(&n_bytes) {
            return Err(Error::InvalidArgument(format!(
                "sized_uint width {n_bytes} out of range 1..=8"
            )));
        }
        let b = self.take(n_bytes as usize)?;
        let mut buf = [0u8; 8];
        match endian {
            Endian::Little => buf[..b.len()].copy_from_slice(b),
            Endian::Big => buf[8 - b.len()..].copy_from_slice(b),
        }
        Ok(match endian {
            Endian::Little => u64::from_le_bytes(buf),
            Endian::Big => u64::from_be_bytes(buf),
        })
    }

    /// Reads a string per the given length-prefix convention. A
    /// `StringPrefix::None` fixed-size string consumes whatever remains
    /// in the TLV; a prefixed string of length zero yields `""`.
    pub fn read_string(&mut self, prefix: StringPrefix) -> Result<String> {
        let start = self.pos;
        let result = match prefix {
            StringPrefix::None => {
                let rest = self.remaining();
                self.pos = self.data.len();
                Ok(rest)
            }
            StringPrefix::U8 => self.read_u8().and_then(|len| self.take(len as usize)),
            StringPrefix::U16 => self.read_u16(Endian::Little).and_then(|len| self.take(len as usize)),
        };
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::InvalidArgument(format!("TLV string is not valid UTF-8: {e}")))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }
}
