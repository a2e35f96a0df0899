//! Bounds-checked primitive reads at an explicit byte order
//!
//! A single capture mixes the console's native big-endian structures with
//! little-endian payloads carried over from PC source assets, so byte order
//! is always a parameter and never ambient state.

use byteorder::{ByteOrder as _, BE, LE};
use serde::{Deserialize, Serialize};

use crate::signature::FormId;

/// Byte order of a record, runtime struct or payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn opposite(self) -> Self {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        }
    }
}

/// A read that did not fit the slice it was made against
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Read of {width} bytes at offset {offset:#x} exceeds {available} available bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        available: usize,
    },

    #[error("No string terminator within {searched} bytes at offset {offset:#x}")]
    Unterminated { offset: usize, searched: usize },
}

/// Borrow `width` bytes at `offset`, or report the overrun
#[inline]
pub fn read_bytes(buffer: &[u8], offset: usize, width: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(width)
        .and_then(|end| buffer.get(offset..end))
        .ok_or(DecodeError::OutOfBounds {
            offset,
            width,
            available: buffer.len(),
        })
}

#[inline]
pub fn read_u8(buffer: &[u8], offset: usize) -> Result<u8, DecodeError> {
    Ok(read_bytes(buffer, offset, 1)?[0])
}

#[inline]
pub fn read_i8(buffer: &[u8], offset: usize) -> Result<i8, DecodeError> {
    Ok(read_u8(buffer, offset)? as i8)
}

#[inline]
pub fn read_u16(buffer: &[u8], offset: usize, order: ByteOrder) -> Result<u16, DecodeError> {
    let bytes = read_bytes(buffer, offset, 2)?;
    Ok(match order {
        ByteOrder::Little => LE::read_u16(bytes),
        ByteOrder::Big => BE::read_u16(bytes),
    })
}

#[inline]
pub fn read_i16(buffer: &[u8], offset: usize, order: ByteOrder) -> Result<i16, DecodeError> {
    Ok(read_u16(buffer, offset, order)? as i16)
}

#[inline]
pub fn read_u32(buffer: &[u8], offset: usize, order: ByteOrder) -> Result<u32, DecodeError> {
    let bytes = read_bytes(buffer, offset, 4)?;
    Ok(match order {
        ByteOrder::Little => LE::read_u32(bytes),
        ByteOrder::Big => BE::read_u32(bytes),
    })
}

#[inline]
pub fn read_i32(buffer: &[u8], offset: usize, order: ByteOrder) -> Result<i32, DecodeError> {
    Ok(read_u32(buffer, offset, order)? as i32)
}

#[inline]
pub fn read_u64(buffer: &[u8], offset: usize, order: ByteOrder) -> Result<u64, DecodeError> {
    let bytes = read_bytes(buffer, offset, 8)?;
    Ok(match order {
        ByteOrder::Little => LE::read_u64(bytes),
        ByteOrder::Big => BE::read_u64(bytes),
    })
}

#[inline]
pub fn read_f32(buffer: &[u8], offset: usize, order: ByteOrder) -> Result<f32, DecodeError> {
    Ok(f32::from_bits(read_u32(buffer, offset, order)?))
}

/// Read a fixed-width string, cut at the first NUL
///
/// Strings are byte sequences, so no byte order applies. Invalid UTF-8 is
/// replaced rather than rejected; plugin text is mostly single-byte codepage.
pub fn read_fixed_string(buffer: &[u8], offset: usize, width: usize) -> Result<String, DecodeError> {
    let bytes = read_bytes(buffer, offset, width)?;
    let end = memchr::memchr(0, bytes).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Read a NUL-terminated string of at most `max_len` bytes (terminator excluded)
pub fn read_null_terminated(
    buffer: &[u8],
    offset: usize,
    max_len: usize,
) -> Result<String, DecodeError> {
    if offset >= buffer.len() {
        return Err(DecodeError::OutOfBounds {
            offset,
            width: 1,
            available: buffer.len(),
        });
    }
    let window_end = offset.saturating_add(max_len + 1).min(buffer.len());
    let window = &buffer[offset..window_end];
    match memchr::memchr(0, window) {
        Some(end) => Ok(String::from_utf8_lossy(&window[..end]).into_owned()),
        None => Err(DecodeError::Unterminated {
            offset,
            searched: window.len(),
        }),
    }
}

/// Sequential reader over a payload, holding one byte order for its lifetime
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            data,
            pos: 0,
            order,
        }
    }

    pub fn at(data: &'a [u8], pos: usize, order: ByteOrder) -> Self {
        Self { data, pos, order }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        read_bytes(self.data, self.pos, n)?;
        self.pos += n;
        Ok(())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = read_bytes(self.data, self.pos, n)?;
        self.pos += n;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        let v = read_u8(self.data, self.pos)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        let v = read_u16(self.data, self.pos, self.order)?;
        self.pos += 2;
        Ok(v)
    }

    pub fn i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        let v = read_u32(self.data, self.pos, self.order)?;
        self.pos += 4;
        Ok(v)
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.u32()? as i32)
    }

    pub fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn form_id(&mut self) -> Result<FormId, DecodeError> {
        Ok(FormId(self.u32()?))
    }

    pub fn fixed_string(&mut self, width: usize) -> Result<String, DecodeError> {
        let s = read_fixed_string(self.data, self.pos, width)?;
        self.pos += width;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_both_orders() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_u32(&data, 0, ByteOrder::Little).unwrap(), 0x0403_0201);
        assert_eq!(read_u32(&data, 0, ByteOrder::Big).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_read_f32_big_endian() {
        let data = 1.5f32.to_be_bytes();
        assert_eq!(read_f32(&data, 0, ByteOrder::Big).unwrap(), 1.5);
    }

    #[test]
    fn test_overrun_names_offset_and_width() {
        let data = [0u8; 6];
        let err = read_u32(&data, 4, ByteOrder::Little).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfBounds {
                offset: 4,
                width: 4,
                available: 6
            }
        );
    }

    #[test]
    fn test_overrun_near_usize_max() {
        let data = [0u8; 4];
        assert!(read_u32(&data, usize::MAX - 1, ByteOrder::Big).is_err());
    }

    #[test]
    fn test_fixed_string_cuts_at_nul() {
        let data = b"Race\0\0\0\0";
        assert_eq!(read_fixed_string(data, 0, 8).unwrap(), "Race");
    }

    #[test]
    fn test_null_terminated() {
        let data = b"Hello\0World\0";
        assert_eq!(read_null_terminated(data, 0, 64).unwrap(), "Hello");
        assert_eq!(read_null_terminated(data, 6, 64).unwrap(), "World");
    }

    #[test]
    fn test_null_terminated_unterminated() {
        let data = b"NoTerminator";
        assert!(matches!(
            read_null_terminated(data, 0, 64),
            Err(DecodeError::Unterminated { .. })
        ));
        assert!(matches!(
            read_null_terminated(b"abcdef\0", 0, 3),
            Err(DecodeError::Unterminated { searched: 4, .. })
        ));
    }

    #[test]
    fn test_reader_sequence() {
        let mut data = Vec::new();
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend_from_slice(&(-3i16).to_be_bytes());
        data.push(9);
        let mut r = Reader::new(&data, ByteOrder::Big);
        assert_eq!(r.u32().unwrap(), 7);
        assert_eq!(r.i16().unwrap(), -3);
        assert_eq!(r.u8().unwrap(), 9);
        assert!(r.is_empty());
        assert!(r.u8().is_err());
    }

    #[test]
    fn test_byte_order_opposite() {
        assert_eq!(ByteOrder::Little.opposite(), ByteOrder::Big);
        assert_eq!(ByteOrder::Big.opposite(), ByteOrder::Little);
    }
}
