// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked read/write cursors for RTPS wire buffers.
//!
//! Readers honor the submessage endianness flag; writers always emit
//! little-endian.

use super::{ProtocolError, ProtocolResult};

/// Generate endian-aware read methods for primitive types.
macro_rules! impl_read {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> ProtocolResult<$type> {
            let raw = self.read_array::<{ $size }>()?;
            Ok(if self.little_endian {
                <$type>::from_le_bytes(raw)
            } else {
                <$type>::from_be_bytes(raw)
            })
        }
    };
}

/// Generate little-endian write methods for primitive types.
macro_rules! impl_write_le {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) {
            self.buffer.extend_from_slice(&value.to_le_bytes());
        }
    };
}

/// Read cursor over a borrowed buffer.
pub struct WireReader<'a> {
    buffer: &'a [u8],
    offset: usize,
    little_endian: bool,
}

impl<'a> WireReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            offset: 0,
            little_endian: true,
        }
    }

    pub fn with_endianness(buffer: &'a [u8], little_endian: bool) -> Self {
        Self {
            buffer,
            offset: 0,
            little_endian,
        }
    }

    impl_read!(read_u16, u16, 2);
    impl_read!(read_u32, u32, 4);
    impl_read!(read_i32, i32, 4);
    impl_read!(read_u64, u64, 8);

    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// RTPS `SequenceNumber_t`: high `i32` then low `u32`.
    pub fn read_sequence_number(&mut self) -> ProtocolResult<i64> {
        let high = self.read_i32()?;
        let low = self.read_u32()?;
        Ok((i64::from(high) << 32) | i64::from(low))
    }

    pub fn read_array<const N: usize>(&mut self) -> ProtocolResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_bytes(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                offset: self.offset,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> ProtocolResult<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Advance to the next multiple of `alignment` (relative to the buffer start).
    pub fn align(&mut self, alignment: usize) -> ProtocolResult<()> {
        if alignment <= 1 {
            return Ok(());
        }
        let padded = self.offset.div_ceil(alignment) * alignment;
        self.skip(padded - self.offset)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buffer[self.offset.min(self.buffer.len())..]
    }
}

/// Growable little-endian write cursor.
#[derive(Default)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    impl_write_le!(write_u16, u16);
    impl_write_le!(write_u32, u32);
    impl_write_le!(write_i32, i32);
    impl_write_le!(write_u64, u64);

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_sequence_number(&mut self, seq: i64) {
        self.write_i32((seq >> 32) as i32);
        self.write_u32(seq as u32);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Zero-pad to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        if alignment <= 1 {
            return;
        }
        let padded = self.buffer.len().div_ceil(alignment) * alignment;
        self.buffer.resize(padded, 0);
    }

    /// Overwrite a previously reserved little-endian `u16`.
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        if let Some(slot) = self.buffer.get_mut(offset..offset + 2) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Drop everything written after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.buffer.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_number_layout() {
        let mut w = WireWriter::new();
        w.write_sequence_number((3_i64 << 32) | 7);
        assert_eq!(w.as_slice(), &[3, 0, 0, 0, 7, 0, 0, 0]);
        let mut r = WireReader::new(w.as_slice());
        assert_eq!(r.read_sequence_number().unwrap(), (3_i64 << 32) | 7);
    }

    #[test]
    fn test_big_endian_read() {
        let bytes = [0x00, 0x00, 0x01, 0x02];
        let mut r = WireReader::with_endianness(&bytes, false);
        assert_eq!(r.read_u32().unwrap(), 0x0102);
    }

    #[test]
    fn test_truncated_reports_offset() {
        let bytes = [1u8, 2];
        let mut r = WireReader::new(&bytes);
        r.read_u8().unwrap();
        let err = r.read_u32().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                offset: 1,
                needed: 4,
                available: 1
            }
        );
    }

    #[test]
    fn test_align_and_patch() {
        let mut w = WireWriter::new();
        w.write_u8(1);
        w.align(4);
        assert_eq!(w.len(), 4);
        w.write_u16(0);
        w.patch_u16(4, 0xBEEF);
        assert_eq!(&w.as_slice()[4..6], &[0xEF, 0xBE]);

        let data = w.into_inner();
        let mut r = WireReader::new(&data);
        r.read_u8().unwrap();
        r.align(4).unwrap();
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
    }
}
