// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS `SequenceNumberSet` and `FragmentNumberSet` (DDS-RTPS v2.5
//! Sec.9.4.2.6, Sec.9.4.2.8)
//!
//! A base number plus up to 256 bits. Bit `o` (offset from the base) lives in
//! word `o / 32` under mask `1 << (31 - o % 32)`. The two sets differ only in
//! the width of the base (i64 sequence number vs u32 fragment number).

use super::cursor::{WireReader, WireWriter};
use super::{ProtocolError, ProtocolResult};

/// Maximum number of bits in a set.
pub const MAX_SET_BITS: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumberSet {
    base: i64,
    num_bits: u32,
    bitmap: [u32; 8],
}

impl SequenceNumberSet {
    /// Empty set anchored at `base`.
    pub fn new(base: i64) -> Self {
        Self {
            base,
            num_bits: 0,
            bitmap: [0; 8],
        }
    }

    /// Build from a sorted or unsorted iterator; out-of-window values are skipped.
    pub fn from_sequences(base: i64, seqs: impl IntoIterator<Item = i64>) -> Self {
        let mut set = Self::new(base);
        for seq in seqs {
            set.insert(seq);
        }
        set
    }

    pub fn base(&self) -> i64 {
        self.base
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Add `seq`; returns false if it falls outside `[base, base + 256)`.
    pub fn insert(&mut self, seq: i64) -> bool {
        let Some(offset) = self.offset_of(seq) else {
            return false;
        };
        self.bitmap[(offset / 32) as usize] |= 1 << (31 - offset % 32);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    pub fn contains(&self, seq: i64) -> bool {
        match self.offset_of(seq) {
            Some(offset) if offset < self.num_bits => {
                self.bitmap[(offset / 32) as usize] & (1 << (31 - offset % 32)) != 0
            }
            _ => false,
        }
    }

    /// Whether `seq` fits in the 256-bit window.
    pub fn in_window(&self, seq: i64) -> bool {
        self.offset_of(seq).is_some()
    }

    fn offset_of(&self, seq: i64) -> Option<u32> {
        let offset = seq.checked_sub(self.base)?;
        if (0..i64::from(MAX_SET_BITS)).contains(&offset) {
            Some(offset as u32)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Set members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.num_bits)
            .filter(move |o| self.bitmap[(o / 32) as usize] & (1 << (31 - o % 32)) != 0)
            .map(move |o| self.base + i64::from(o))
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.write_sequence_number(self.base);
        w.write_u32(self.num_bits);
        for word in &self.bitmap[..self.num_bits.div_ceil(32) as usize] {
            w.write_u32(*word);
        }
    }

    pub fn decode(r: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let base = r.read_sequence_number()?;
        let num_bits = r.read_u32()?;
        if num_bits > MAX_SET_BITS {
            return Err(ProtocolError::InvalidSubmessage("SequenceNumberSet numBits > 256"));
        }
        if base < 1 {
            return Err(ProtocolError::InvalidSubmessage("SequenceNumberSet base < 1"));
        }
        let mut bitmap = [0u32; 8];
        for word in bitmap.iter_mut().take(num_bits.div_ceil(32) as usize) {
            *word = r.read_u32()?;
        }
        // Bits past num_bits in the last word are not members.
        if num_bits % 32 != 0 {
            let last = (num_bits / 32) as usize;
            bitmap[last] &= !(u32::MAX >> (num_bits % 32));
        }
        Ok(Self {
            base,
            num_bits,
            bitmap,
        })
    }
}

/// Set of fragment numbers (1-based) requested by a NACK_FRAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentNumberSet {
    base: u32,
    num_bits: u32,
    bitmap: [u32; 8],
}

impl FragmentNumberSet {
    pub fn new(base: u32) -> Self {
        Self {
            base,
            num_bits: 0,
            bitmap: [0; 8],
        }
    }

    /// Build from fragment numbers; out-of-window values are skipped.
    pub fn from_fragments(base: u32, fragments: impl IntoIterator<Item = u32>) -> Self {
        let mut set = Self::new(base);
        for fragment in fragments {
            set.insert(fragment);
        }
        set
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Add `fragment`; returns false if it falls outside `[base, base + 256)`.
    pub fn insert(&mut self, fragment: u32) -> bool {
        let Some(offset) = fragment.checked_sub(self.base).filter(|o| *o < MAX_SET_BITS) else {
            return false;
        };
        self.bitmap[(offset / 32) as usize] |= 1 << (31 - offset % 32);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.num_bits)
            .filter(move |o| self.bitmap[(o / 32) as usize] & (1 << (31 - o % 32)) != 0)
            .map(move |o| self.base + o)
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.write_u32(self.base);
        w.write_u32(self.num_bits);
        for word in &self.bitmap[..self.num_bits.div_ceil(32) as usize] {
            w.write_u32(*word);
        }
    }

    pub fn decode(r: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let base = r.read_u32()?;
        let num_bits = r.read_u32()?;
        if num_bits > MAX_SET_BITS {
            return Err(ProtocolError::InvalidSubmessage("FragmentNumberSet numBits > 256"));
        }
        if base < 1 {
            return Err(ProtocolError::InvalidSubmessage("FragmentNumberSet base < 1"));
        }
        let mut bitmap = [0u32; 8];
        for word in bitmap.iter_mut().take(num_bits.div_ceil(32) as usize) {
            *word = r.read_u32()?;
        }
        if num_bits % 32 != 0 {
            let last = (num_bits / 32) as usize;
            bitmap[last] &= !(u32::MAX >> (num_bits % 32));
        }
        Ok(Self {
            base,
            num_bits,
            bitmap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout() {
        let set = SequenceNumberSet::from_sequences(10, [10, 41, 42]);
        assert_eq!(set.num_bits(), 33);
        assert_eq!(set.bitmap[0], 0x8000_0001);
        assert_eq!(set.bitmap[1], 0x8000_0000);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![10, 41, 42]);
    }

    #[test]
    fn test_window_bounds() {
        let mut set = SequenceNumberSet::new(1);
        assert!(set.insert(256));
        assert!(!set.insert(257));
        assert!(!set.insert(0));
        assert!(set.contains(256));
        assert_eq!(set.num_bits(), 256);
    }

    #[test]
    fn test_empty_set_encodes_without_words() {
        let set = SequenceNumberSet::new(5);
        let mut w = WireWriter::new();
        set.encode(&mut w);
        assert_eq!(w.len(), 12);
        let data = w.into_inner();
        let back = SequenceNumberSet::decode(&mut WireReader::new(&data)).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.base(), 5);
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let mut w = WireWriter::new();
        w.write_sequence_number(1);
        w.write_u32(300);
        let data = w.into_inner();
        assert!(SequenceNumberSet::decode(&mut WireReader::new(&data)).is_err());
    }

    #[test]
    fn test_decode_masks_trailing_bits() {
        let mut w = WireWriter::new();
        w.write_sequence_number(1);
        w.write_u32(2);
        w.write_u32(0xFFFF_FFFF);
        let data = w.into_inner();
        let set = SequenceNumberSet::decode(&mut WireReader::new(&data)).unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_fragment_set_layout_and_decode() {
        let set = FragmentNumberSet::from_fragments(3, [3, 5, 40, 400]);
        assert_eq!(set.num_bits(), 38);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 5, 40]);

        let mut w = WireWriter::new();
        set.encode(&mut w);
        assert_eq!(w.len(), 8 + 2 * 4);
        let data = w.into_inner();
        let back = FragmentNumberSet::decode(&mut WireReader::new(&data)).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_fragment_set_rejects_zero_base() {
        let mut w = WireWriter::new();
        w.write_u32(0);
        w.write_u32(0);
        let data = w.into_inner();
        assert!(FragmentNumberSet::decode(&mut WireReader::new(&data)).is_err());
    }
}
