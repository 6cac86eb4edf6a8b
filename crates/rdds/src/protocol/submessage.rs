// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS submessages (DDS-RTPS v2.5 Sec.8.3.7 / Sec.9.4.5)
//!
//! - ACKNACK (0x06): reader state (`base` + missing bitmap)
//! - HEARTBEAT (0x07): writer's available range `[first, last]`
//! - GAP (0x08): sequences that will never be sent
//! - INFO_TS (0x09): source timestamp for following submessages
//! - INFO_DST (0x0e): destination participant for following submessages
//! - NACK_FRAG (0x12): fragments of one sample the reader still misses
//! - DATA (0x15): one sample (or dispose/unregister notification)
//! - DATA_FRAG (0x16): a run of fragments of one large sample
//!
//! Encoding is always little-endian; decoding honors the E flag.

use crate::core::{EntityId, GuidPrefix, Time};

use super::cursor::{WireReader, WireWriter};
use super::parameter::{PID_KEY_HASH, PID_SENTINEL, PID_STATUS_INFO};
use super::seqset::{FragmentNumberSet, SequenceNumberSet};
use super::{ProtocolError, ProtocolResult};

pub const SUBMSG_PAD: u8 = 0x01;
pub const SUBMSG_ACKNACK: u8 = 0x06;
pub const SUBMSG_HEARTBEAT: u8 = 0x07;
pub const SUBMSG_GAP: u8 = 0x08;
pub const SUBMSG_INFO_TS: u8 = 0x09;
pub const SUBMSG_INFO_DST: u8 = 0x0e;
pub const SUBMSG_NACK_FRAG: u8 = 0x12;
pub const SUBMSG_DATA: u8 = 0x15;
pub const SUBMSG_DATA_FRAG: u8 = 0x16;

/// E: little-endian body.
pub const FLAG_ENDIANNESS: u8 = 0x01;
/// DATA Q: inline QoS present.
pub const FLAG_INLINE_QOS: u8 = 0x02;
/// DATA D: serialized data present.
pub const FLAG_DATA: u8 = 0x04;
/// DATA K: serialized key present.
pub const FLAG_KEY: u8 = 0x08;
/// HEARTBEAT / ACKNACK F: no response required.
pub const FLAG_FINAL: u8 = 0x02;
/// HEARTBEAT L: liveliness assertion.
pub const FLAG_LIVELINESS: u8 = 0x04;
/// INFO_TS I: timestamp invalidated.
pub const FLAG_INVALIDATE: u8 = 0x02;

/// STATUS_INFO bit: instance disposed.
pub const STATUS_INFO_DISPOSED: u32 = 0x0000_0001;
/// STATUS_INFO bit: instance unregistered.
pub const STATUS_INFO_UNREGISTERED: u32 = 0x0000_0002;

/// Inline QoS carried by DATA (only the parameters the engines consume).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineQos {
    pub key_hash: Option<[u8; 16]>,
    pub status_info: Option<u32>,
}

impl InlineQos {
    pub fn is_empty(&self) -> bool {
        self.key_hash.is_none() && self.status_info.is_none()
    }

    fn encode(&self, w: &mut WireWriter) {
        if let Some(hash) = &self.key_hash {
            w.write_u16(PID_KEY_HASH);
            w.write_u16(16);
            w.write_bytes(hash);
        }
        if let Some(status) = self.status_info {
            w.write_u16(PID_STATUS_INFO);
            w.write_u16(4);
            // STATUS_INFO is an octet array: flags live in the last byte.
            w.write_bytes(&status.to_be_bytes());
        }
        w.write_u16(PID_SENTINEL);
        w.write_u16(0);
    }

    fn decode(r: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let mut qos = InlineQos::default();
        loop {
            let pid = r.read_u16()?;
            let len = r.read_u16()? as usize;
            if pid == PID_SENTINEL {
                return Ok(qos);
            }
            let value = r.read_bytes(len)?;
            match pid & 0x3fff {
                PID_KEY_HASH if len >= 16 => {
                    let mut hash = [0u8; 16];
                    hash.copy_from_slice(&value[..16]);
                    qos.key_hash = Some(hash);
                }
                PID_STATUS_INFO if len >= 4 => {
                    qos.status_info = Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
                }
                _ => {}
            }
        }
    }
}

/// DATA submessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: i64,
    pub inline_qos: Option<InlineQos>,
    /// Serialized payload including its encapsulation header.
    pub serialized_payload: Option<Vec<u8>>,
    /// True when the payload is a serialized key (K flag) rather than data.
    pub key_only: bool,
}

/// DATA_FRAG submessage: fragments `[start, start + count)` of one sample.
///
/// Fragment numbers are 1-based; every fragment but the last one of the
/// sample is exactly `fragment_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: i64,
    pub fragment_starting_num: u32,
    pub fragments_in_submessage: u16,
    pub fragment_size: u16,
    pub sample_size: u32,
    pub inline_qos: Option<InlineQos>,
    pub fragments: Vec<u8>,
}

impl DataFrag {
    /// Number of fragments the whole sample is cut into.
    pub fn total_fragments(&self) -> u32 {
        self.sample_size.div_ceil(u32::from(self.fragment_size.max(1)))
    }

    /// Byte offset of the first fragment carried here.
    pub fn offset(&self) -> usize {
        (self.fragment_starting_num as usize - 1) * self.fragment_size as usize
    }

    /// Bytes the carried fragments must hold.
    fn expected_len(&self) -> usize {
        let run = self.fragments_in_submessage as usize * self.fragment_size as usize;
        run.min((self.sample_size as usize).saturating_sub(self.offset()))
    }
}

/// NACK_FRAG: fragments of `writer_sn` the reader has not received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: i64,
    pub fragment_number_state: FragmentNumberSet,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: i64,
    pub last_sn: i64,
    pub count: u32,
    pub final_flag: bool,
    pub liveliness_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckNack {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub reader_sn_state: SequenceNumberSet,
    pub count: u32,
    pub final_flag: bool,
}

/// GAP: `[gap_start, gap_list.base - 1]` plus every member of `gap_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: i64,
    pub gap_list: SequenceNumberSet,
}

impl Gap {
    /// All sequences this GAP declares irrelevant, ascending.
    pub fn sequences(&self) -> impl Iterator<Item = i64> + '_ {
        (self.gap_start..self.gap_list.base()).chain(self.gap_list.iter())
    }
}

/// Decoded submessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
    Data(Data),
    DataFrag(DataFrag),
    NackFrag(NackFrag),
    Heartbeat(Heartbeat),
    AckNack(AckNack),
    Gap(Gap),
    /// `None` when the I flag invalidates the timestamp.
    InfoTs(Option<Time>),
    InfoDst(GuidPrefix),
    /// Submessage we do not interpret (skipped by the receiver).
    Unknown { id: u8 },
}

impl Submessage {
    pub fn id(&self) -> u8 {
        match self {
            Submessage::Data(_) => SUBMSG_DATA,
            Submessage::DataFrag(_) => SUBMSG_DATA_FRAG,
            Submessage::NackFrag(_) => SUBMSG_NACK_FRAG,
            Submessage::Heartbeat(_) => SUBMSG_HEARTBEAT,
            Submessage::AckNack(_) => SUBMSG_ACKNACK,
            Submessage::Gap(_) => SUBMSG_GAP,
            Submessage::InfoTs(_) => SUBMSG_INFO_TS,
            Submessage::InfoDst(_) => SUBMSG_INFO_DST,
            Submessage::Unknown { id } => *id,
        }
    }

    /// Append this submessage (header included) to `w`.
    ///
    /// # Errors
    /// `TooLarge` when the body does not fit the 16-bit length field.
    pub fn encode(&self, w: &mut WireWriter) -> ProtocolResult<()> {
        let flags = FLAG_ENDIANNESS | self.flags();
        w.write_u8(self.id());
        w.write_u8(flags);
        let len_pos = w.len();
        w.write_u16(0);
        let body_start = w.len();

        match self {
            Submessage::Data(d) => {
                w.write_u16(0); // extraFlags
                w.write_u16(16); // octetsToInlineQos
                w.write_bytes(&d.reader_id.0);
                w.write_bytes(&d.writer_id.0);
                w.write_sequence_number(d.writer_sn);
                if let Some(qos) = d.inline_qos.as_ref().filter(|q| !q.is_empty()) {
                    qos.encode(w);
                }
                if let Some(payload) = &d.serialized_payload {
                    w.write_bytes(payload);
                    w.align(4);
                }
            }
            Submessage::DataFrag(df) => {
                w.write_u16(0); // extraFlags
                w.write_u16(28); // octetsToInlineQos
                w.write_bytes(&df.reader_id.0);
                w.write_bytes(&df.writer_id.0);
                w.write_sequence_number(df.writer_sn);
                w.write_u32(df.fragment_starting_num);
                w.write_u16(df.fragments_in_submessage);
                w.write_u16(df.fragment_size);
                w.write_u32(df.sample_size);
                if let Some(qos) = df.inline_qos.as_ref().filter(|q| !q.is_empty()) {
                    qos.encode(w);
                }
                w.write_bytes(&df.fragments);
                w.align(4);
            }
            Submessage::NackFrag(nf) => {
                w.write_bytes(&nf.reader_id.0);
                w.write_bytes(&nf.writer_id.0);
                w.write_sequence_number(nf.writer_sn);
                nf.fragment_number_state.encode(w);
                w.write_u32(nf.count);
            }
            Submessage::Heartbeat(hb) => {
                w.write_bytes(&hb.reader_id.0);
                w.write_bytes(&hb.writer_id.0);
                w.write_sequence_number(hb.first_sn);
                w.write_sequence_number(hb.last_sn);
                w.write_u32(hb.count);
            }
            Submessage::AckNack(ack) => {
                w.write_bytes(&ack.reader_id.0);
                w.write_bytes(&ack.writer_id.0);
                ack.reader_sn_state.encode(w);
                w.write_u32(ack.count);
            }
            Submessage::Gap(gap) => {
                w.write_bytes(&gap.reader_id.0);
                w.write_bytes(&gap.writer_id.0);
                w.write_sequence_number(gap.gap_start);
                gap.gap_list.encode(w);
            }
            Submessage::InfoTs(ts) => {
                if let Some(ts) = ts {
                    w.write_i32(ts.seconds);
                    w.write_u32(ts.fraction);
                }
            }
            Submessage::InfoDst(prefix) => w.write_bytes(&prefix.0),
            Submessage::Unknown { .. } => {}
        }

        let body_len = w.len() - body_start;
        let body_len = u16::try_from(body_len).map_err(|_| ProtocolError::TooLarge(body_len))?;
        w.patch_u16(len_pos, body_len);
        Ok(())
    }

    fn flags(&self) -> u8 {
        match self {
            Submessage::Data(d) => {
                let mut flags = 0;
                if d.inline_qos.as_ref().is_some_and(|q| !q.is_empty()) {
                    flags |= FLAG_INLINE_QOS;
                }
                if d.serialized_payload.is_some() {
                    flags |= if d.key_only { FLAG_KEY } else { FLAG_DATA };
                }
                flags
            }
            Submessage::DataFrag(df) if df.inline_qos.as_ref().is_some_and(|q| !q.is_empty()) => {
                FLAG_INLINE_QOS
            }
            Submessage::Heartbeat(hb) => {
                let mut flags = 0;
                if hb.final_flag {
                    flags |= FLAG_FINAL;
                }
                if hb.liveliness_flag {
                    flags |= FLAG_LIVELINESS;
                }
                flags
            }
            Submessage::AckNack(ack) if ack.final_flag => FLAG_FINAL,
            Submessage::InfoTs(None) => FLAG_INVALIDATE,
            _ => 0,
        }
    }

    /// Decode one submessage body.
    pub fn decode(id: u8, flags: u8, body: &[u8]) -> ProtocolResult<Self> {
        let mut r = WireReader::with_endianness(body, flags & FLAG_ENDIANNESS != 0);
        let msg = match id {
            SUBMSG_DATA => {
                let _extra_flags = r.read_u16()?;
                let octets_to_qos = r.read_u16()? as usize;
                let reader_id = EntityId(r.read_array()?);
                let writer_id = EntityId(r.read_array()?);
                let writer_sn = r.read_sequence_number()?;
                if octets_to_qos < 16 {
                    return Err(ProtocolError::InvalidSubmessage("DATA octetsToInlineQos < 16"));
                }
                r.skip(octets_to_qos - 16)?;
                let inline_qos = if flags & FLAG_INLINE_QOS != 0 {
                    Some(InlineQos::decode(&mut r)?)
                } else {
                    None
                };
                let has_payload = flags & (FLAG_DATA | FLAG_KEY) != 0;
                let serialized_payload = has_payload.then(|| r.rest().to_vec());
                if writer_sn < 1 {
                    return Err(ProtocolError::InvalidSubmessage("DATA writerSN < 1"));
                }
                Submessage::Data(Data {
                    reader_id,
                    writer_id,
                    writer_sn,
                    inline_qos,
                    serialized_payload,
                    key_only: flags & FLAG_KEY != 0 && flags & FLAG_DATA == 0,
                })
            }
            SUBMSG_DATA_FRAG => {
                let _extra_flags = r.read_u16()?;
                let octets_to_qos = r.read_u16()? as usize;
                let reader_id = EntityId(r.read_array()?);
                let writer_id = EntityId(r.read_array()?);
                let writer_sn = r.read_sequence_number()?;
                let fragment_starting_num = r.read_u32()?;
                let fragments_in_submessage = r.read_u16()?;
                let fragment_size = r.read_u16()?;
                let sample_size = r.read_u32()?;
                if octets_to_qos < 28 {
                    return Err(ProtocolError::InvalidSubmessage("DATA_FRAG octetsToInlineQos < 28"));
                }
                r.skip(octets_to_qos - 28)?;
                let inline_qos = if flags & FLAG_INLINE_QOS != 0 {
                    Some(InlineQos::decode(&mut r)?)
                } else {
                    None
                };
                let mut df = DataFrag {
                    reader_id,
                    writer_id,
                    writer_sn,
                    fragment_starting_num,
                    fragments_in_submessage,
                    fragment_size,
                    sample_size,
                    inline_qos,
                    fragments: Vec::new(),
                };
                if writer_sn < 1
                    || fragment_starting_num < 1
                    || fragments_in_submessage == 0
                    || fragment_size == 0
                    || sample_size == 0
                    || fragment_starting_num > df.total_fragments()
                {
                    return Err(ProtocolError::InvalidSubmessage("DATA_FRAG fragment range"));
                }
                // Drop the alignment padding after the last fragment.
                let rest = r.rest();
                let expected = df.expected_len();
                if rest.len() < expected {
                    return Err(ProtocolError::InvalidSubmessage("DATA_FRAG truncated"));
                }
                df.fragments = rest[..expected].to_vec();
                Submessage::DataFrag(df)
            }
            SUBMSG_NACK_FRAG => {
                let nf = NackFrag {
                    reader_id: EntityId(r.read_array()?),
                    writer_id: EntityId(r.read_array()?),
                    writer_sn: r.read_sequence_number()?,
                    fragment_number_state: FragmentNumberSet::decode(&mut r)?,
                    count: r.read_u32()?,
                };
                if nf.writer_sn < 1 {
                    return Err(ProtocolError::InvalidSubmessage("NACK_FRAG writerSN < 1"));
                }
                Submessage::NackFrag(nf)
            }
            SUBMSG_HEARTBEAT => {
                let hb = Heartbeat {
                    reader_id: EntityId(r.read_array()?),
                    writer_id: EntityId(r.read_array()?),
                    first_sn: r.read_sequence_number()?,
                    last_sn: r.read_sequence_number()?,
                    count: r.read_u32()?,
                    final_flag: flags & FLAG_FINAL != 0,
                    liveliness_flag: flags & FLAG_LIVELINESS != 0,
                };
                if hb.first_sn < 1 || hb.last_sn < hb.first_sn - 1 {
                    return Err(ProtocolError::InvalidSubmessage("HEARTBEAT range"));
                }
                Submessage::Heartbeat(hb)
            }
            SUBMSG_ACKNACK => Submessage::AckNack(AckNack {
                reader_id: EntityId(r.read_array()?),
                writer_id: EntityId(r.read_array()?),
                reader_sn_state: SequenceNumberSet::decode(&mut r)?,
                count: r.read_u32()?,
                final_flag: flags & FLAG_FINAL != 0,
            }),
            SUBMSG_GAP => {
                let gap = Gap {
                    reader_id: EntityId(r.read_array()?),
                    writer_id: EntityId(r.read_array()?),
                    gap_start: r.read_sequence_number()?,
                    gap_list: SequenceNumberSet::decode(&mut r)?,
                };
                if gap.gap_start < 1 || gap.gap_list.base() < gap.gap_start {
                    return Err(ProtocolError::InvalidSubmessage("GAP range"));
                }
                Submessage::Gap(gap)
            }
            SUBMSG_INFO_TS => {
                if flags & FLAG_INVALIDATE != 0 {
                    Submessage::InfoTs(None)
                } else {
                    let seconds = r.read_i32()?;
                    let fraction = r.read_u32()?;
                    Submessage::InfoTs(Some(Time { seconds, fraction }))
                }
            }
            SUBMSG_INFO_DST => Submessage::InfoDst(GuidPrefix(r.read_array()?)),
            other => Submessage::Unknown { id: other },
        };
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Submessage) -> Submessage {
        let mut w = WireWriter::new();
        msg.encode(&mut w).unwrap();
        let bytes = w.into_inner();
        let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
        assert_eq!(len % 4, 0, "submessage body must stay 4-aligned");
        Submessage::decode(bytes[0], bytes[1], &bytes[4..]).unwrap()
    }

    #[test]
    fn test_data_with_inline_qos() {
        let msg = Submessage::Data(Data {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user_writer(1, true),
            writer_sn: 42,
            inline_qos: Some(InlineQos {
                key_hash: Some([7; 16]),
                status_info: Some(STATUS_INFO_DISPOSED | STATUS_INFO_UNREGISTERED),
            }),
            serialized_payload: None,
            key_only: false,
        });
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn test_data_flags() {
        let msg = Submessage::Data(Data {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user_writer(1, false),
            writer_sn: 1,
            inline_qos: None,
            serialized_payload: Some(vec![0, 1, 0, 0, 1, 2, 3, 4]),
            key_only: false,
        });
        let mut w = WireWriter::new();
        msg.encode(&mut w).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes[0], SUBMSG_DATA);
        assert_eq!(bytes[1], FLAG_ENDIANNESS | FLAG_DATA);
    }

    #[test]
    fn test_heartbeat_flags_and_validation() {
        let hb = Heartbeat {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user_writer(3, false),
            first_sn: 6,
            last_sn: 5,
            count: 9,
            final_flag: true,
            liveliness_flag: true,
        };
        assert_eq!(roundtrip(&Submessage::Heartbeat(hb)), Submessage::Heartbeat(hb));

        let bad = Heartbeat { first_sn: 0, ..hb };
        let mut w = WireWriter::new();
        Submessage::Heartbeat(bad).encode(&mut w).unwrap();
        let bytes = w.into_inner();
        assert!(Submessage::decode(bytes[0], bytes[1], &bytes[4..]).is_err());
    }

    #[test]
    fn test_gap_sequences() {
        let gap = Gap {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user_writer(1, false),
            gap_start: 3,
            gap_list: SequenceNumberSet::from_sequences(5, [7]),
        };
        assert_eq!(gap.sequences().collect::<Vec<_>>(), vec![3, 4, 7]);
        assert_eq!(roundtrip(&Submessage::Gap(gap)), Submessage::Gap(gap));
    }

    fn frag(start: u32, count: u16, sample_size: u32) -> DataFrag {
        let fragment_size = 8u16;
        let offset = (start as usize - 1) * fragment_size as usize;
        let len = (count as usize * fragment_size as usize).min(sample_size as usize - offset);
        DataFrag {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user_writer(2, true),
            writer_sn: 4,
            fragment_starting_num: start,
            fragments_in_submessage: count,
            fragment_size,
            sample_size,
            inline_qos: None,
            fragments: (offset..offset + len).map(|b| b as u8).collect(),
        }
    }

    #[test]
    fn test_data_frag_last_fragment_is_short() {
        // 21 bytes in 8-byte fragments: the third fragment carries 5 bytes
        // and the body is padded to a 4-byte boundary.
        let df = frag(3, 1, 21);
        assert_eq!(df.total_fragments(), 3);
        let decoded = roundtrip(&Submessage::DataFrag(df.clone()));
        assert_eq!(decoded, Submessage::DataFrag(df));
    }

    #[test]
    fn test_data_frag_with_inline_qos() {
        let mut df = frag(1, 2, 40);
        df.inline_qos = Some(InlineQos {
            key_hash: Some([3; 16]),
            status_info: None,
        });
        assert_eq!(roundtrip(&Submessage::DataFrag(df.clone())), Submessage::DataFrag(df));
    }

    #[test]
    fn test_data_frag_rejects_bad_range() {
        for bad in [
            DataFrag { fragment_starting_num: 0, ..frag(1, 1, 16) },
            DataFrag { fragment_starting_num: 3, ..frag(1, 1, 16) },
            DataFrag { fragment_size: 0, ..frag(1, 1, 16) },
        ] {
            let mut w = WireWriter::new();
            Submessage::DataFrag(bad).encode(&mut w).unwrap();
            let bytes = w.into_inner();
            assert!(Submessage::decode(bytes[0], bytes[1], &bytes[4..]).is_err());
        }
    }

    #[test]
    fn test_nack_frag() {
        let nf = NackFrag {
            reader_id: EntityId::user_reader(1, true),
            writer_id: EntityId::user_writer(1, true),
            writer_sn: 12,
            fragment_number_state: FragmentNumberSet::from_fragments(2, [2, 4]),
            count: 3,
        };
        assert_eq!(roundtrip(&Submessage::NackFrag(nf)), Submessage::NackFrag(nf));
    }

    #[test]
    fn test_info_ts_invalidate() {
        assert_eq!(roundtrip(&Submessage::InfoTs(None)), Submessage::InfoTs(None));
    }

    #[test]
    fn test_unknown_submessage_is_skipped() {
        assert_eq!(Submessage::decode(0x80, 0x01, &[1, 2, 3, 4]).unwrap(), Submessage::Unknown { id: 0x80 });
    }
}
