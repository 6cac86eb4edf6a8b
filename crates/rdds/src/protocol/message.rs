// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS message framing: 20-byte header followed by submessages.
//!
//! ```text
//! +------+---------+--------+------------------+
//! | RTPS | ver 2.4 | vendor | guidPrefix (12)  |   header (20 bytes)
//! +------+---------+--------+------------------+
//! | id | flags | octetsToNextHeader | body ...  |   submessage (repeated)
//! +----+-------+--------------------+-----------+
//! ```

use crate::core::{GuidPrefix, Time};

use super::cursor::{WireReader, WireWriter};
use super::submessage::{
    AckNack, Data, DataFrag, Gap, Heartbeat, NackFrag, Submessage, FLAG_ENDIANNESS,
    SUBMSG_INFO_TS, SUBMSG_PAD,
};
use super::{ProtocolError, ProtocolResult};

pub const RTPS_MAGIC: &[u8; 4] = b"RTPS";
pub const RTPS_VERSION: [u8; 2] = [0x02, 0x04];
pub const RTPS_HEADER_SIZE: usize = 20;

/// RTPS message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpsHeader {
    pub version: [u8; 2],
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

/// Decoded RTPS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpsMessage {
    pub header: RtpsHeader,
    pub submessages: Vec<Submessage>,
}

impl RtpsMessage {
    /// Parse a full datagram.
    ///
    /// A malformed submessage aborts the rest of the message (everything
    /// after it is unreliable) but keeps what was decoded before it.
    ///
    /// # Errors
    /// `BadMagic` / `UnsupportedVersion` / `Truncated` for an unusable header.
    pub fn parse(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut r = WireReader::new(bytes);
        let magic: [u8; 4] = r.read_array()?;
        if &magic != RTPS_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let version: [u8; 2] = r.read_array()?;
        if version[0] != RTPS_VERSION[0] {
            return Err(ProtocolError::UnsupportedVersion(version[0], version[1]));
        }
        let vendor_id = r.read_array()?;
        let guid_prefix = GuidPrefix(r.read_array()?);

        let mut submessages = Vec::new();
        while r.remaining() >= 4 {
            let id = r.read_u8()?;
            let flags = r.read_u8()?;
            let raw_len = {
                let b: [u8; 2] = r.read_array()?;
                if flags & FLAG_ENDIANNESS != 0 {
                    u16::from_le_bytes(b)
                } else {
                    u16::from_be_bytes(b)
                }
            };
            // octetsToNextHeader == 0: last submessage, extends to the end
            // (PAD and INFO_TS excepted, whose body can be empty).
            let len = if raw_len == 0 && id != SUBMSG_PAD && id != SUBMSG_INFO_TS {
                r.remaining()
            } else {
                raw_len as usize
            };
            let body = match r.read_bytes(len) {
                Ok(body) => body,
                Err(e) => {
                    log::debug!("[protocol] submessage 0x{:02x} overruns message: {}", id, e);
                    break;
                }
            };
            match Submessage::decode(id, flags, body) {
                Ok(sub) => submessages.push(sub),
                Err(e) => {
                    log::debug!("[protocol] dropping rest of message after bad submessage 0x{:02x}: {}", id, e);
                    break;
                }
            }
        }

        Ok(Self {
            header: RtpsHeader {
                version,
                vendor_id,
                guid_prefix,
            },
            submessages,
        })
    }
}

/// Incremental builder for one outgoing datagram.
pub struct MessageBuilder {
    w: WireWriter,
    count: usize,
}

impl MessageBuilder {
    pub fn new(prefix: GuidPrefix, vendor_id: [u8; 2]) -> Self {
        let mut w = WireWriter::with_capacity(128);
        w.write_bytes(RTPS_MAGIC);
        w.write_bytes(&RTPS_VERSION);
        w.write_bytes(&vendor_id);
        w.write_bytes(&prefix.0);
        Self { w, count: 0 }
    }

    /// Append any submessage.
    ///
    /// # Errors
    /// Propagates `TooLarge` from the submessage encoder.
    pub fn push(&mut self, sub: &Submessage) -> ProtocolResult<&mut Self> {
        let mark = self.w.len();
        if let Err(e) = sub.encode(&mut self.w) {
            self.w.truncate(mark);
            return Err(e);
        }
        self.count += 1;
        Ok(self)
    }

    pub fn info_dst(&mut self, prefix: GuidPrefix) -> &mut Self {
        // Fixed-size submessages cannot overflow.
        let _ = self.push(&Submessage::InfoDst(prefix));
        self
    }

    pub fn info_ts(&mut self, ts: Time) -> &mut Self {
        let _ = self.push(&Submessage::InfoTs(Some(ts)));
        self
    }

    pub fn heartbeat(&mut self, hb: Heartbeat) -> &mut Self {
        let _ = self.push(&Submessage::Heartbeat(hb));
        self
    }

    pub fn acknack(&mut self, ack: AckNack) -> &mut Self {
        let _ = self.push(&Submessage::AckNack(ack));
        self
    }

    pub fn gap(&mut self, gap: Gap) -> &mut Self {
        let _ = self.push(&Submessage::Gap(gap));
        self
    }

    /// # Errors
    /// `TooLarge` when the payload exceeds a single submessage.
    pub fn data(&mut self, data: Data) -> ProtocolResult<&mut Self> {
        self.push(&Submessage::Data(data))
    }

    /// # Errors
    /// `TooLarge` when the fragment run exceeds a single submessage.
    pub fn data_frag(&mut self, frag: DataFrag) -> ProtocolResult<&mut Self> {
        self.push(&Submessage::DataFrag(frag))
    }

    pub fn nack_frag(&mut self, nack: NackFrag) -> &mut Self {
        let _ = self.push(&Submessage::NackFrag(nack));
        self
    }

    pub fn submessage_count(&self) -> usize {
        self.count
    }

    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(self) -> Vec<u8> {
        self.w.into_inner()
    }
}
