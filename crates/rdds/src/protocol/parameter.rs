// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PL_CDR_LE parameter lists (DDS-RTPS v2.5 Sec.9.6.2.2)
//!
//! Discovery payloads are a 4-byte encapsulation header followed by
//! `(pid: u16, length: u16, value)` entries, each value padded to 4 bytes,
//! terminated by `PID_SENTINEL`.

use crate::core::{Locator, Time, GUID};

use super::cursor::{WireReader, WireWriter};
use super::{ProtocolError, ProtocolResult};

// ============================================================================
// Parameter IDs
// ============================================================================

pub const PID_PAD: u16 = 0x0000;
pub const PID_SENTINEL: u16 = 0x0001;
pub const PID_PARTICIPANT_LEASE_DURATION: u16 = 0x0002;
pub const PID_TOPIC_NAME: u16 = 0x0005;
pub const PID_OWNERSHIP_STRENGTH: u16 = 0x0006;
pub const PID_TYPE_NAME: u16 = 0x0007;
pub const PID_DOMAIN_ID: u16 = 0x000f;
pub const PID_PROTOCOL_VERSION: u16 = 0x0015;
pub const PID_VENDORID: u16 = 0x0016;
pub const PID_RELIABILITY: u16 = 0x001a;
pub const PID_LIVELINESS: u16 = 0x001b;
pub const PID_DURABILITY: u16 = 0x001d;
pub const PID_OWNERSHIP: u16 = 0x001f;
pub const PID_DEADLINE: u16 = 0x0023;
pub const PID_DESTINATION_ORDER: u16 = 0x0025;
pub const PID_PARTITION: u16 = 0x0029;
pub const PID_LIFESPAN: u16 = 0x002b;
pub const PID_UNICAST_LOCATOR: u16 = 0x002f;
pub const PID_MULTICAST_LOCATOR: u16 = 0x0030;
pub const PID_DEFAULT_UNICAST_LOCATOR: u16 = 0x0031;
pub const PID_METATRAFFIC_UNICAST_LOCATOR: u16 = 0x0032;
pub const PID_METATRAFFIC_MULTICAST_LOCATOR: u16 = 0x0033;
pub const PID_HISTORY: u16 = 0x0040;
pub const PID_DEFAULT_MULTICAST_LOCATOR: u16 = 0x0048;
pub const PID_PARTICIPANT_GUID: u16 = 0x0050;
pub const PID_BUILTIN_ENDPOINT_SET: u16 = 0x0058;
pub const PID_ENDPOINT_GUID: u16 = 0x005a;
pub const PID_ENTITY_NAME: u16 = 0x0062;
pub const PID_KEY_HASH: u16 = 0x0070;
pub const PID_STATUS_INFO: u16 = 0x0071;

/// Encapsulation identifier for PL_CDR_LE.
pub const PL_CDR_LE: [u8; 2] = [0x00, 0x03];
/// Encapsulation identifier for PL_CDR_BE.
pub const PL_CDR_BE: [u8; 2] = [0x00, 0x02];

/// Decoded parameter list (raw values, in wire order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterList {
    params: Vec<(u16, Vec<u8>)>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pid: u16, value: Vec<u8>) {
        self.params.push((pid, value));
    }

    pub fn push_u32(&mut self, pid: u16, value: u32) {
        self.push(pid, value.to_le_bytes().to_vec());
    }

    pub fn push_i32(&mut self, pid: u16, value: i32) {
        self.push(pid, value.to_le_bytes().to_vec());
    }

    pub fn push_guid(&mut self, pid: u16, guid: &GUID) {
        self.push(pid, guid.as_bytes().to_vec());
    }

    pub fn push_time(&mut self, pid: u16, time: Time) {
        let mut v = Vec::with_capacity(8);
        v.extend_from_slice(&time.seconds.to_le_bytes());
        v.extend_from_slice(&time.fraction.to_le_bytes());
        self.push(pid, v);
    }

    pub fn push_locator(&mut self, pid: u16, locator: &Locator) {
        let mut v = Vec::with_capacity(24);
        v.extend_from_slice(&locator.kind.to_le_bytes());
        v.extend_from_slice(&locator.port.to_le_bytes());
        v.extend_from_slice(&locator.address);
        self.push(pid, v);
    }

    /// CDR string: length (incl. NUL), bytes, NUL.
    pub fn push_string(&mut self, pid: u16, value: &str) {
        self.push(pid, encode_cdr_string(value));
    }

    /// CDR `sequence<string>`.
    pub fn push_string_seq(&mut self, pid: u16, values: &[String]) {
        let mut w = WireWriter::new();
        w.write_u32(values.len() as u32);
        for v in values {
            w.align(4);
            w.write_bytes(&encode_cdr_string(v));
        }
        self.push(pid, w.into_inner());
    }

    pub fn get(&self, pid: u16) -> Option<&[u8]> {
        self.params
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_all(&self, pid: u16) -> impl Iterator<Item = &[u8]> {
        self.params
            .iter()
            .filter(move |(p, _)| *p == pid)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_u32(&self, pid: u16) -> Option<u32> {
        let v = self.get(pid)?;
        Some(u32::from_le_bytes(v.get(..4)?.try_into().ok()?))
    }

    pub fn get_i32(&self, pid: u16) -> Option<i32> {
        self.get_u32(pid).map(|v| v as i32)
    }

    pub fn get_guid(&self, pid: u16) -> Option<GUID> {
        let v = self.get(pid)?;
        Some(GUID::from_bytes(v.get(..16)?.try_into().ok()?))
    }

    pub fn get_time(&self, pid: u16) -> Option<Time> {
        let v = self.get(pid)?;
        Some(Time {
            seconds: i32::from_le_bytes(v.get(..4)?.try_into().ok()?),
            fraction: u32::from_le_bytes(v.get(4..8)?.try_into().ok()?),
        })
    }

    pub fn get_string(&self, pid: u16) -> Option<String> {
        decode_cdr_string(&mut WireReader::new(self.get(pid)?)).ok()
    }

    pub fn get_string_seq(&self, pid: u16) -> Option<Vec<String>> {
        let mut r = WireReader::new(self.get(pid)?);
        let count = r.read_u32().ok()?;
        let mut out = Vec::new();
        for _ in 0..count {
            r.align(4).ok()?;
            out.push(decode_cdr_string(&mut r).ok()?);
        }
        Some(out)
    }

    pub fn get_locators(&self, pid: u16) -> Vec<Locator> {
        self.get_all(pid).filter_map(decode_locator).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Serialize with the PL_CDR_LE encapsulation header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(256);
        w.write_bytes(&PL_CDR_LE);
        w.write_u16(0); // options
        for (pid, value) in &self.params {
            let padded = value.len().div_ceil(4) * 4;
            w.write_u16(*pid);
            w.write_u16(padded as u16);
            w.write_bytes(value);
            w.align(4);
        }
        w.write_u16(PID_SENTINEL);
        w.write_u16(0);
        w.into_inner()
    }

    /// Parse an encapsulated parameter list.
    ///
    /// # Errors
    /// `BadEncapsulation` for anything but PL_CDR_LE/BE, `Truncated` when a
    /// value overruns the buffer, `InvalidSubmessage` if the sentinel is
    /// missing.
    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut r = WireReader::new(bytes);
        let encapsulation: [u8; 2] = r.read_array()?;
        let little_endian = match encapsulation {
            PL_CDR_LE => true,
            PL_CDR_BE => false,
            other => return Err(ProtocolError::BadEncapsulation(other)),
        };
        r.skip(2)?;
        let mut r = WireReader::with_endianness(r.rest(), little_endian);
        let mut list = ParameterList::new();
        loop {
            if r.remaining() < 4 {
                return Err(ProtocolError::InvalidSubmessage("parameter list without sentinel"));
            }
            let pid = r.read_u16()?;
            let len = r.read_u16()? as usize;
            if pid == PID_SENTINEL {
                return Ok(list);
            }
            let value = r.read_bytes(len)?;
            if pid != PID_PAD {
                // Vendor-specific bit (0x8000) and must-understand bit (0x4000) are dropped.
                list.push(pid & 0x3fff, value.to_vec());
            }
        }
    }
}

fn encode_cdr_string(value: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + value.len() + 1);
    v.extend_from_slice(&((value.len() + 1) as u32).to_le_bytes());
    v.extend_from_slice(value.as_bytes());
    v.push(0);
    v
}

fn decode_cdr_string(r: &mut WireReader<'_>) -> ProtocolResult<String> {
    let len = r.read_u32()? as usize;
    if len == 0 {
        return Ok(String::new());
    }
    let raw = r.read_bytes(len)?;
    let text = raw.strip_suffix(&[0]).unwrap_or(raw);
    String::from_utf8(text.to_vec()).map_err(|_| ProtocolError::InvalidSubmessage("string is not UTF-8"))
}

fn decode_locator(v: &[u8]) -> Option<Locator> {
    if v.len() < 24 {
        return None;
    }
    let kind = i32::from_le_bytes(v[0..4].try_into().ok()?);
    let port = u32::from_le_bytes(v[4..8].try_into().ok()?);
    let mut address = [0u8; 16];
    address.copy_from_slice(&v[8..24]);
    Some(Locator { kind, port, address })
}
