// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS wire protocol (little-endian encoding, DDS-RTPS v2.5 Sec.9)
//!
//! - [`cursor`]: bounds-checked read/write cursors
//! - [`seqset`]: `SequenceNumberSet` and `FragmentNumberSet` bitmaps
//! - [`submessage`]: DATA / DATA_FRAG / HEARTBEAT / ACKNACK / NACK_FRAG / GAP /
//!   INFO_TS / INFO_DST
//! - [`message`]: RTPS header framing, parsing and building
//! - [`parameter`]: PL_CDR parameter lists used by discovery

pub mod cursor;
pub mod message;
pub mod parameter;
pub mod seqset;
pub mod submessage;

pub use message::{MessageBuilder, RtpsHeader, RtpsMessage};
pub use parameter::ParameterList;
pub use seqset::{FragmentNumberSet, SequenceNumberSet};
pub use submessage::{AckNack, Data, DataFrag, Gap, Heartbeat, InlineQos, NackFrag, Submessage};

/// Wire decoding/encoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer ended before a field could be read.
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Message does not start with "RTPS".
    BadMagic,
    /// Major protocol version we do not speak.
    UnsupportedVersion(u8, u8),
    /// Structurally invalid submessage or field.
    InvalidSubmessage(&'static str),
    /// Unknown serialized-payload encapsulation.
    BadEncapsulation([u8; 2]),
    /// Encoded submessage exceeds the 16-bit length field.
    TooLarge(usize),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "truncated at offset {}: need {} bytes, {} available",
                offset, needed, available
            ),
            ProtocolError::BadMagic => write!(f, "missing RTPS magic"),
            ProtocolError::UnsupportedVersion(major, minor) => {
                write!(f, "unsupported RTPS version {}.{}", major, minor)
            }
            ProtocolError::InvalidSubmessage(what) => write!(f, "invalid submessage: {}", what),
            ProtocolError::BadEncapsulation(id) => {
                write!(f, "unsupported encapsulation {:02x}{:02x}", id[0], id[1])
            }
            ProtocolError::TooLarge(len) => write!(f, "submessage body too large ({} bytes)", len),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for crate::dds::Error {
    fn from(e: ProtocolError) -> Self {
        crate::dds::Error::Serialization(e.to_string())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
