// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic types and sample encapsulation.
//!
//! The engines never look inside a payload. A [`TopicType`] turns samples
//! into bytes and tells which instance a sample belongs to; the DDS layer
//! wraps those bytes in the 4-byte CDR encapsulation header:
//!
//! ```text
//! [0x00, 0x01]  CDR_LE representation
//! [0x00, pad]   options: number of trailing padding bytes (0..=3)
//! body ...      serialized sample, zero-padded to a multiple of 4
//! ```

use super::{Error, Result};

/// CDR little-endian representation identifier.
pub const CDR_LE: [u8; 2] = [0x00, 0x01];
/// CDR big-endian representation identifier.
pub const CDR_BE: [u8; 2] = [0x00, 0x00];

/// A type that can be published on a topic.
pub trait TopicType: Sized + Send + 'static {
    /// Name announced through discovery; readers and writers only match
    /// when it is identical.
    fn type_name() -> &'static str;

    /// Whether samples carry an instance key.
    fn is_keyed() -> bool {
        false
    }

    /// Serialized body (without the encapsulation header).
    fn serialize(&self) -> Result<Vec<u8>>;

    /// # Errors
    /// `Serialization` when `bytes` is not a valid sample.
    fn deserialize(bytes: &[u8]) -> Result<Self>;

    /// Instance key bytes. `None` for unkeyed types.
    fn key(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Prefix `body` with the encapsulation header and pad it to 4 bytes.
pub fn encapsulate(body: &[u8]) -> Vec<u8> {
    let pad = (4 - body.len() % 4) % 4;
    let mut out = Vec::with_capacity(4 + body.len() + pad);
    out.extend_from_slice(&CDR_LE);
    out.push(0);
    out.push(pad as u8);
    out.extend_from_slice(body);
    out.resize(out.len() + pad, 0);
    out
}

/// Strip the encapsulation header and padding.
///
/// # Errors
/// `Serialization` for a short buffer, an unknown representation, or a
/// padding count larger than the body.
pub fn decapsulate(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < 4 {
        return Err(Error::Serialization(format!(
            "payload of {} bytes has no encapsulation header",
            bytes.len()
        )));
    }
    let id = [bytes[0], bytes[1]];
    if id != CDR_LE && id != CDR_BE {
        return Err(Error::Serialization(format!(
            "unsupported encapsulation {:02x}{:02x}",
            id[0], id[1]
        )));
    }
    let pad = usize::from(bytes[3] & 0x03);
    let body = &bytes[4..];
    if pad > body.len() {
        return Err(Error::Serialization("padding exceeds payload".into()));
    }
    Ok(&body[..body.len() - pad])
}

/// Opaque bytes with an optional instance key.
///
/// Useful when the application does its own serialization, and in tests.
/// The key is not part of the serialized body: received samples carry
/// their instance in [`SampleInfo::instance_handle`](super::SampleInfo).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBytes {
    pub key: Option<Vec<u8>>,
    pub data: Vec<u8>,
}

impl RawBytes {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            data: data.into(),
        }
    }

    pub fn keyed(key: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            data: data.into(),
        }
    }
}

impl TopicType for RawBytes {
    fn type_name() -> &'static str {
        "rdds::RawBytes"
    }

    fn is_keyed() -> bool {
        true
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(bytes))
    }

    fn key(&self) -> Option<Vec<u8>> {
        self.key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encapsulation_pads_to_four() {
        let bytes = encapsulate(&[1, 2, 3, 4, 5]);
        assert_eq!(&bytes[..4], &[0x00, 0x01, 0x00, 0x03]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decapsulate(&bytes).expect("valid"), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_aligned_body_has_no_padding() {
        let bytes = encapsulate(&[9; 8]);
        assert_eq!(bytes[3], 0);
        assert_eq!(decapsulate(&bytes).expect("valid"), &[9; 8]);
        assert_eq!(decapsulate(&encapsulate(&[])).expect("valid"), &[] as &[u8]);
    }

    #[test]
    fn test_decapsulate_rejects_garbage() {
        assert!(matches!(decapsulate(&[0, 1]), Err(Error::Serialization(_))));
        assert!(matches!(decapsulate(&[0, 3, 0, 0]), Err(Error::Serialization(_))));
        assert!(matches!(decapsulate(&[0, 1, 0, 3, 1]), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_raw_bytes_key() {
        let sample = RawBytes::keyed(*b"sensor-1", *b"42");
        assert_eq!(sample.key().as_deref(), Some(&b"sensor-1"[..]));
        assert_eq!(RawBytes::deserialize(&sample.serialize().expect("ser")).expect("de").data, b"42");
    }
}
