// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUID (Globally Unique Identifier): 12-byte prefix + 4-byte entity id.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

/// 12-byte participant prefix shared by every entity of a participant.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct GuidPrefix(pub [u8; 12]);

static PREFIX_COUNTER: AtomicU16 = AtomicU16::new(0);

impl GuidPrefix {
    pub const UNKNOWN: GuidPrefix = GuidPrefix([0; 12]);

    /// Generate a process-unique prefix.
    ///
    /// Layout: vendor id (2) | random host id (4) | process id (4) | counter (2).
    pub fn generate(vendor: [u8; 2]) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..2].copy_from_slice(&vendor);
        bytes[2..6].copy_from_slice(&fastrand::u32(..).to_be_bytes());
        bytes[6..10].copy_from_slice(&std::process::id().to_be_bytes());
        let counter = PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
        bytes[10..12].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == [0; 12]
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuidPrefix({})", self)
    }
}

/// Entity id: 3-byte key + 1-byte kind.
///
/// Kind byte (RTPS v2.3 Sec.9.3.1.2):
/// - `0x02` / `0x03` user writer with / without key
/// - `0x04` / `0x07` user reader without / with key
/// - `0xC2` / `0xC3` / `0xC4` / `0xC7` builtin counterparts
/// - `0xC1` participant
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct EntityId(pub [u8; 4]);

impl EntityId {
    pub const UNKNOWN: EntityId = EntityId([0x00, 0x00, 0x00, 0x00]);
    pub const PARTICIPANT: EntityId = EntityId([0x00, 0x00, 0x01, 0xC1]);
    pub const SPDP_WRITER: EntityId = EntityId([0x00, 0x01, 0x00, 0xC2]);
    pub const SPDP_READER: EntityId = EntityId([0x00, 0x01, 0x00, 0xC7]);
    pub const SEDP_PUBLICATIONS_WRITER: EntityId = EntityId([0x00, 0x00, 0x03, 0xC2]);
    pub const SEDP_PUBLICATIONS_READER: EntityId = EntityId([0x00, 0x00, 0x03, 0xC7]);
    pub const SEDP_SUBSCRIPTIONS_WRITER: EntityId = EntityId([0x00, 0x00, 0x04, 0xC2]);
    pub const SEDP_SUBSCRIPTIONS_READER: EntityId = EntityId([0x00, 0x00, 0x04, 0xC7]);
    pub const PARTICIPANT_MESSAGE_WRITER: EntityId = EntityId([0x00, 0x02, 0x00, 0xC2]);
    pub const PARTICIPANT_MESSAGE_READER: EntityId = EntityId([0x00, 0x02, 0x00, 0xC7]);

    /// User-defined writer entity id built from a per-participant counter.
    pub fn user_writer(key: u32, keyed: bool) -> Self {
        Self::user(key, if keyed { 0x02 } else { 0x03 })
    }

    /// User-defined reader entity id built from a per-participant counter.
    pub fn user_reader(key: u32, keyed: bool) -> Self {
        Self::user(key, if keyed { 0x07 } else { 0x04 })
    }

    fn user(key: u32, kind: u8) -> Self {
        let k = key.to_be_bytes();
        EntityId([k[1], k[2], k[3], kind])
    }

    pub fn kind(&self) -> u8 {
        self.0[3]
    }

    pub fn is_writer(&self) -> bool {
        matches!(self.kind(), 0x02 | 0x03 | 0xC2 | 0xC3)
    }

    pub fn is_reader(&self) -> bool {
        matches!(self.kind(), 0x04 | 0x07 | 0xC4 | 0xC7)
    }

    pub fn is_builtin(&self) -> bool {
        self.kind() & 0xC0 == 0xC0
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntityId({:02x}.{:02x}.{:02x}.{:02x})",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// RTPS GUID (Globally Unique Identifier)
///
/// # Display Format
/// Hex with dots: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct GUID {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl GUID {
    pub const UNKNOWN: GUID = GUID {
        prefix: GuidPrefix::UNKNOWN,
        entity_id: EntityId::UNKNOWN,
    };

    pub const fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self {
            prefix: GuidPrefix(prefix),
            entity_id: EntityId(entity_id),
        }
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix.0);
        bytes[12..16].copy_from_slice(&self.entity_id.0);
        bytes
    }

    /// GUID of the participant owning this entity.
    pub fn participant(&self) -> GUID {
        GUID::new(self.prefix, EntityId::PARTICIPANT)
    }

    pub fn is_unknown(&self) -> bool {
        self.prefix.is_unknown() && self.entity_id.is_unknown()
    }
}

impl fmt::Display for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix)?;
        for byte in &self.entity_id.0 {
            write!(f, ".{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GUID({})", self)
    }
}
