// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CacheChange: one sample (or instance lifecycle event) in a History.

use std::fmt;

use md5::{Digest, Md5};

use crate::core::{Payload, Time, GUID};
use crate::protocol::submessage::{STATUS_INFO_DISPOSED, STATUS_INFO_UNREGISTERED};

/// Kind of change carried by a DATA submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeKind {
    #[default]
    Alive,
    NotAliveDisposed,
    NotAliveUnregistered,
    NotAliveDisposedUnregistered,
}

impl ChangeKind {
    /// PID_STATUS_INFO flags for this kind (0 for ALIVE).
    pub fn status_info(self) -> u32 {
        match self {
            ChangeKind::Alive => 0,
            ChangeKind::NotAliveDisposed => STATUS_INFO_DISPOSED,
            ChangeKind::NotAliveUnregistered => STATUS_INFO_UNREGISTERED,
            ChangeKind::NotAliveDisposedUnregistered => {
                STATUS_INFO_DISPOSED | STATUS_INFO_UNREGISTERED
            }
        }
    }

    pub fn from_status_info(flags: u32) -> Self {
        match (
            flags & STATUS_INFO_DISPOSED != 0,
            flags & STATUS_INFO_UNREGISTERED != 0,
        ) {
            (false, false) => ChangeKind::Alive,
            (true, false) => ChangeKind::NotAliveDisposed,
            (false, true) => ChangeKind::NotAliveUnregistered,
            (true, true) => ChangeKind::NotAliveDisposedUnregistered,
        }
    }

    pub fn is_alive(self) -> bool {
        self == ChangeKind::Alive
    }
}

/// 16-byte instance key hash (PID_KEY_HASH).
///
/// Keys of at most 16 bytes are zero-padded; longer keys are MD5-hashed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    pub fn from_key(key: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        if key.len() <= 16 {
            bytes[..key.len()].copy_from_slice(key);
        } else {
            let digest = Md5::digest(key);
            bytes.copy_from_slice(&digest);
        }
        Self(bytes)
    }

    /// Instance handle for an endpoint GUID (built-in discovery topics).
    pub fn from_guid(guid: &GUID) -> Self {
        Self(guid.as_bytes())
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceHandle(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// One entry of a History.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: GUID,
    pub sequence_number: i64,
    /// `None` for unkeyed topics.
    pub instance: Option<InstanceHandle>,
    pub payload: Payload,
    pub source_timestamp: Time,
}

impl CacheChange {
    pub fn alive(writer_guid: GUID, sequence_number: i64, payload: Payload) -> Self {
        Self {
            kind: ChangeKind::Alive,
            writer_guid,
            sequence_number,
            instance: None,
            payload,
            source_timestamp: Time::now(),
        }
    }

    #[must_use]
    pub fn with_instance(mut self, instance: Option<InstanceHandle>) -> Self {
        self.instance = instance;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ChangeKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, ts: Time) -> Self {
        self.source_timestamp = ts;
        self
    }
}
