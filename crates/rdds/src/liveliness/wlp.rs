// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer Liveliness Protocol (WLP).
//!
//! Each participant owns a built-in participant-message writer/reader pair
//! (reliable, TRANSIENT_LOCAL, KEEP_LAST(1) per `(participant, kind)`
//! instance). A message asserts every writer of the sending participant
//! that uses the message's liveliness kind.
//!
//! Payload layout (CDR little-endian encapsulation):
//!
//! ```text
//! 00 01 00 00 | guidPrefix[12] | kind[4] (big-endian) | dataLength u32 = 0
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::core::{GuidPrefix, Payload, Time, GUID};
use crate::dds::Result;
use crate::history::InstanceHandle;
use crate::qos::LivelinessKind;
use crate::reader::{ReaderEngine, ReaderEvents};
use crate::writer::WriterEngine;

use super::LivelinessManager;

const CDR_LE: [u8; 4] = [0x00, 0x01, 0x00, 0x00];
const MESSAGE_LEN: usize = 4 + 12 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantMessage {
    pub participant: GuidPrefix,
    pub kind: LivelinessKind,
}

impl ParticipantMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MESSAGE_LEN);
        out.extend_from_slice(&CDR_LE);
        out.extend_from_slice(&self.participant.0);
        out.extend_from_slice(&self.kind.wire_kind().to_be_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    /// `None` for short buffers or an unknown kind.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MESSAGE_LEN - 4 || bytes[..2] != CDR_LE[..2] {
            return None;
        }
        let mut prefix = [0u8; 12];
        prefix.copy_from_slice(&bytes[4..16]);
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&bytes[16..20]);
        Some(Self {
            participant: GuidPrefix(prefix),
            kind: LivelinessKind::from_wire_kind(u32::from_be_bytes(kind))?,
        })
    }

    /// Instance key: prefix followed by kind.
    pub fn instance(&self) -> InstanceHandle {
        let mut key = [0u8; 16];
        key[..12].copy_from_slice(&self.participant.0);
        key[12..].copy_from_slice(&self.kind.wire_kind().to_be_bytes());
        InstanceHandle(key)
    }
}

/// Period of AUTOMATIC assertions: the shortest finite lease divided by
/// `divisor`, or `None` when no lease is finite.
pub fn assertion_period(leases: impl IntoIterator<Item = Duration>, divisor: u32) -> Option<Duration> {
    leases
        .into_iter()
        .filter(|l| *l != crate::core::DURATION_INFINITE)
        .min()
        .map(|l| (l / divisor.max(1)).max(Duration::from_millis(1)))
}

/// Built-in WLP endpoints of one participant.
pub struct Wlp {
    prefix: GuidPrefix,
    writer: Arc<WriterEngine>,
    reader: Arc<ReaderEngine>,
    remote: Arc<LivelinessManager>,
}

impl Wlp {
    pub fn new(
        prefix: GuidPrefix,
        writer: Arc<WriterEngine>,
        reader: Arc<ReaderEngine>,
        remote: Arc<LivelinessManager>,
    ) -> Arc<Self> {
        let wlp = Arc::new(Self {
            prefix,
            writer,
            reader,
            remote,
        });
        wlp.reader.set_listener(Some(Arc::new(WlpEvents(Arc::downgrade(&wlp)))));
        wlp
    }

    pub fn writer(&self) -> &Arc<WriterEngine> {
        &self.writer
    }

    pub fn reader(&self) -> &Arc<ReaderEngine> {
        &self.reader
    }

    /// Publish an assertion for every local writer of `kind`.
    pub fn announce(&self, kind: LivelinessKind) -> Result<i64> {
        let msg = ParticipantMessage {
            participant: self.prefix,
            kind,
        };
        log::trace!("[LIVELINESS] WLP assert {:?} for {}", kind, self.prefix);
        self.writer
            .write(Payload::from_vec(msg.encode()), Some(msg.instance()), Time::now())
    }

    /// Apply received participant messages to the remote-writer manager.
    pub fn process_received(&self) -> usize {
        let mut applied = 0;
        for (change, _) in self.reader.take_all() {
            if !change.kind.is_alive() {
                continue;
            }
            let Some(msg) = ParticipantMessage::decode(&change.payload) else {
                log::debug!("[LIVELINESS] malformed participant message from {}", change.writer_guid);
                continue;
            };
            if msg.participant == self.prefix {
                continue;
            }
            self.remote.assert_participant(&msg.participant, msg.kind);
            applied += 1;
        }
        applied
    }

    /// Built-in WLP endpoint GUIDs of a participant.
    pub fn endpoints(prefix: GuidPrefix) -> (GUID, GUID) {
        (
            GUID::new(prefix, crate::core::EntityId::PARTICIPANT_MESSAGE_WRITER),
            GUID::new(prefix, crate::core::EntityId::PARTICIPANT_MESSAGE_READER),
        )
    }
}

impl std::fmt::Debug for Wlp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wlp").field("prefix", &self.prefix).finish()
    }
}

struct WlpEvents(Weak<Wlp>);

impl ReaderEvents for WlpEvents {
    fn on_data_available(&self) {
        if let Some(wlp) = self.0.upgrade() {
            wlp.process_received();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_layout() {
        let msg = ParticipantMessage {
            participant: GuidPrefix([7; 12]),
            kind: LivelinessKind::ManualByParticipant,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), MESSAGE_LEN);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 2]);
        assert_eq!(ParticipantMessage::decode(&bytes), Some(msg));
        assert_eq!(&msg.instance().0[..12], &[7; 12]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(ParticipantMessage::decode(&[0, 1, 0]), None);
        let mut bytes = ParticipantMessage {
            participant: GuidPrefix([1; 12]),
            kind: LivelinessKind::Automatic,
        }
        .encode();
        bytes[19] = 9;
        assert_eq!(ParticipantMessage::decode(&bytes), None);
    }

    #[test]
    fn test_assertion_period_uses_shortest_finite_lease() {
        let leases = [
            crate::core::DURATION_INFINITE,
            Duration::from_secs(4),
            Duration::from_secs(2),
        ];
        assert_eq!(assertion_period(leases, 2), Some(Duration::from_secs(1)));
        assert_eq!(assertion_period([crate::core::DURATION_INFINITE], 2), None);
    }
}
