// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SPDP: participant announcements.
//!
//! The built-in participant writer is stateless and best-effort: the same
//! change (same sequence number) is resent every `announcement_period` to
//! the metatraffic multicast locator and to every known peer. A new
//! sequence number is only allocated when the local announcement content
//! changes, so receivers can tell a renewal from an update.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{EntityId, GuidPrefix, Locator, Time, GUID};
use crate::history::{ChangeKind, InstanceHandle};
use crate::protocol::{Data, InlineQos};
use crate::transport::RtpsSender;

use super::codec;
use super::proxy::ParticipantProxyData;
use super::DiscoveryError;

/// Decoded SPDP DATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpdpMessage {
    Announce(ParticipantProxyData),
    /// Participant announced its removal.
    Dispose(GuidPrefix),
}

/// Local side of SPDP.
pub struct Pdp {
    sender: Arc<RtpsSender>,
    local: RwLock<ParticipantProxyData>,
    seq: AtomicI64,
    /// Multicast group plus configured initial peers.
    targets: Mutex<Vec<Locator>>,
}

impl Pdp {
    pub fn new(sender: Arc<RtpsSender>, local: ParticipantProxyData, targets: Vec<Locator>) -> Self {
        Self {
            sender,
            local: RwLock::new(local),
            seq: AtomicI64::new(1),
            targets: Mutex::new(targets),
        }
    }

    pub fn local_data(&self) -> ParticipantProxyData {
        self.local.read().clone()
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.local.read().guid_prefix
    }

    pub fn domain_id(&self) -> u32 {
        self.local.read().domain_id
    }

    /// Change the local announcement; the next one carries a new sequence number.
    pub fn update_local(&self, f: impl FnOnce(&mut ParticipantProxyData)) {
        f(&mut self.local.write());
        self.seq.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_target(&self, locator: Locator) {
        let mut targets = self.targets.lock();
        if !targets.contains(&locator) {
            targets.push(locator);
        }
    }

    pub fn targets(&self) -> Vec<Locator> {
        self.targets.lock().clone()
    }

    /// Current announcement sequence number.
    pub fn sequence_number(&self) -> i64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Send the announcement to the configured targets and `peers`.
    pub fn announce(&self, peers: &[Locator]) {
        let local = self.local_data();
        let data = Data {
            reader_id: EntityId::SPDP_READER,
            writer_id: EntityId::SPDP_WRITER,
            writer_sn: self.sequence_number(),
            inline_qos: Some(InlineQos {
                key_hash: Some(InstanceHandle::from_guid(&local.guid()).0),
                status_info: None,
            }),
            serialized_payload: Some(codec::encode_participant(&local)),
            key_only: false,
        };
        self.send(data, peers);
    }

    /// Announce removal (disposed + unregistered).
    pub fn announce_removal(&self, peers: &[Locator]) {
        let guid = self.local.read().guid();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let data = Data {
            reader_id: EntityId::SPDP_READER,
            writer_id: EntityId::SPDP_WRITER,
            writer_sn: seq,
            inline_qos: Some(InlineQos {
                key_hash: Some(InstanceHandle::from_guid(&guid).0),
                status_info: Some(ChangeKind::NotAliveDisposedUnregistered.status_info()),
            }),
            serialized_payload: None,
            key_only: true,
        };
        log::debug!("[PDP] announcing removal of {}", guid.prefix);
        self.send(data, peers);
    }

    fn send(&self, data: Data, peers: &[Locator]) {
        let mut builder = self.sender.builder();
        builder.info_ts(Time::now());
        if let Err(e) = builder.data(data) {
            log::warn!("[PDP] announcement does not fit a datagram: {}", e);
            return;
        }
        let mut locators = self.targets();
        for peer in peers {
            if !locators.contains(peer) {
                locators.push(*peer);
            }
        }
        self.sender.send_message(builder, &locators);
    }

    /// Decode an SPDP DATA and apply the domain filter.
    ///
    /// # Errors
    /// `Malformed` / `MissingGuid` for undecodable content, `DomainMismatch`
    /// for announcements from another domain.
    pub fn parse(&self, data: &Data) -> Result<SpdpMessage, DiscoveryError> {
        let status = data
            .inline_qos
            .as_ref()
            .and_then(|q| q.status_info)
            .unwrap_or(0);
        if status != 0 {
            let key = data
                .inline_qos
                .as_ref()
                .and_then(|q| q.key_hash)
                .ok_or(DiscoveryError::MissingGuid)?;
            return Ok(SpdpMessage::Dispose(codec::prefix_from_key_hash(&key)));
        }
        let payload = data
            .serialized_payload
            .as_deref()
            .ok_or_else(|| DiscoveryError::Malformed("SPDP DATA without payload".into()))?;
        let remote = codec::decode_participant(payload)?;
        let domain = self.domain_id();
        if remote.domain_id != domain {
            return Err(DiscoveryError::DomainMismatch {
                expected: domain,
                got: remote.domain_id,
            });
        }
        Ok(SpdpMessage::Announce(remote))
    }

    /// GUID of the remote SPDP writer that sent a message.
    pub fn writer_guid(prefix: GuidPrefix) -> GUID {
        GUID::new(prefix, EntityId::SPDP_WRITER)
    }
}

impl std::fmt::Debug for Pdp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pdp")
            .field("prefix", &self.guid_prefix())
            .field("seq", &self.sequence_number())
            .finish()
    }
}
