// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SEDP: endpoint announcements over the built-in publications and
//! subscriptions endpoints.
//!
//! The four built-in endpoints are ordinary [`WriterEngine`] /
//! [`ReaderEngine`] instances (reliable, TRANSIENT_LOCAL, KEEP_LAST(1) per
//! endpoint-GUID instance), so late joiners receive every live endpoint and
//! the latest disposal of every removed one.

use std::sync::Arc;

use crate::core::{EntityId, GuidPrefix, Locator, Payload, Time, GUID};
use crate::dds::Result;
use crate::history::{ChangeKind, InstanceHandle};
use crate::qos::{Durability, QoS};
use crate::reader::{ReaderEngine, ReaderTiming, RemoteWriterInfo};
use crate::transport::RtpsSender;
use crate::writer::{RemoteReaderInfo, WriterEngine, WriterTiming};

use super::codec;
use super::proxy::{builtin_endpoint, ParticipantProxyData, ReaderProxyData, WriterProxyData};

/// Decoded SEDP change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdpEvent {
    WriterAnnounced(WriterProxyData),
    WriterDisposed(GUID),
    ReaderAnnounced(ReaderProxyData),
    ReaderDisposed(GUID),
}

/// QoS of every built-in discovery endpoint.
pub fn builtin_qos() -> QoS {
    QoS::reliable().transient_local().keep_last(1)
}

/// Where to reach a remote participant's built-in endpoints.
pub fn metatraffic_locators(remote: &ParticipantProxyData) -> Vec<Locator> {
    if remote.metatraffic_unicast.is_empty() {
        remote.metatraffic_multicast.clone()
    } else {
        remote.metatraffic_unicast.clone()
    }
}

/// Pair a local built-in writer with the remote built-in reader `reader_id`.
pub fn match_builtin_writer(
    writer: &WriterEngine,
    remote: &ParticipantProxyData,
    reader_id: EntityId,
) -> bool {
    writer.matched_reader_add(RemoteReaderInfo {
        guid: GUID::new(remote.guid_prefix, reader_id),
        reliable: true,
        durability: Durability::TransientLocal,
        locators: metatraffic_locators(remote),
    })
}

/// Pair a local built-in reader with the remote built-in writer `writer_id`.
pub fn match_builtin_reader(
    reader: &ReaderEngine,
    remote: &ParticipantProxyData,
    writer_id: EntityId,
) -> bool {
    reader.matched_writer_add(RemoteWriterInfo::new(
        GUID::new(remote.guid_prefix, writer_id),
        true,
        metatraffic_locators(remote),
    ))
}

pub struct Edp {
    publications_writer: Arc<WriterEngine>,
    publications_reader: Arc<ReaderEngine>,
    subscriptions_writer: Arc<WriterEngine>,
    subscriptions_reader: Arc<ReaderEngine>,
}

impl Edp {
    pub fn new(
        prefix: GuidPrefix,
        sender: &Arc<RtpsSender>,
        writer_timing: WriterTiming,
        reader_timing: ReaderTiming,
    ) -> Self {
        let writer = |id| {
            Arc::new(WriterEngine::new(
                GUID::new(prefix, id),
                builtin_qos(),
                Arc::clone(sender),
                writer_timing,
            ))
        };
        let reader = |id| {
            Arc::new(ReaderEngine::new(
                GUID::new(prefix, id),
                builtin_qos(),
                Arc::clone(sender),
                reader_timing,
            ))
        };
        Self {
            publications_writer: writer(EntityId::SEDP_PUBLICATIONS_WRITER),
            publications_reader: reader(EntityId::SEDP_PUBLICATIONS_READER),
            subscriptions_writer: writer(EntityId::SEDP_SUBSCRIPTIONS_WRITER),
            subscriptions_reader: reader(EntityId::SEDP_SUBSCRIPTIONS_READER),
        }
    }

    pub fn writers(&self) -> [&Arc<WriterEngine>; 2] {
        [&self.publications_writer, &self.subscriptions_writer]
    }

    pub fn readers(&self) -> [&Arc<ReaderEngine>; 2] {
        [&self.publications_reader, &self.subscriptions_reader]
    }

    pub fn writer(&self, id: EntityId) -> Option<&Arc<WriterEngine>> {
        self.writers().into_iter().find(|w| w.guid().entity_id == id)
    }

    pub fn reader(&self, id: EntityId) -> Option<&Arc<ReaderEngine>> {
        self.readers().into_iter().find(|r| r.guid().entity_id == id)
    }

    /// Pair the local built-in endpoints with the ones `remote` advertises.
    pub fn assign_remote(&self, remote: &ParticipantProxyData) {
        use builtin_endpoint::*;
        if remote.has_builtin(PUBLICATIONS_DETECTOR) {
            match_builtin_writer(&self.publications_writer, remote, EntityId::SEDP_PUBLICATIONS_READER);
        }
        if remote.has_builtin(PUBLICATIONS_ANNOUNCER) {
            match_builtin_reader(&self.publications_reader, remote, EntityId::SEDP_PUBLICATIONS_WRITER);
        }
        if remote.has_builtin(SUBSCRIPTIONS_DETECTOR) {
            match_builtin_writer(
                &self.subscriptions_writer,
                remote,
                EntityId::SEDP_SUBSCRIPTIONS_READER,
            );
        }
        if remote.has_builtin(SUBSCRIPTIONS_ANNOUNCER) {
            match_builtin_reader(
                &self.subscriptions_reader,
                remote,
                EntityId::SEDP_SUBSCRIPTIONS_WRITER,
            );
        }
    }

    /// Forget a remote participant's built-in endpoints.
    pub fn remove_remote(&self, prefix: GuidPrefix) {
        self.publications_writer
            .matched_reader_remove(&GUID::new(prefix, EntityId::SEDP_PUBLICATIONS_READER));
        self.publications_reader
            .matched_writer_remove(&GUID::new(prefix, EntityId::SEDP_PUBLICATIONS_WRITER));
        self.subscriptions_writer
            .matched_reader_remove(&GUID::new(prefix, EntityId::SEDP_SUBSCRIPTIONS_READER));
        self.subscriptions_reader
            .matched_writer_remove(&GUID::new(prefix, EntityId::SEDP_SUBSCRIPTIONS_WRITER));
    }

    pub fn announce_writer(&self, data: &WriterProxyData) -> Result<i64> {
        log::debug!("[EDP] announcing writer {} on '{}'", data.guid, data.topic_name);
        self.publications_writer.write(
            Payload::from_vec(codec::encode_writer(data)),
            Some(InstanceHandle::from_guid(&data.guid)),
            Time::now(),
        )
    }

    pub fn announce_reader(&self, data: &ReaderProxyData) -> Result<i64> {
        log::debug!("[EDP] announcing reader {} on '{}'", data.guid, data.topic_name);
        self.subscriptions_writer.write(
            Payload::from_vec(codec::encode_reader(data)),
            Some(InstanceHandle::from_guid(&data.guid)),
            Time::now(),
        )
    }

    pub fn dispose_writer(&self, guid: &GUID) -> Result<i64> {
        log::debug!("[EDP] disposing writer {}", guid);
        dispose(&self.publications_writer, guid)
    }

    pub fn dispose_reader(&self, guid: &GUID) -> Result<i64> {
        log::debug!("[EDP] disposing reader {}", guid);
        dispose(&self.subscriptions_writer, guid)
    }

    /// Drain and decode both built-in readers. Malformed announcements are
    /// logged and dropped.
    pub fn take_events(&self) -> Vec<EdpEvent> {
        let mut events = Vec::new();
        for (change, _) in self.publications_reader.take_all() {
            if !change.kind.is_alive() {
                if let Some(instance) = change.instance {
                    events.push(EdpEvent::WriterDisposed(GUID::from_bytes(instance.0)));
                }
                continue;
            }
            match codec::decode_writer(&change.payload) {
                Ok(data) => events.push(EdpEvent::WriterAnnounced(data)),
                Err(e) => log::debug!("[EDP] dropping publication from {}: {}", change.writer_guid, e),
            }
        }
        for (change, _) in self.subscriptions_reader.take_all() {
            if !change.kind.is_alive() {
                if let Some(instance) = change.instance {
                    events.push(EdpEvent::ReaderDisposed(GUID::from_bytes(instance.0)));
                }
                continue;
            }
            match codec::decode_reader(&change.payload) {
                Ok(data) => events.push(EdpEvent::ReaderAnnounced(data)),
                Err(e) => log::debug!("[EDP] dropping subscription from {}: {}", change.writer_guid, e),
            }
        }
        events
    }
}

fn dispose(writer: &WriterEngine, guid: &GUID) -> Result<i64> {
    writer.write_change(
        ChangeKind::NotAliveDisposedUnregistered,
        Some(InstanceHandle::from_guid(guid)),
        Payload::empty(),
        Time::now(),
    )
}

impl std::fmt::Debug for Edp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edp")
            .field("publications", &self.publications_writer.history().len())
            .field("subscriptions", &self.subscriptions_writer.history().len())
            .finish()
    }
}
