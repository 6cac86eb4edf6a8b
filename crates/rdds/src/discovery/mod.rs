// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery: participants (SPDP), endpoints (SEDP) and matching.
//!
//! # Architecture
//!
//! ```text
//!  SPDP DATA ──► Pdp::parse ──► ParticipantDb ──► Edp::assign_remote (+ WLP)
//!                                                        │
//!  SEDP DATA ──► built-in ReaderEngine ──► Edp::take_events
//!                                                        │
//!                            matcher::match_endpoints ◄──┘
//!                                   │
//!              WriterEngine::matched_reader_add / ReaderEngine::matched_writer_add
//! ```
//!
//! All tables live behind one [`Discovery`] lock. Lock order is
//! discovery, then engine, then history. Endpoint notifications are queued
//! under the lock and delivered after it is released.

pub mod codec;
pub mod edp;
pub mod matcher;
pub mod participant_db;
pub mod pdp;
pub mod proxy;
pub mod seen_table;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::RuntimeConfig;
use crate::core::{
    filter_remote_locators, EntityId, EventThread, ExternalLocator, ExternalLocatorPolicy, GuidPrefix, Locator,
    TimerAction, TimerHandle, GUID,
};
use crate::liveliness::{assertion_period, LivelinessManager, Wlp};
use crate::protocol::{Data, ProtocolError};
use crate::qos::LivelinessKind;
use crate::reader::{ReaderEngine, ReaderEvents, ReaderTiming, RemoteWriterInfo};
use crate::transport::RtpsSender;
use crate::writer::{RemoteReaderInfo, WriterEngine, WriterTiming};

pub use edp::{Edp, EdpEvent};
pub use matcher::{match_endpoints, MatchResult};
pub use participant_db::{ParticipantDb, ParticipantUpdate};
pub use pdp::{Pdp, SpdpMessage};
pub use proxy::{
    builtin_endpoint, ParticipantEntry, ParticipantProxyData, ParticipantState, ReaderProxyData,
    WriterProxyData,
};
pub use seen_table::SeenTable;

/// Errors raised while decoding discovery traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Parameter list could not be decoded or a value is out of range.
    Malformed(String),
    /// Announcement without a participant/endpoint GUID.
    MissingGuid,
    /// Announcement for another domain.
    DomainMismatch { expected: u32, got: u32 },
    /// Endpoint announced by a participant we have not discovered.
    UnknownParticipant(GuidPrefix),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::Malformed(msg) => write!(f, "Malformed announcement: {}", msg),
            DiscoveryError::MissingGuid => write!(f, "Announcement without GUID"),
            DiscoveryError::DomainMismatch { expected, got } => {
                write!(f, "Domain mismatch: expected {}, got {}", expected, got)
            }
            DiscoveryError::UnknownParticipant(prefix) => {
                write!(f, "Unknown participant {}", prefix)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<ProtocolError> for DiscoveryError {
    fn from(e: ProtocolError) -> Self {
        DiscoveryError::Malformed(e.to_string())
    }
}

/// Matching notifications for a local endpoint.
///
/// Called after the discovery lock is released, on a transport receive
/// thread, the event thread, or the application thread that created or
/// deleted an endpoint.
pub trait EndpointEvents: Send + Sync {
    fn on_matched(&self, _remote: GUID) {}
    fn on_unmatched(&self, _remote: GUID) {}
    fn on_incompatible_qos(&self, _remote: GUID, _policy: &'static str) {}
}

/// Local writer registered with discovery.
#[derive(Clone)]
pub struct LocalWriter {
    pub data: WriterProxyData,
    pub engine: Arc<WriterEngine>,
    pub events: Arc<dyn EndpointEvents>,
}

/// Local reader registered with discovery.
#[derive(Clone)]
pub struct LocalReader {
    pub data: ReaderProxyData,
    pub engine: Arc<ReaderEngine>,
    pub events: Arc<dyn EndpointEvents>,
}

enum Notice {
    Matched(GUID),
    Unmatched(GUID),
    Incompatible(GUID, &'static str),
}

type Notices = Vec<(Arc<dyn EndpointEvents>, Notice)>;

#[derive(Default)]
struct DiscoveryState {
    participants: ParticipantDb,
    seen: SeenTable,
    local_writers: HashMap<GUID, LocalWriter>,
    local_readers: HashMap<GUID, LocalReader>,
    remote_writers: HashMap<GUID, WriterProxyData>,
    remote_readers: HashMap<GUID, ReaderProxyData>,
    /// Linked `(writer, reader)` pairs.
    matches: HashSet<(GUID, GUID)>,
    /// Pairs already reported as QoS-incompatible.
    incompatible: HashSet<(GUID, GUID)>,
}

pub struct Discovery {
    prefix: GuidPrefix,
    config: Arc<RuntimeConfig>,
    pdp: Pdp,
    edp: Edp,
    wlp: Arc<Wlp>,
    remote_liveliness: Arc<LivelinessManager>,
    state: Mutex<DiscoveryState>,
    external: RwLock<(Vec<ExternalLocator>, ExternalLocatorPolicy)>,
    announce_timer: Mutex<Option<TimerHandle>>,
    lease_timer: Mutex<Option<TimerHandle>>,
    wlp_timer: Mutex<Option<TimerHandle>>,
    announcements: AtomicU32,
}

impl Discovery {
    /// Build the discovery machinery of one participant.
    ///
    /// `spdp_targets` is where SPDP announcements go besides known peers
    /// (the metatraffic multicast locator and any configured initial peers).
    /// `remote_liveliness` tracks matched remote writers.
    pub fn new(
        local: ParticipantProxyData,
        sender: Arc<RtpsSender>,
        config: Arc<RuntimeConfig>,
        spdp_targets: Vec<Locator>,
        remote_liveliness: Arc<LivelinessManager>,
    ) -> Arc<Self> {
        crate::trace_fn!("Discovery::new");
        let prefix = local.guid_prefix;
        let timing = config.timing();
        let writer_timing = WriterTiming::from(&*timing);
        let reader_timing = ReaderTiming::from(&*timing);

        let edp = Edp::new(prefix, &sender, writer_timing, reader_timing);
        let (wlp_writer, wlp_reader) = Wlp::endpoints(prefix);
        let wlp = Wlp::new(
            prefix,
            Arc::new(WriterEngine::new(
                wlp_writer,
                edp::builtin_qos(),
                Arc::clone(&sender),
                writer_timing,
            )),
            Arc::new(ReaderEngine::new(
                wlp_reader,
                edp::builtin_qos(),
                Arc::clone(&sender),
                reader_timing,
            )),
            Arc::clone(&remote_liveliness),
        );

        let discovery = Arc::new(Self {
            prefix,
            config,
            pdp: Pdp::new(sender, local, spdp_targets),
            edp,
            wlp,
            remote_liveliness,
            state: Mutex::new(DiscoveryState::default()),
            external: RwLock::new((Vec::new(), ExternalLocatorPolicy::default())),
            announce_timer: Mutex::new(None),
            lease_timer: Mutex::new(None),
            wlp_timer: Mutex::new(None),
            announcements: AtomicU32::new(0),
        });
        let events: Arc<dyn ReaderEvents> = Arc::new(SedpEvents(Arc::downgrade(&discovery)));
        for reader in discovery.edp.readers() {
            reader.set_listener(Some(Arc::clone(&events)));
        }
        discovery
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.prefix
    }

    pub fn pdp(&self) -> &Pdp {
        &self.pdp
    }

    pub fn edp(&self) -> &Edp {
        &self.edp
    }

    pub fn wlp(&self) -> &Arc<Wlp> {
        &self.wlp
    }

    pub fn remote_liveliness(&self) -> &Arc<LivelinessManager> {
        &self.remote_liveliness
    }

    /// Our externally reachable addresses. Remote endpoints matched from
    /// now on are reached through the best-ranked of their locators.
    pub fn set_external_locators(&self, locators: Vec<ExternalLocator>, policy: ExternalLocatorPolicy) {
        *self.external.write() = (locators, policy);
    }

    fn route(&self, prefix: &GuidPrefix, locators: Vec<Locator>) -> Vec<Locator> {
        if *prefix == self.prefix {
            return locators;
        }
        let external = self.external.read();
        filter_remote_locators(&locators, &external.0, &external.1)
    }

    /// Built-in writer engine addressed by `id`, if any.
    pub fn builtin_writer(&self, id: EntityId) -> Option<&Arc<WriterEngine>> {
        if id == EntityId::PARTICIPANT_MESSAGE_WRITER {
            return Some(self.wlp.writer());
        }
        self.edp.writer(id)
    }

    /// Built-in reader engine addressed by `id`, if any.
    pub fn builtin_reader(&self, id: EntityId) -> Option<&Arc<ReaderEngine>> {
        if id == EntityId::PARTICIPANT_MESSAGE_READER {
            return Some(self.wlp.reader());
        }
        self.edp.reader(id)
    }

    /// Built-in reader fed by the remote built-in writer `writer_id`.
    pub fn builtin_reader_for_writer(&self, writer_id: EntityId) -> Option<&Arc<ReaderEngine>> {
        match writer_id {
            id if id == EntityId::SEDP_PUBLICATIONS_WRITER => {
                self.edp.reader(EntityId::SEDP_PUBLICATIONS_READER)
            }
            id if id == EntityId::SEDP_SUBSCRIPTIONS_WRITER => {
                self.edp.reader(EntityId::SEDP_SUBSCRIPTIONS_READER)
            }
            id if id == EntityId::PARTICIPANT_MESSAGE_WRITER => Some(self.wlp.reader()),
            _ => None,
        }
    }

    // ========================================================================
    // Participants (SPDP)
    // ========================================================================

    /// Handle an SPDP DATA.
    pub fn on_spdp(&self, data: &Data) {
        let message = match self.pdp.parse(data) {
            Ok(m) => m,
            Err(DiscoveryError::DomainMismatch { expected, got }) => {
                log::trace!("[PDP] ignoring announcement for domain {} (we are {})", got, expected);
                return;
            }
            Err(e) => {
                log::debug!("[PDP] dropping malformed announcement: {}", e);
                return;
            }
        };
        match message {
            SpdpMessage::Announce(remote) => self.on_participant_announced(remote, data.writer_sn),
            SpdpMessage::Dispose(prefix) => {
                if prefix == self.prefix {
                    return;
                }
                let mut notices = Notices::new();
                {
                    let mut state = self.state.lock();
                    if state.participants.remove(&prefix).is_some() {
                        log::info!("[PDP] participant {} removed itself", prefix);
                        self.teardown_participant(&mut state, prefix, &mut notices);
                    }
                }
                deliver(notices);
            }
        }
    }

    fn on_participant_announced(&self, remote: ParticipantProxyData, seq: i64) {
        let prefix = remote.guid_prefix;
        if prefix == self.prefix {
            return;
        }
        let now = Instant::now();
        let reply_to = {
            let mut state = self.state.lock();
            // Duplicates still renew the lease.
            if state.seen.is_seen(Pdp::writer_guid(prefix), seq) && state.participants.renew(&prefix, now) {
                return;
            }
            match state.participants.merge(remote.clone(), now) {
                ParticipantUpdate::New => {
                    log::info!(
                        "[PDP] discovered participant {} (domain {}, lease {:?})",
                        prefix,
                        remote.domain_id,
                        remote.lease_duration
                    );
                    self.assign_builtin(&remote);
                    state.participants.set_state(&prefix, ParticipantState::Alive);
                    Some(edp::metatraffic_locators(&remote))
                }
                ParticipantUpdate::Changed => {
                    log::debug!("[PDP] participant {} updated its announcement", prefix);
                    self.assign_builtin(&remote);
                    None
                }
                ParticipantUpdate::Renewed => None,
            }
        };
        // Let the newcomer learn about us without waiting for the next period.
        if let Some(peers) = reply_to {
            self.pdp.announce(&peers);
        }
    }

    fn assign_builtin(&self, remote: &ParticipantProxyData) {
        self.edp.assign_remote(remote);
        if remote.has_builtin(builtin_endpoint::PARTICIPANT_MESSAGE_READER) {
            edp::match_builtin_writer(self.wlp.writer(), remote, EntityId::PARTICIPANT_MESSAGE_READER);
        }
        if remote.has_builtin(builtin_endpoint::PARTICIPANT_MESSAGE_WRITER) {
            edp::match_builtin_reader(self.wlp.reader(), remote, EntityId::PARTICIPANT_MESSAGE_WRITER);
        }
    }

    /// Remove every proxy of `prefix`. Called with the discovery lock held.
    fn teardown_participant(&self, state: &mut DiscoveryState, prefix: GuidPrefix, notices: &mut Notices) {
        let writers: Vec<GUID> = state
            .remote_writers
            .keys()
            .filter(|g| g.prefix == prefix)
            .copied()
            .collect();
        for guid in writers {
            self.remove_remote_writer(state, &guid, notices);
        }
        let readers: Vec<GUID> = state
            .remote_readers
            .keys()
            .filter(|g| g.prefix == prefix)
            .copied()
            .collect();
        for guid in readers {
            self.remove_remote_reader(state, &guid, notices);
        }
        self.edp.remove_remote(prefix);
        let (wlp_writer, wlp_reader) = Wlp::endpoints(prefix);
        self.wlp.writer().matched_reader_remove(&wlp_reader);
        self.wlp.reader().matched_writer_remove(&wlp_writer);
        state.seen.forget_writer(&Pdp::writer_guid(prefix));
    }

    /// Drop participants whose lease expired. Returns how many were dropped.
    pub fn check_leases(&self, now: Instant) -> usize {
        let mut notices = Notices::new();
        let dropped = {
            let mut state = self.state.lock();
            let expired = state.participants.expire(now);
            for entry in &expired {
                log::info!(
                    "[PDP] participant {} lease expired ({:?})",
                    entry.data.guid_prefix,
                    entry.data.lease_duration
                );
                self.teardown_participant(&mut state, entry.data.guid_prefix, &mut notices);
            }
            expired.len()
        };
        deliver(notices);
        dropped
    }

    pub fn participant_state(&self, prefix: &GuidPrefix) -> ParticipantState {
        self.state.lock().participants.state_of(prefix)
    }

    pub fn participants(&self) -> Vec<ParticipantProxyData> {
        self.state
            .lock()
            .participants
            .iter()
            .map(|e| e.data.clone())
            .collect()
    }

    /// Send our SPDP announcement to the targets and every known peer.
    pub fn announce(&self) {
        let peers: Vec<Locator> = {
            let state = self.state.lock();
            state
                .participants
                .iter()
                .flat_map(|e| edp::metatraffic_locators(&e.data))
                .collect()
        };
        self.pdp.announce(&peers);
    }

    /// Announce our removal to every known peer.
    pub fn announce_removal(&self) {
        let peers: Vec<Locator> = {
            let state = self.state.lock();
            state
                .participants
                .iter()
                .flat_map(|e| edp::metatraffic_locators(&e.data))
                .collect()
        };
        self.pdp.announce_removal(&peers);
    }

    // ========================================================================
    // Endpoints (SEDP)
    // ========================================================================

    /// Register a local writer, match it and announce it.
    pub fn add_local_writer(&self, writer: LocalWriter) -> crate::dds::Result<()> {
        crate::trace_fn!("Discovery::add_local_writer");
        let guid = writer.data.guid;
        let data = writer.data.clone();
        let mut notices = Notices::new();
        {
            let mut state = self.state.lock();
            state.local_writers.insert(guid, writer);
            let readers: Vec<GUID> = state
                .local_readers
                .keys()
                .chain(state.remote_readers.keys())
                .copied()
                .collect();
            for reader in readers {
                self.evaluate(&mut state, guid, reader, &mut notices);
            }
            self.edp.announce_writer(&data)?;
        }
        deliver(notices);
        self.rearm_wlp();
        Ok(())
    }

    /// Register a local reader, match it and announce it.
    pub fn add_local_reader(&self, reader: LocalReader) -> crate::dds::Result<()> {
        crate::trace_fn!("Discovery::add_local_reader");
        let guid = reader.data.guid;
        let data = reader.data.clone();
        let mut notices = Notices::new();
        {
            let mut state = self.state.lock();
            state.local_readers.insert(guid, reader);
            let writers: Vec<GUID> = state
                .local_writers
                .keys()
                .chain(state.remote_writers.keys())
                .copied()
                .collect();
            for writer in writers {
                self.evaluate(&mut state, writer, guid, &mut notices);
            }
            self.edp.announce_reader(&data)?;
        }
        deliver(notices);
        Ok(())
    }

    /// Change the announced QoS of a local writer and re-run matching.
    pub fn update_local_writer(&self, guid: &GUID, qos: crate::qos::QoS) -> crate::dds::Result<()> {
        let mut notices = Notices::new();
        {
            let mut state = self.state.lock();
            let Some(local) = state.local_writers.get_mut(guid) else {
                return Err(crate::dds::Error::AlreadyDeleted);
            };
            local.data.qos = qos;
            let data = local.data.clone();
            let readers: Vec<GUID> = state
                .local_readers
                .keys()
                .chain(state.remote_readers.keys())
                .copied()
                .collect();
            for reader in readers {
                self.evaluate(&mut state, *guid, reader, &mut notices);
            }
            self.edp.announce_writer(&data)?;
        }
        deliver(notices);
        self.rearm_wlp();
        Ok(())
    }

    /// Change the announced QoS of a local reader and re-run matching.
    pub fn update_local_reader(&self, guid: &GUID, qos: crate::qos::QoS) -> crate::dds::Result<()> {
        let mut notices = Notices::new();
        {
            let mut state = self.state.lock();
            let Some(local) = state.local_readers.get_mut(guid) else {
                return Err(crate::dds::Error::AlreadyDeleted);
            };
            local.data.qos = qos;
            let data = local.data.clone();
            let writers: Vec<GUID> = state
                .local_writers
                .keys()
                .chain(state.remote_writers.keys())
                .copied()
                .collect();
            for writer in writers {
                self.evaluate(&mut state, writer, *guid, &mut notices);
            }
            self.edp.announce_reader(&data)?;
        }
        deliver(notices);
        Ok(())
    }

    /// Unregister a local writer, unmatch it everywhere and announce the disposal.
    pub fn remove_local_writer(&self, guid: &GUID) -> crate::dds::Result<()> {
        let mut notices = Notices::new();
        {
            let mut state = self.state.lock();
            let Some(local) = state.local_writers.remove(guid) else {
                return Ok(());
            };
            let pairs: Vec<(GUID, GUID)> = state.matches.iter().filter(|(w, _)| w == guid).copied().collect();
            for (w, r) in pairs {
                state.matches.remove(&(w, r));
                local.engine.matched_reader_remove(&r);
                if let Some(reader) = state.local_readers.get(&r) {
                    reader.engine.matched_writer_remove(&w);
                    notices.push((Arc::clone(&reader.events), Notice::Unmatched(w)));
                }
            }
            state.incompatible.retain(|(w, _)| w != guid);
            self.edp.dispose_writer(guid)?;
        }
        deliver(notices);
        self.rearm_wlp();
        Ok(())
    }

    /// Unregister a local reader, unmatch it everywhere and announce the disposal.
    pub fn remove_local_reader(&self, guid: &GUID) -> crate::dds::Result<()> {
        let mut notices = Notices::new();
        {
            let mut state = self.state.lock();
            let Some(local) = state.local_readers.remove(guid) else {
                return Ok(());
            };
            let pairs: Vec<(GUID, GUID)> = state.matches.iter().filter(|(_, r)| r == guid).copied().collect();
            for (w, r) in pairs {
                state.matches.remove(&(w, r));
                local.engine.matched_writer_remove(&w);
                if let Some(writer) = state.local_writers.get(&w) {
                    writer.engine.matched_reader_remove(&r);
                    notices.push((Arc::clone(&writer.events), Notice::Unmatched(r)));
                }
                self.release_remote_writer_liveliness(&state, &w);
            }
            state.incompatible.retain(|(_, r)| r != guid);
            self.edp.dispose_reader(guid)?;
        }
        deliver(notices);
        Ok(())
    }

    /// Apply pending SEDP announcements.
    pub fn process_edp(&self) -> usize {
        // Drained before locking: take may re-enter through the reader listener.
        let events = self.edp.take_events();
        if events.is_empty() {
            return 0;
        }
        let count = events.len();
        let mut notices = Notices::new();
        {
            let mut state = self.state.lock();
            for event in events {
                match event {
                    EdpEvent::WriterAnnounced(data) => self.on_remote_writer(&mut state, data, &mut notices),
                    EdpEvent::ReaderAnnounced(data) => self.on_remote_reader(&mut state, data, &mut notices),
                    EdpEvent::WriterDisposed(guid) => {
                        log::debug!("[EDP] remote writer {} disposed", guid);
                        self.remove_remote_writer(&mut state, &guid, &mut notices);
                    }
                    EdpEvent::ReaderDisposed(guid) => {
                        log::debug!("[EDP] remote reader {} disposed", guid);
                        self.remove_remote_reader(&mut state, &guid, &mut notices);
                    }
                }
            }
        }
        deliver(notices);
        count
    }

    fn on_remote_writer(&self, state: &mut DiscoveryState, data: WriterProxyData, notices: &mut Notices) {
        let guid = data.guid;
        if guid.prefix == self.prefix {
            return;
        }
        if !state.participants.contains(&guid.prefix) {
            log::debug!("[EDP] ignoring writer {}: {}", guid, DiscoveryError::UnknownParticipant(guid.prefix));
            return;
        }
        log::debug!("[EDP] remote writer {} on '{}' ({})", guid, data.topic_name, data.type_name);
        state.remote_writers.insert(guid, data);
        let readers: Vec<GUID> = state.local_readers.keys().copied().collect();
        for reader in readers {
            self.evaluate(state, guid, reader, notices);
        }
    }

    fn on_remote_reader(&self, state: &mut DiscoveryState, data: ReaderProxyData, notices: &mut Notices) {
        let guid = data.guid;
        if guid.prefix == self.prefix {
            return;
        }
        if !state.participants.contains(&guid.prefix) {
            log::debug!("[EDP] ignoring reader {}: {}", guid, DiscoveryError::UnknownParticipant(guid.prefix));
            return;
        }
        log::debug!("[EDP] remote reader {} on '{}' ({})", guid, data.topic_name, data.type_name);
        state.remote_readers.insert(guid, data);
        let writers: Vec<GUID> = state.local_writers.keys().copied().collect();
        for writer in writers {
            self.evaluate(state, writer, guid, notices);
        }
    }

    fn remove_remote_writer(&self, state: &mut DiscoveryState, guid: &GUID, notices: &mut Notices) {
        if state.remote_writers.remove(guid).is_none() {
            return;
        }
        let pairs: Vec<(GUID, GUID)> = state.matches.iter().filter(|(w, _)| w == guid).copied().collect();
        for pair in pairs {
            self.unlink(state, pair, notices);
        }
        state.incompatible.retain(|(w, _)| w != guid);
        self.remote_liveliness.remove_writer(guid);
    }

    fn remove_remote_reader(&self, state: &mut DiscoveryState, guid: &GUID, notices: &mut Notices) {
        if state.remote_readers.remove(guid).is_none() {
            return;
        }
        let pairs: Vec<(GUID, GUID)> = state.matches.iter().filter(|(_, r)| r == guid).copied().collect();
        for pair in pairs {
            self.unlink(state, pair, notices);
        }
        state.incompatible.retain(|(_, r)| r != guid);
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Re-run matching for one pair and link/unlink accordingly.
    fn evaluate(&self, state: &mut DiscoveryState, writer: GUID, reader: GUID, notices: &mut Notices) {
        let writer_data = state
            .local_writers
            .get(&writer)
            .map(|w| w.data.clone())
            .or_else(|| state.remote_writers.get(&writer).cloned());
        let reader_data = state
            .local_readers
            .get(&reader)
            .map(|r| r.data.clone())
            .or_else(|| state.remote_readers.get(&reader).cloned());
        let (Some(w), Some(r)) = (writer_data, reader_data) else {
            return;
        };
        let linked = state.matches.contains(&(writer, reader));
        match match_endpoints(&w, &r) {
            MatchResult::Matched => {
                state.incompatible.remove(&(writer, reader));
                if !linked {
                    self.link(state, &w, &r, notices);
                } else if let Some(local) = state.local_readers.get(&reader) {
                    // Mutable writer QoS the reader acts on.
                    local
                        .engine
                        .update_writer_qos(&writer, w.qos.ownership.strength, w.qos.lifespan);
                }
            }
            MatchResult::IncompatibleQos(policy) => {
                if linked {
                    self.unlink(state, (writer, reader), notices);
                }
                if state.incompatible.insert((writer, reader)) {
                    if let Some(local) = state.local_writers.get(&writer) {
                        notices.push((Arc::clone(&local.events), Notice::Incompatible(reader, policy)));
                    }
                    if let Some(local) = state.local_readers.get(&reader) {
                        notices.push((Arc::clone(&local.events), Notice::Incompatible(writer, policy)));
                    }
                }
            }
            MatchResult::Unrelated | MatchResult::PartitionMismatch => {
                if linked {
                    self.unlink(state, (writer, reader), notices);
                }
            }
        }
    }

    fn link(&self, state: &mut DiscoveryState, w: &WriterProxyData, r: &ReaderProxyData, notices: &mut Notices) {
        let local_data = self.pdp.local_data();
        let participant = |prefix: &GuidPrefix| {
            if *prefix == self.prefix {
                Some(local_data.clone())
            } else {
                state.participants.get(prefix).map(|e| e.data.clone())
            }
        };
        let (Some(writer_participant), Some(reader_participant)) =
            (participant(&w.guid.prefix), participant(&r.guid.prefix))
        else {
            return;
        };

        log::debug!("[MATCH] {} -> {} on '{}'", w.guid, r.guid, w.topic_name);
        state.matches.insert((w.guid, r.guid));
        if let Some(local) = state.local_writers.get(&w.guid) {
            local.engine.matched_reader_add(RemoteReaderInfo {
                guid: r.guid,
                reliable: r.qos.is_reliable(),
                durability: r.qos.durability,
                locators: self.route(&r.guid.prefix, r.effective_locators(&reader_participant)),
            });
            notices.push((Arc::clone(&local.events), Notice::Matched(r.guid)));
        }
        if let Some(local) = state.local_readers.get(&r.guid) {
            local.engine.matched_writer_add(RemoteWriterInfo {
                guid: w.guid,
                reliable: r.qos.is_reliable(),
                locators: self.route(&w.guid.prefix, w.effective_locators(&writer_participant)),
                ownership_strength: w.qos.ownership.strength,
                lifespan: w.qos.lifespan,
            });
            notices.push((Arc::clone(&local.events), Notice::Matched(w.guid)));
            if w.guid.prefix != self.prefix {
                self.remote_liveliness
                    .add_writer(w.guid, w.qos.liveliness.kind, w.qos.liveliness.lease_duration);
            }
        }
    }

    fn unlink(&self, state: &mut DiscoveryState, pair: (GUID, GUID), notices: &mut Notices) {
        let (writer, reader) = pair;
        if !state.matches.remove(&pair) {
            return;
        }
        log::debug!("[MATCH] {} -x- {}", writer, reader);
        if let Some(local) = state.local_writers.get(&writer) {
            local.engine.matched_reader_remove(&reader);
            notices.push((Arc::clone(&local.events), Notice::Unmatched(reader)));
        }
        if let Some(local) = state.local_readers.get(&reader) {
            local.engine.matched_writer_remove(&writer);
            notices.push((Arc::clone(&local.events), Notice::Unmatched(writer)));
        }
        self.release_remote_writer_liveliness(state, &writer);
    }

    /// Stop tracking a remote writer once no local reader is matched to it.
    fn release_remote_writer_liveliness(&self, state: &DiscoveryState, writer: &GUID) {
        if writer.prefix == self.prefix {
            return;
        }
        if !state.matches.iter().any(|(w, _)| w == writer) {
            self.remote_liveliness.remove_writer(writer);
        }
    }

    pub fn is_matched(&self, writer: &GUID, reader: &GUID) -> bool {
        self.state.lock().matches.contains(&(*writer, *reader))
    }

    /// Local readers currently matched with `writer`.
    pub fn readers_matched_to(&self, writer: &GUID) -> Vec<LocalReader> {
        let state = self.state.lock();
        state
            .matches
            .iter()
            .filter(|(w, _)| w == writer)
            .filter_map(|(_, r)| state.local_readers.get(r).cloned())
            .collect()
    }

    pub fn remote_writers(&self) -> Vec<WriterProxyData> {
        self.state.lock().remote_writers.values().cloned().collect()
    }

    pub fn remote_readers(&self) -> Vec<ReaderProxyData> {
        self.state.lock().remote_readers.values().cloned().collect()
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Start announcements, lease checks, WLP assertions and the built-in
    /// endpoints' own timers.
    pub fn attach_timers(self: &Arc<Self>, events: &EventThread) {
        for writer in self.edp.writers() {
            writer.attach_timers(events);
        }
        for reader in self.edp.readers() {
            reader.attach_timers(events);
        }
        self.wlp.writer().attach_timers(events);
        self.wlp.reader().attach_timers(events);

        let weak = Arc::downgrade(self);
        let announce = events.create_idle(move || {
            let Some(discovery) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            discovery.announce();
            let sent = discovery.announcements.fetch_add(1, Ordering::Relaxed) + 1;
            let timing = discovery.config.timing();
            if sent < timing.initial_announcements {
                TimerAction::RearmAfter(timing.initial_announcement_period)
            } else {
                TimerAction::RearmAfter(timing.announcement_period)
            }
        });
        announce.restart(Duration::ZERO);

        let weak = Arc::downgrade(self);
        let lease = events.schedule_periodic(self.config.timing().lease_check_period, move || {
            let Some(discovery) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            discovery.check_leases(Instant::now());
            TimerAction::RearmAfter(discovery.config.timing().lease_check_period)
        });

        let weak = Arc::downgrade(self);
        let wlp = events.create_idle(move || {
            let Some(discovery) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            match discovery.automatic_assertion_period() {
                Some(period) => {
                    if let Err(e) = discovery.wlp.announce(LivelinessKind::Automatic) {
                        log::debug!("[LIVELINESS] automatic assertion failed: {}", e);
                    }
                    TimerAction::RearmAfter(period)
                }
                None => TimerAction::Stop,
            }
        });

        *self.announce_timer.lock() = Some(announce);
        *self.lease_timer.lock() = Some(lease);
        *self.wlp_timer.lock() = Some(wlp);
        self.rearm_wlp();
    }

    fn automatic_assertion_period(&self) -> Option<Duration> {
        let leases: Vec<Duration> = self
            .state
            .lock()
            .local_writers
            .values()
            .filter(|w| w.data.qos.liveliness.kind == LivelinessKind::Automatic)
            .map(|w| w.data.qos.liveliness.lease_duration)
            .collect();
        assertion_period(leases, self.config.timing().wlp_assert_divisor)
    }

    fn rearm_wlp(&self) {
        let Some(period) = self.automatic_assertion_period() else {
            return;
        };
        if let Some(timer) = self.wlp_timer.lock().as_ref() {
            if !timer.is_armed() {
                timer.restart(period);
            }
        }
    }

    /// Cancel every timer synchronously.
    pub fn detach_timers(&self) {
        for slot in [&self.announce_timer, &self.lease_timer, &self.wlp_timer] {
            let timer = slot.lock().take();
            if let Some(timer) = timer {
                timer.cancel();
            }
        }
        for writer in self.edp.writers() {
            writer.detach_timers();
        }
        for reader in self.edp.readers() {
            reader.detach_timers();
        }
        self.wlp.writer().detach_timers();
        self.wlp.reader().detach_timers();
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Discovery")
            .field("prefix", &self.prefix)
            .field("participants", &state.participants.len())
            .field("local_writers", &state.local_writers.len())
            .field("local_readers", &state.local_readers.len())
            .field("remote_writers", &state.remote_writers.len())
            .field("remote_readers", &state.remote_readers.len())
            .field("matches", &state.matches.len())
            .finish()
    }
}

fn deliver(notices: Notices) {
    for (events, notice) in notices {
        match notice {
            Notice::Matched(remote) => events.on_matched(remote),
            Notice::Unmatched(remote) => events.on_unmatched(remote),
            Notice::Incompatible(remote, policy) => events.on_incompatible_qos(remote, policy),
        }
    }
}

struct SedpEvents(Weak<Discovery>);

impl ReaderEvents for SedpEvents {
    fn on_data_available(&self) {
        if let Some(discovery) = self.0.upgrade() {
            discovery.process_edp();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;
    use crate::qos::QoS;
    use crate::transport::{ReceiverResource, Transport};
    use std::net::Ipv4Addr;

    struct Null;

    impl Transport for Null {
        fn send(&self, _dest: &Locator, _bytes: &[u8]) -> crate::dds::Result<()> {
            Ok(())
        }
        fn open_output_channel(&self, _dest: &Locator) -> crate::dds::Result<()> {
            Ok(())
        }
        fn open_input_channel(
            &self,
            _locator: &Locator,
            _receiver: Arc<dyn ReceiverResource>,
        ) -> crate::dds::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EndpointEvents for Recorder {
        fn on_matched(&self, remote: GUID) {
            self.0.lock().push(format!("matched {}", remote));
        }
        fn on_unmatched(&self, remote: GUID) {
            self.0.lock().push(format!("unmatched {}", remote));
        }
        fn on_incompatible_qos(&self, _remote: GUID, policy: &'static str) {
            self.0.lock().push(format!("incompatible {}", policy));
        }
    }

    fn discovery(n: u8) -> (Arc<Discovery>, Arc<RtpsSender>) {
        let prefix = GuidPrefix([n; 12]);
        let sender = Arc::new(RtpsSender::new(Arc::new(Null), prefix));
        let mut local = ParticipantProxyData::new(prefix, 0);
        local.default_unicast = vec![Locator::udpv4(Ipv4Addr::new(127, 0, 0, n), 7411)];
        local.metatraffic_unicast = vec![Locator::udpv4(Ipv4Addr::new(127, 0, 0, n), 7410)];
        let d = Discovery::new(
            local,
            Arc::clone(&sender),
            Arc::new(RuntimeConfig::new(Timing::fast())),
            Vec::new(),
            Arc::new(LivelinessManager::new(None, true)),
        );
        (d, sender)
    }

    fn local_writer(
        d: &Discovery,
        sender: &Arc<RtpsSender>,
        key: u32,
        qos: QoS,
    ) -> (LocalWriter, Arc<Recorder>) {
        let guid = GUID::new(d.guid_prefix(), EntityId::user_writer(key, false));
        let events = Arc::new(Recorder::default());
        let writer = LocalWriter {
            data: WriterProxyData {
                guid,
                topic_name: "Square".into(),
                type_name: "ShapeType".into(),
                qos: qos.clone(),
                unicast_locators: Vec::new(),
                multicast_locators: Vec::new(),
            },
            engine: Arc::new(WriterEngine::new(guid, qos, Arc::clone(sender), WriterTiming::default())),
            events: events.clone(),
        };
        (writer, events)
    }

    fn local_reader(
        d: &Discovery,
        sender: &Arc<RtpsSender>,
        key: u32,
        qos: QoS,
    ) -> (LocalReader, Arc<Recorder>) {
        let guid = GUID::new(d.guid_prefix(), EntityId::user_reader(key, false));
        let events = Arc::new(Recorder::default());
        let reader = LocalReader {
            data: ReaderProxyData {
                guid,
                topic_name: "Square".into(),
                type_name: "ShapeType".into(),
                qos: qos.clone(),
                unicast_locators: Vec::new(),
                multicast_locators: Vec::new(),
            },
            engine: Arc::new(ReaderEngine::new(guid, qos, Arc::clone(sender), ReaderTiming::default())),
            events: events.clone(),
        };
        (reader, events)
    }

    fn spdp_from(d: &Discovery) -> Data {
        let local = d.pdp().local_data();
        Data {
            reader_id: EntityId::SPDP_READER,
            writer_id: EntityId::SPDP_WRITER,
            writer_sn: d.pdp().sequence_number(),
            inline_qos: None,
            serialized_payload: Some(codec::encode_participant(&local)),
            key_only: false,
        }
    }

    #[test]
    fn test_error_display() {
        let e = DiscoveryError::DomainMismatch { expected: 0, got: 3 };
        assert_eq!(e.to_string(), "Domain mismatch: expected 0, got 3");
        let e: DiscoveryError = ProtocolError::BadMagic.into();
        assert!(matches!(e, DiscoveryError::Malformed(_)));
    }

    #[test]
    fn test_local_pair_matches_in_both_directions() {
        let (d, sender) = discovery(1);
        let (reader, reader_events) = local_reader(&d, &sender, 1, QoS::reliable());
        let reader_engine = Arc::clone(&reader.engine);
        d.add_local_reader(reader).expect("reader");
        let (writer, writer_events) = local_writer(&d, &sender, 1, QoS::reliable());
        let writer_guid = writer.data.guid;
        let writer_engine = Arc::clone(&writer.engine);
        d.add_local_writer(writer).expect("writer");

        assert_eq!(writer_engine.matched_readers(), vec![reader_engine.guid()]);
        assert_eq!(reader_engine.matched_writers(), vec![writer_guid]);
        assert_eq!(writer_events.0.lock().len(), 1);
        assert_eq!(reader_events.0.lock().len(), 1);

        d.remove_local_writer(&writer_guid).expect("remove");
        assert!(reader_engine.matched_writers().is_empty());
        assert!(reader_events.0.lock()[1].starts_with("unmatched"));
    }

    #[test]
    fn test_incompatible_qos_reported_once_to_both_sides() {
        let (d, sender) = discovery(2);
        let (reader, reader_events) = local_reader(&d, &sender, 1, QoS::reliable());
        d.add_local_reader(reader).expect("reader");
        let (writer, writer_events) = local_writer(&d, &sender, 1, QoS::best_effort());
        let guid = writer.data.guid;
        d.add_local_writer(writer).expect("writer");
        d.update_local_writer(&guid, QoS::best_effort().deadline(Duration::from_secs(1)))
            .expect("update");

        assert_eq!(*writer_events.0.lock(), vec!["incompatible RELIABILITY".to_string()]);
        assert_eq!(*reader_events.0.lock(), vec!["incompatible RELIABILITY".to_string()]);
    }

    #[test]
    fn test_qos_update_can_unmatch() {
        let (d, sender) = discovery(3);
        let (reader, _) = local_reader(&d, &sender, 1, QoS::reliable());
        let reader_guid = reader.data.guid;
        d.add_local_reader(reader).expect("reader");
        let (writer, writer_events) = local_writer(&d, &sender, 1, QoS::reliable());
        let writer_guid = writer.data.guid;
        d.add_local_writer(writer).expect("writer");
        assert!(d.is_matched(&writer_guid, &reader_guid));

        d.update_local_reader(
            &reader_guid,
            QoS::reliable().partition(crate::qos::Partition::single("other")),
        )
        .expect("update");
        assert!(!d.is_matched(&writer_guid, &reader_guid));
        assert!(writer_events.0.lock()[1].starts_with("unmatched"));
    }

    #[test]
    fn test_spdp_discovery_renewal_and_expiry() {
        let (local, _) = discovery(4);
        let (remote, _) = discovery(5);
        let remote_prefix = remote.guid_prefix();

        local.on_spdp(&spdp_from(&remote));
        assert_eq!(local.participant_state(&remote_prefix), ParticipantState::Alive);
        assert_eq!(
            local.edp().writers()[0].matched_readers(),
            vec![GUID::new(remote_prefix, EntityId::SEDP_PUBLICATIONS_READER)]
        );

        // Same sequence number again: renewal only.
        local.on_spdp(&spdp_from(&remote));
        assert_eq!(local.participants().len(), 1);

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(local.check_leases(later), 1);
        assert_eq!(local.participant_state(&remote_prefix), ParticipantState::Unknown);
        assert!(local.edp().writers()[0].matched_readers().is_empty());
    }

    #[test]
    fn test_own_and_foreign_domain_announcements_ignored() {
        let (local, _) = discovery(6);
        local.on_spdp(&spdp_from(&local));
        assert!(local.participants().is_empty());

        let (remote, _) = discovery(7);
        remote.pdp().update_local(|p| p.domain_id = 9);
        local.on_spdp(&spdp_from(&remote));
        assert!(local.participants().is_empty());
    }

    #[test]
    fn test_remote_endpoints_match_and_participant_teardown() {
        let (local, sender) = discovery(8);
        let (remote, _) = discovery(9);
        let remote_prefix = remote.guid_prefix();
        let (reader, reader_events) = local_reader(&local, &sender, 1, QoS::reliable());
        let reader_engine = Arc::clone(&reader.engine);
        local.add_local_reader(reader).expect("reader");

        let remote_writer = WriterProxyData {
            guid: GUID::new(remote_prefix, EntityId::user_writer(1, false)),
            topic_name: "Square".into(),
            type_name: "ShapeType".into(),
            qos: QoS::reliable(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        };

        // Unknown participant: ignored.
        {
            let mut state = local.state.lock();
            let mut notices = Notices::new();
            local.on_remote_writer(&mut state, remote_writer.clone(), &mut notices);
            assert!(state.remote_writers.is_empty());
        }

        local.on_spdp(&spdp_from(&remote));
        let mut notices = Notices::new();
        {
            let mut state = local.state.lock();
            local.on_remote_writer(&mut state, remote_writer.clone(), &mut notices);
        }
        deliver(notices);
        assert_eq!(reader_engine.matched_writers(), vec![remote_writer.guid]);
        assert!(local.remote_liveliness().is_tracked(&remote_writer.guid));

        // Removal announced by the participant tears everything down.
        let dispose = Data {
            reader_id: EntityId::SPDP_READER,
            writer_id: EntityId::SPDP_WRITER,
            writer_sn: 99,
            inline_qos: Some(crate::protocol::InlineQos {
                key_hash: Some(GUID::new(remote_prefix, EntityId::PARTICIPANT).as_bytes()),
                status_info: Some(3),
            }),
            serialized_payload: None,
            key_only: true,
        };
        local.on_spdp(&dispose);
        assert!(reader_engine.matched_writers().is_empty());
        assert!(!local.remote_liveliness().is_tracked(&remote_writer.guid));
        assert_eq!(reader_events.0.lock().len(), 2);
    }
}
