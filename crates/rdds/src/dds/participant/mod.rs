// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # DDS Participant
//!
//! A [`Participant`] is the entry point of one application into a domain.
//! It owns the transport channels, the event thread, discovery and the
//! liveliness managers, and is the factory of [`DataWriter`]s and
//! [`DataReader`]s.
//!
//! ## Overview
//!
//! ```text
//! Participant
//! +-- EventThread            heartbeats, ACKNACK timers, SPDP, leases, WLP
//! +-- RtpsSender             shared by every engine
//! +-- Receiver               transport callback -> submessage dispatch
//! +-- Discovery              SPDP / SEDP / matching / WLP
//! +-- local liveliness       own MANUAL_* writers  -> on_liveliness_lost,
//! |                          and on_liveliness_changed of local readers
//! +-- remote liveliness      matched remote writers -> on_liveliness_changed
//! +-- writers / readers      DashMap<EntityId, Arc<..Inner>>
//! ```
//!
//! ## Ports
//!
//! The participant id is the first one in `0..=119` whose metatraffic
//! unicast port is free on the transport (or the one requested through the
//! builder). Ports follow the RTPS mapping in [`crate::config`].

mod builder;
mod receiver;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::reader::{DataReader, ReaderInner};
use super::registry::Registry;
use super::topic::TopicType;
use super::writer::{DataWriter, WriterInner};
use super::{Error, Result};
use crate::config::RuntimeConfig;
use crate::core::{EntityId, EventThread, GuidPrefix, Locator, PayloadPool, GUID};
use crate::discovery::{Discovery, ParticipantProxyData};
use crate::liveliness::{LivelinessManager, LivelinessStatus, LivelinessTransition};
use crate::qos::{LivelinessKind, QoS};
use crate::reader::ReaderEngine;
use crate::transport::RtpsSender;
use crate::writer::WriterEngine;

pub use builder::ParticipantBuilder;

/// Input locators opened for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantLocators {
    pub metatraffic_unicast: Locator,
    pub metatraffic_multicast: Locator,
    pub default_unicast: Locator,
}

impl ParticipantLocators {
    fn all(&self) -> [Locator; 3] {
        [
            self.metatraffic_unicast,
            self.metatraffic_multicast,
            self.default_unicast,
        ]
    }
}

pub struct Participant {
    name: String,
    domain_id: u32,
    participant_id: u32,
    prefix: GuidPrefix,
    registry: Weak<Registry>,
    config: Arc<RuntimeConfig>,
    sender: Arc<RtpsSender>,
    locators: ParticipantLocators,
    events: EventThread,
    discovery: Arc<Discovery>,
    local_liveliness: Arc<LivelinessManager>,
    remote_liveliness: Arc<LivelinessManager>,
    pool: Arc<PayloadPool>,
    writers: DashMap<EntityId, Arc<WriterInner>>,
    readers: DashMap<EntityId, Arc<ReaderInner>>,
    /// topic name -> type name
    topics: DashMap<String, &'static str>,
    next_entity: AtomicU32,
    autoenable: bool,
    closed: AtomicBool,
}

impl Participant {
    pub fn builder(registry: &Arc<Registry>) -> ParticipantBuilder {
        ParticipantBuilder::new(registry)
    }

    /// Participant on `domain_id` with default settings.
    pub fn new(registry: &Arc<Registry>, domain_id: u32) -> Result<Arc<Self>> {
        Self::builder(registry).domain_id(domain_id).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.prefix
    }

    pub fn guid(&self) -> GUID {
        GUID::new(self.prefix, EntityId::PARTICIPANT)
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    pub fn participant_id(&self) -> u32 {
        self.participant_id
    }

    pub fn locators(&self) -> ParticipantLocators {
        self.locators
    }

    /// Live tunables; changes apply to entities created afterwards.
    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    /// Remote participants currently known (alive or not yet expired).
    pub fn discovered_participants(&self) -> Vec<ParticipantProxyData> {
        self.discovery.participants()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn sender(&self) -> &Arc<RtpsSender> {
        &self.sender
    }

    pub(crate) fn events(&self) -> &EventThread {
        &self.events
    }

    pub(crate) fn local_liveliness(&self) -> &Arc<LivelinessManager> {
        &self.local_liveliness
    }

    pub(crate) fn remote_liveliness(&self) -> &Arc<LivelinessManager> {
        &self.remote_liveliness
    }

    pub(crate) fn payload_pool(&self) -> &Arc<PayloadPool> {
        &self.pool
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyDeleted);
        }
        Ok(())
    }

    fn next_key(&self) -> u32 {
        self.next_entity.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind `topic` to `T`'s type name, registering the type.
    fn register_topic<T: TopicType>(&self, topic: &str) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::BadParameter("empty topic name".into()));
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.register_type::<T>()?;
        }
        let bound = *self.topics.entry(topic.to_string()).or_insert(T::type_name());
        if bound != T::type_name() {
            return Err(Error::PreconditionNotMet(format!(
                "topic '{}' already bound to type {}",
                topic, bound
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Entity factory
    // ========================================================================

    /// Create a writer on `topic`. Enabled right away unless the participant
    /// was built with `autoenable(false)`.
    ///
    /// # Errors
    /// `BadParameter` / `InconsistentPolicy` for an invalid QoS,
    /// `PreconditionNotMet` if `topic` is bound to another type.
    pub fn create_writer<T: TopicType>(self: &Arc<Self>, topic: &str, qos: QoS) -> Result<DataWriter<T>> {
        self.try_create_writer(topic, qos).map_err(|e| {
            log::warn!("[WRITER] create_writer on '{}' failed: {}", topic, e);
            e
        })
    }

    fn try_create_writer<T: TopicType>(self: &Arc<Self>, topic: &str, qos: QoS) -> Result<DataWriter<T>> {
        self.check_open()?;
        qos.validate()?;
        self.register_topic::<T>(topic)?;
        let guid = GUID::new(self.prefix, EntityId::user_writer(self.next_key(), T::is_keyed()));
        let inner = Arc::new(WriterInner::new(guid, topic, T::type_name(), qos, self));
        self.writers.insert(guid.entity_id, Arc::clone(&inner));
        if self.autoenable {
            if let Err(e) = inner.enable() {
                self.writers.remove(&guid.entity_id);
                let _ = inner.teardown();
                return Err(e);
            }
        }
        log::debug!("[WRITER] created {} on '{}' ({})", guid, topic, T::type_name());
        Ok(DataWriter::new(inner))
    }

    /// Create a reader on `topic`.
    ///
    /// # Errors
    /// Same as [`Participant::create_writer`].
    pub fn create_reader<T: TopicType>(self: &Arc<Self>, topic: &str, qos: QoS) -> Result<DataReader<T>> {
        self.try_create_reader(topic, qos).map_err(|e| {
            log::warn!("[READER] create_reader on '{}' failed: {}", topic, e);
            e
        })
    }

    fn try_create_reader<T: TopicType>(self: &Arc<Self>, topic: &str, qos: QoS) -> Result<DataReader<T>> {
        self.check_open()?;
        qos.validate()?;
        self.register_topic::<T>(topic)?;
        let guid = GUID::new(self.prefix, EntityId::user_reader(self.next_key(), T::is_keyed()));
        let inner = Arc::new(ReaderInner::new(guid, topic, T::type_name(), qos, self));
        self.readers.insert(guid.entity_id, Arc::clone(&inner));
        if self.autoenable {
            if let Err(e) = inner.enable() {
                self.readers.remove(&guid.entity_id);
                let _ = inner.teardown();
                return Err(e);
            }
        }
        log::debug!("[READER] created {} on '{}' ({})", guid, topic, T::type_name());
        Ok(DataReader::new(inner))
    }

    /// Unmatch and drop a writer. Its timers are cancelled before this returns.
    ///
    /// # Errors
    /// - `PreconditionNotMet` while instances registered through
    ///   `register_instance` are not unregistered.
    /// - `AlreadyDeleted` if it was deleted before.
    pub fn delete_writer<T: TopicType>(&self, writer: &DataWriter<T>) -> Result<()> {
        let inner = writer.inner();
        if inner.has_registered_instances() {
            return Err(Error::PreconditionNotMet(format!(
                "writer {} still has registered instances",
                inner.guid()
            )));
        }
        if self.writers.remove(&inner.guid().entity_id).is_none() {
            return Err(Error::AlreadyDeleted);
        }
        inner.teardown()
    }

    /// Unmatch and drop a reader.
    pub fn delete_reader<T: TopicType>(&self, reader: &DataReader<T>) -> Result<()> {
        let inner = reader.inner();
        if self.readers.remove(&inner.guid().entity_id).is_none() {
            return Err(Error::AlreadyDeleted);
        }
        inner.teardown()
    }

    /// Assert every MANUAL_BY_PARTICIPANT writer of this participant and
    /// publish the assertion to remote participants.
    pub fn assert_liveliness(&self) -> Result<()> {
        self.check_open()?;
        self.local_liveliness.assert_kind(LivelinessKind::ManualByParticipant);
        self.discovery.wlp().announce(LivelinessKind::ManualByParticipant)?;
        Ok(())
    }

    // ========================================================================
    // Dispatch helpers (receiver side)
    // ========================================================================

    /// Reader engines a DATA / HEARTBEAT / GAP from `writer_id` is for.
    pub(crate) fn readers_for(&self, reader_id: EntityId, writer_id: EntityId) -> Vec<Arc<ReaderEngine>> {
        if writer_id.is_builtin() {
            return self
                .discovery
                .builtin_reader_for_writer(writer_id)
                .into_iter()
                .cloned()
                .collect();
        }
        if reader_id.is_unknown() {
            return self
                .readers
                .iter()
                .filter_map(|r| r.value().engine().cloned())
                .collect();
        }
        self.readers
            .get(&reader_id)
            .and_then(|r| r.value().engine().cloned())
            .into_iter()
            .collect()
    }

    /// Writer engine an ACKNACK for `writer_id` is for.
    pub(crate) fn writer_for(&self, writer_id: EntityId) -> Option<Arc<WriterEngine>> {
        if writer_id.is_builtin() {
            return self.discovery.builtin_writer(writer_id).cloned();
        }
        self.writers
            .get(&writer_id)
            .and_then(|w| w.value().engine().cloned())
    }

    // ========================================================================
    // Liveliness callbacks
    // ========================================================================

    fn on_remote_liveliness(&self, transition: LivelinessTransition) {
        // Cloned out: callbacks must not run under a DashMap shard lock.
        let readers: Vec<Arc<ReaderInner>> = self.readers.iter().map(|r| Arc::clone(r.value())).collect();
        for reader in readers {
            reader.on_writer_liveliness(transition.guid, transition.alive);
        }
    }

    /// Own MANUAL_* writers: the writer hears about a lapse, and every local
    /// reader matched to it sees both directions. Remote readers learn
    /// through their own lease tracking.
    fn on_local_liveliness(&self, transition: LivelinessTransition) {
        if transition.guid.prefix != self.prefix {
            return;
        }
        if !transition.alive {
            let writer = self
                .writers
                .get(&transition.guid.entity_id)
                .map(|w| Arc::clone(w.value()));
            if let Some(writer) = writer {
                writer.on_liveliness_lost();
            }
        }
        let readers: Vec<Arc<ReaderInner>> = self
            .discovery
            .readers_matched_to(&transition.guid)
            .iter()
            .filter_map(|r| self.readers.get(&r.data.guid.entity_id).map(|e| Arc::clone(e.value())))
            .collect();
        for reader in readers {
            reader.on_writer_liveliness(transition.guid, transition.alive);
        }
    }

    /// Liveliness of one of this participant's writers as seen by a local
    /// reader. AUTOMATIC writers are alive while the participant is.
    pub(crate) fn is_local_writer_alive(&self, writer: &GUID) -> bool {
        if writer.prefix != self.prefix || !self.writers.contains_key(&writer.entity_id) {
            return false;
        }
        match self.local_liveliness.status_of(writer) {
            None => true,
            Some(status) => status == LivelinessStatus::Alive,
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Delete every entity, announce the departure and release the transport.
    /// Idempotent; also run on drop.
    pub fn delete(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let writers: Vec<Arc<WriterInner>> = self.writers.iter().map(|w| Arc::clone(w.value())).collect();
        self.writers.clear();
        for writer in writers {
            if let Err(e) = writer.teardown() {
                log::debug!("[WRITER] teardown of {} failed: {}", writer.guid(), e);
            }
        }
        let readers: Vec<Arc<ReaderInner>> = self.readers.iter().map(|r| Arc::clone(r.value())).collect();
        self.readers.clear();
        for reader in readers {
            if let Err(e) = reader.teardown() {
                log::debug!("[READER] teardown of {} failed: {}", reader.guid(), e);
            }
        }

        self.discovery.announce_removal();
        self.discovery.detach_timers();
        self.local_liveliness.detach_timer();
        self.remote_liveliness.detach_timer();
        self.events.shutdown();
        for locator in self.locators.all() {
            self.sender.transport().close_input_channel(&locator);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.prefix);
        }
        log::info!("[PARTICIPANT] {} left domain {}", self.prefix, self.domain_id);
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.delete();
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("domain_id", &self.domain_id)
            .field("participant_id", &self.participant_id)
            .field("writers", &self.writers.len())
            .field("readers", &self.readers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuntimeConfig, Timing, MAX_DOMAIN_ID};
    use crate::dds::{Enableable, RawBytes};
    use std::thread;
    use std::time::{Duration, Instant};

    fn registry() -> Arc<Registry> {
        let registry = Registry::with_config(RuntimeConfig::new(Timing::fast()));
        registry.init().expect("init");
        registry
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_requires_initialized_registry() {
        let registry = Registry::with_config(RuntimeConfig::new(Timing::fast()));
        assert!(matches!(Participant::new(&registry, 0), Err(Error::PreconditionNotMet(_))));
    }

    #[test]
    fn test_rejects_domain_out_of_range() {
        let registry = registry();
        assert!(matches!(
            Participant::new(&registry, MAX_DOMAIN_ID + 1),
            Err(Error::BadParameter(_))
        ));
    }

    #[test]
    fn test_participant_ids_are_allocated_in_order() {
        let registry = registry();
        let a = Participant::new(&registry, 3).expect("a");
        let b = Participant::new(&registry, 3).expect("b");
        assert_eq!(a.participant_id(), 0);
        assert_eq!(b.participant_id(), 1);
        assert_ne!(a.guid_prefix(), b.guid_prefix());
        assert_eq!(registry.participants(3).len(), 2);

        a.delete();
        assert_eq!(registry.participants(3).len(), 1);
        let c = Participant::new(&registry, 3).expect("c");
        assert_eq!(c.participant_id(), 0);
        registry.shutdown();
    }

    #[test]
    fn test_explicit_participant_id_in_use() {
        let registry = registry();
        let _a = Participant::builder(&registry).participant_id(4).build().expect("a");
        assert!(matches!(
            Participant::builder(&registry).participant_id(4).build(),
            Err(Error::Transport(_))
        ));
        registry.shutdown();
    }

    #[test]
    fn test_participants_discover_each_other() {
        let registry = registry();
        let a = Participant::new(&registry, 7).expect("a");
        let b = Participant::new(&registry, 7).expect("b");
        assert!(wait_until(Duration::from_secs(5), || {
            a.discovered_participants().iter().any(|p| p.guid_prefix == b.guid_prefix())
                && b.discovered_participants().iter().any(|p| p.guid_prefix == a.guid_prefix())
        }));
        registry.shutdown();
    }

    #[test]
    fn test_topic_bound_to_one_type() {
        struct Text;
        impl TopicType for Text {
            fn type_name() -> &'static str {
                "test::Text"
            }
            fn serialize(&self) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            fn deserialize(_: &[u8]) -> Result<Self> {
                Ok(Text)
            }
        }

        let registry = registry();
        let p = Participant::new(&registry, 0).expect("participant");
        p.create_writer::<RawBytes>("chatter", QoS::reliable()).expect("writer");
        assert!(matches!(
            p.create_reader::<Text>("chatter", QoS::reliable()),
            Err(Error::PreconditionNotMet(_))
        ));
        registry.shutdown();
    }

    #[test]
    fn test_disabled_entities() {
        let registry = registry();
        let p = Participant::builder(&registry).autoenable(false).build().expect("participant");
        let writer = p.create_writer::<RawBytes>("idle", QoS::reliable()).expect("writer");
        assert!(!writer.is_enabled());
        assert_eq!(writer.write(&RawBytes::new(*b"x")), Err(Error::NotEnabled));
        writer.enable().expect("enable");
        writer.write(&RawBytes::new(*b"x")).expect("write");
        registry.shutdown();
    }

    #[test]
    fn test_delete_writer_with_registered_instance() {
        let registry = registry();
        let p = Participant::new(&registry, 0).expect("participant");
        let writer = p.create_writer::<RawBytes>("keys", QoS::reliable()).expect("writer");
        let sample = RawBytes::keyed(*b"k1", *b"v");
        writer.register_instance(&sample).expect("register");
        assert!(matches!(p.delete_writer(&writer), Err(Error::PreconditionNotMet(_))));
        writer.unregister_instance(&sample).expect("unregister");
        p.delete_writer(&writer).expect("delete");
        assert_eq!(p.delete_writer(&writer), Err(Error::AlreadyDeleted));
        assert_eq!(writer.write(&sample), Err(Error::AlreadyDeleted));
        registry.shutdown();
    }

    #[test]
    fn test_create_after_delete_fails() {
        let registry = registry();
        let p = Participant::new(&registry, 0).expect("participant");
        p.delete();
        assert!(p.is_closed());
        assert!(matches!(
            p.create_reader::<RawBytes>("late", QoS::best_effort()),
            Err(Error::AlreadyDeleted)
        ));
    }
}
