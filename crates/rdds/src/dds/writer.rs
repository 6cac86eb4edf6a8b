// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # DDS DataWriter
//!
//! The [`DataWriter`] publishes typed samples on a topic.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rdds::dds::{Participant, RawBytes, Registry, Result};
//! use rdds::qos::QoS;
//!
//! fn main() -> Result<()> {
//!     let registry = Registry::new();
//!     registry.init()?;
//!     let participant = Participant::new(&registry, 0)?;
//!
//!     let writer = participant.create_writer::<RawBytes>("sensors/temperature", QoS::reliable())?;
//!     writer.write(&RawBytes::keyed(*b"sensor-1", *b"23.5"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery Path
//!
//! ```text
//! write() -> TopicType::serialize -> encapsulate -> PayloadPool
//!         -> WriterEngine::write -+-> DATA to every matched reader
//!                                 +-> History (retransmission, late joiners)
//! ```
//!
//! The engine is created when the writer is enabled; until then every
//! operation except `set_qos` fails with `NotEnabled`.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::entity::{EntityState, StatusMask};
use super::listener::{
    Counter, DataWriterListener, DeadlineCounter, LivelinessLostStatus, MatchCounter,
    OfferedDeadlineMissedStatus, OfferedIncompatibleQosStatus, PublicationMatchedStatus,
};
use super::participant::Participant;
use super::topic::{encapsulate, TopicType};
use super::waitset::StatusCondition;
use super::{Enableable, Error, Result, StatusTracked};
use crate::core::{Payload, PayloadPool, Time, GUID};
use crate::discovery::{Discovery, EndpointEvents, LocalWriter, WriterProxyData};
use crate::history::{ChangeKind, InstanceHandle};
use crate::liveliness::LivelinessManager;
use crate::qos::{LivelinessKind, QoS};
use crate::reliability::ReliableMetrics;
use crate::writer::{WriterEngine, WriterEvents, WriterTiming};

#[derive(Default)]
struct WriterStatus {
    matched: MatchCounter,
    incompatible: Counter,
    liveliness_lost: Counter,
    deadline_missed: DeadlineCounter,
}

/// Engine events routed back to the writer without keeping it alive.
struct EngineHook(Weak<WriterInner>);

impl WriterEvents for EngineHook {
    fn on_deadline_missed(&self, total: u64, delta: u64, last_instance: Option<InstanceHandle>) {
        if let Some(writer) = self.0.upgrade() {
            writer.on_deadline_missed(total, delta, last_instance);
        }
    }
}

/// Type-erased writer state shared by the participant, discovery and the
/// [`DataWriter`] handles.
pub(crate) struct WriterInner {
    guid: GUID,
    topic: String,
    type_name: &'static str,
    qos: Mutex<QoS>,
    engine: OnceLock<Arc<WriterEngine>>,
    state: EntityState,
    participant: Weak<Participant>,
    discovery: Arc<Discovery>,
    liveliness: Arc<LivelinessManager>,
    pool: Arc<PayloadPool>,
    listener: RwLock<Option<Arc<dyn DataWriterListener>>>,
    status: Mutex<WriterStatus>,
    registered: Mutex<HashSet<InstanceHandle>>,
}

impl WriterInner {
    pub(crate) fn new(
        guid: GUID,
        topic: &str,
        type_name: &'static str,
        qos: QoS,
        participant: &Arc<Participant>,
    ) -> Self {
        Self {
            guid,
            topic: topic.to_string(),
            type_name,
            qos: Mutex::new(qos),
            engine: OnceLock::new(),
            state: EntityState::new(),
            participant: Arc::downgrade(participant),
            discovery: Arc::clone(participant.discovery()),
            liveliness: Arc::clone(participant.local_liveliness()),
            pool: Arc::clone(participant.payload_pool()),
            listener: RwLock::new(None),
            status: Mutex::new(WriterStatus::default()),
            registered: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn guid(&self) -> GUID {
        self.guid
    }

    pub(crate) fn engine(&self) -> Option<&Arc<WriterEngine>> {
        self.engine.get()
    }

    fn usable_engine(&self) -> Result<&Arc<WriterEngine>> {
        self.state.check_usable()?;
        self.engine.get().ok_or(Error::NotEnabled)
    }

    fn proxy_data(&self) -> WriterProxyData {
        WriterProxyData {
            guid: self.guid,
            topic_name: self.topic.clone(),
            type_name: self.type_name.to_string(),
            qos: self.qos.lock().clone(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        }
    }

    /// Create the engine, start liveliness tracking and announce the writer.
    pub(crate) fn enable(self: &Arc<Self>) -> Result<()> {
        if self.state.is_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        if !self.state.mark_enabled() {
            return Ok(());
        }
        let participant = self.participant.upgrade().ok_or(Error::AlreadyDeleted)?;
        let qos = self.qos.lock().clone();
        let timing = participant.config().timing_for_topic(&self.topic);
        let engine = Arc::new(WriterEngine::new(
            self.guid,
            qos.clone(),
            Arc::clone(participant.sender()),
            WriterTiming::from(&timing),
        ));
        engine.set_listener(Some(Arc::new(EngineHook(Arc::downgrade(self)))));
        engine.attach_timers(participant.events());
        let engine = Arc::clone(self.engine.get_or_init(|| engine));

        self.liveliness
            .add_writer(self.guid, qos.liveliness.kind, qos.liveliness.lease_duration);
        let events: Arc<dyn EndpointEvents> = Arc::clone(self) as Arc<dyn EndpointEvents>;
        self.discovery.add_local_writer(LocalWriter {
            data: self.proxy_data(),
            engine,
            events,
        })?;
        log::debug!("[WRITER] {} enabled on '{}'", self.guid, self.topic);
        Ok(())
    }

    /// Unmatch, stop timers and forget liveliness. Idempotent.
    pub(crate) fn teardown(&self) -> Result<()> {
        if !self.state.mark_deleted() {
            return Ok(());
        }
        let result = if self.state.is_enabled() {
            self.discovery.remove_local_writer(&self.guid)
        } else {
            Ok(())
        };
        if let Some(engine) = self.engine.get() {
            engine.detach_timers();
            engine.set_listener(None);
        }
        self.liveliness.remove_writer(&self.guid);
        *self.listener.write() = None;
        log::debug!("[WRITER] {} deleted", self.guid);
        result
    }

    pub(crate) fn has_registered_instances(&self) -> bool {
        !self.registered.lock().is_empty()
    }

    /// Liveliness lease of a MANUAL_* writer expired.
    pub(crate) fn on_liveliness_lost(&self) {
        log::debug!("[LIVELINESS] writer {} lost liveliness", self.guid);
        self.status.lock().liveliness_lost.add(1);
        self.notify(
            StatusMask::LIVELINESS_LOST,
            |status| {
                let (total_count, total_count_change, _) = status.liveliness_lost.take();
                LivelinessLostStatus {
                    total_count,
                    total_count_change,
                }
            },
            |listener, status| listener.on_liveliness_lost(status),
        );
    }

    fn on_deadline_missed(&self, total: u64, delta: u64, last_instance: Option<InstanceHandle>) {
        log::debug!(
            "[WRITER] {} offered deadline missed for {} instance(s), {} total",
            self.guid,
            delta,
            total
        );
        self.status.lock().deadline_missed.add(delta, last_instance);
        self.notify(
            StatusMask::OFFERED_DEADLINE_MISSED,
            |status| status.deadline_missed.offered_status(),
            |listener, status| listener.on_offered_deadline_missed(status),
        );
    }

    /// Hand the status to the listener when one is set, otherwise flag it
    /// on the status condition. The listener runs without the status lock.
    fn notify<S>(
        &self,
        mask: StatusMask,
        snapshot: impl FnOnce(&mut WriterStatus) -> S,
        call: impl FnOnce(&dyn DataWriterListener, S),
    ) {
        let listener = self.listener.read().clone();
        match listener {
            Some(listener) => {
                let status = snapshot(&mut self.status.lock());
                call(&*listener, status);
            }
            None => self.state.raise(mask),
        }
    }
}

impl EndpointEvents for WriterInner {
    fn on_matched(&self, remote: GUID) {
        log::debug!("[WRITER] {} matched reader {}", self.guid, remote);
        self.status.lock().matched.matched(remote);
        self.notify(
            StatusMask::PUBLICATION_MATCHED,
            |status| status.matched.publication_status(),
            |listener, status| listener.on_publication_matched(status),
        );
    }

    fn on_unmatched(&self, remote: GUID) {
        log::debug!("[WRITER] {} unmatched reader {}", self.guid, remote);
        self.status.lock().matched.unmatched(remote);
        self.notify(
            StatusMask::PUBLICATION_MATCHED,
            |status| status.matched.publication_status(),
            |listener, status| listener.on_publication_matched(status),
        );
    }

    fn on_incompatible_qos(&self, remote: GUID, policy: &'static str) {
        log::warn!(
            "[MATCH-QOS] writer {} offers incompatible {} to reader {}",
            self.guid,
            policy,
            remote
        );
        self.status.lock().incompatible.add_policy(policy);
        self.notify(
            StatusMask::OFFERED_INCOMPATIBLE_QOS,
            |status| {
                let (total_count, total_count_change, last_policy) = status.incompatible.take();
                OfferedIncompatibleQosStatus {
                    total_count,
                    total_count_change,
                    last_policy,
                }
            },
            |listener, status| listener.on_offered_incompatible_qos(status),
        );
    }
}

/// Typed handle on a writer. Cheap to clone.
pub struct DataWriter<T: TopicType> {
    inner: Arc<WriterInner>,
    _marker: PhantomData<fn(T)>,
}

impl<T: TopicType> Clone for DataWriter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T: TopicType> DataWriter<T> {
    pub(crate) fn new(inner: Arc<WriterInner>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<WriterInner> {
        &self.inner
    }

    pub fn guid(&self) -> GUID {
        self.inner.guid
    }

    pub fn topic_name(&self) -> &str {
        &self.inner.topic
    }

    fn instance_of(sample: &T) -> Option<InstanceHandle> {
        if !T::is_keyed() {
            return None;
        }
        sample.key().map(|key| InstanceHandle::from_key(&key))
    }

    fn keyed_instance(sample: &T) -> Result<InstanceHandle> {
        Self::instance_of(sample)
            .ok_or_else(|| Error::BadParameter(format!("{} samples carry no key", T::type_name())))
    }

    /// Publish `sample` stamped with the current time.
    ///
    /// # Errors
    /// - `NotEnabled` / `AlreadyDeleted` for an unusable writer.
    /// - `Serialization` if the sample cannot be encoded.
    /// - `ResourceLimitExceeded` when a KEEP_ALL history stays full for
    ///   `max_blocking_time`.
    pub fn write(&self, sample: &T) -> Result<()> {
        self.write_w_timestamp(sample, Time::now())
    }

    pub fn write_w_timestamp(&self, sample: &T, timestamp: Time) -> Result<()> {
        crate::trace_fn!("DataWriter::write_w_timestamp");
        let engine = self.inner.usable_engine()?;
        let body = sample.serialize()?;
        let payload = self.inner.pool.allocate(&encapsulate(&body))?;
        let seq = engine.write(payload, Self::instance_of(sample), timestamp)?;
        self.inner.liveliness.assert_writer(&self.inner.guid);
        log::trace!("[WRITER] {} wrote #{}", self.inner.guid, seq);
        Ok(())
    }

    /// Declare the instance of `sample`. Deleting the writer fails until it
    /// is unregistered.
    pub fn register_instance(&self, sample: &T) -> Result<InstanceHandle> {
        self.inner.usable_engine()?;
        let handle = Self::keyed_instance(sample)?;
        self.inner.registered.lock().insert(handle);
        Ok(handle)
    }

    /// Publish NOT_ALIVE_UNREGISTERED for the instance of `sample`.
    pub fn unregister_instance(&self, sample: &T) -> Result<()> {
        let handle = Self::keyed_instance(sample)?;
        self.write_lifecycle(ChangeKind::NotAliveUnregistered, handle)?;
        self.inner.registered.lock().remove(&handle);
        Ok(())
    }

    /// Publish NOT_ALIVE_DISPOSED for the instance of `sample`.
    pub fn dispose_instance(&self, sample: &T) -> Result<()> {
        let handle = Self::keyed_instance(sample)?;
        self.write_lifecycle(ChangeKind::NotAliveDisposed, handle)
    }

    fn write_lifecycle(&self, kind: ChangeKind, handle: InstanceHandle) -> Result<()> {
        let engine = self.inner.usable_engine()?;
        engine.write_change(kind, Some(handle), Payload::empty(), Time::now())?;
        self.inner.liveliness.assert_writer(&self.inner.guid);
        Ok(())
    }

    /// Block until every reliable matched reader acknowledged everything
    /// written so far.
    ///
    /// # Errors
    /// `Timeout` if that does not happen within `timeout`.
    pub fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<()> {
        self.inner.usable_engine()?.wait_for_acknowledgments(timeout)
    }

    /// Manually assert liveliness.
    ///
    /// MANUAL_BY_TOPIC sends a liveliness HEARTBEAT to the matched readers,
    /// MANUAL_BY_PARTICIPANT publishes a participant message. A no-op for
    /// AUTOMATIC writers.
    pub fn assert_liveliness(&self) -> Result<()> {
        let engine = self.inner.usable_engine()?;
        let kind = self.inner.qos.lock().liveliness.kind;
        match kind {
            LivelinessKind::ManualByTopic => {
                engine.assert_liveliness();
                self.inner.liveliness.assert_writer(&self.inner.guid);
            }
            LivelinessKind::ManualByParticipant => {
                self.inner.liveliness.assert_writer(&self.inner.guid);
                self.inner
                    .discovery
                    .wlp()
                    .announce(LivelinessKind::ManualByParticipant)?;
            }
            LivelinessKind::Automatic => {}
        }
        Ok(())
    }

    pub fn qos(&self) -> QoS {
        self.inner.qos.lock().clone()
    }

    /// Replace the QoS. Once enabled only DEADLINE, PARTITION, LIFESPAN and
    /// ownership strength may change; matching is re-evaluated.
    ///
    /// # Errors
    /// `InconsistentPolicy` / `BadParameter` for an invalid QoS,
    /// `ImmutablePolicy` for a change that is not allowed after enable.
    pub fn set_qos(&self, qos: QoS) -> Result<()> {
        qos.validate()?;
        if self.inner.state.is_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        if self.inner.state.is_enabled() {
            self.inner.qos.lock().check_update(&qos)?;
            self.inner.discovery.update_local_writer(&self.inner.guid, qos.clone())?;
            if let Some(engine) = self.inner.engine() {
                engine.set_deadline_period(qos.deadline.period);
                engine.set_lifespan(qos.lifespan);
            }
        }
        *self.inner.qos.lock() = qos;
        Ok(())
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn DataWriterListener>>) {
        *self.inner.listener.write() = listener;
    }

    /// Readers currently matched.
    pub fn matched_subscriptions(&self) -> Vec<GUID> {
        self.inner.engine().map(|e| e.matched_readers()).unwrap_or_default()
    }

    pub fn publication_matched_status(&self) -> PublicationMatchedStatus {
        let status = self.inner.status.lock().matched.publication_status();
        self.inner.state.clear(StatusMask::PUBLICATION_MATCHED);
        status
    }

    pub fn offered_incompatible_qos_status(&self) -> OfferedIncompatibleQosStatus {
        let (total_count, total_count_change, last_policy) = self.inner.status.lock().incompatible.take();
        self.inner.state.clear(StatusMask::OFFERED_INCOMPATIBLE_QOS);
        OfferedIncompatibleQosStatus {
            total_count,
            total_count_change,
            last_policy,
        }
    }

    pub fn liveliness_lost_status(&self) -> LivelinessLostStatus {
        let (total_count, total_count_change, _) = self.inner.status.lock().liveliness_lost.take();
        self.inner.state.clear(StatusMask::LIVELINESS_LOST);
        LivelinessLostStatus {
            total_count,
            total_count_change,
        }
    }

    pub fn offered_deadline_missed_status(&self) -> OfferedDeadlineMissedStatus {
        let status = self.inner.status.lock().deadline_missed.offered_status();
        self.inner.state.clear(StatusMask::OFFERED_DEADLINE_MISSED);
        status
    }

    /// Protocol counters of the underlying engine.
    pub fn metrics(&self) -> Option<Arc<ReliableMetrics>> {
        self.inner.engine().map(|e| Arc::clone(e.metrics()))
    }

    /// Changes currently held in the writer History.
    pub fn history_len(&self) -> usize {
        self.inner.engine().map_or(0, |e| e.history().len())
    }
}

impl<T: TopicType> Enableable for DataWriter<T> {
    fn enable(&self) -> Result<()> {
        self.inner.enable()
    }

    fn is_enabled(&self) -> bool {
        self.inner.state.is_enabled()
    }
}

impl<T: TopicType> StatusTracked for DataWriter<T> {
    fn status_condition(&self) -> Arc<StatusCondition> {
        self.inner.state.condition()
    }

    fn status_changes(&self) -> StatusMask {
        self.inner.state.changes()
    }
}

impl<T: TopicType> std::fmt::Debug for DataWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataWriter")
            .field("guid", &self.inner.guid)
            .field("topic", &self.inner.topic)
            .field("type", &self.inner.type_name)
            .finish()
    }
}
