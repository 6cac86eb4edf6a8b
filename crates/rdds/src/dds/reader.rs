// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # DDS DataReader
//!
//! The [`DataReader`] receives typed samples from the writers it matched.
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
//!     let reader = participant.create_reader::<RawBytes>("sensors/temperature", QoS::reliable())?;
//!     for sample in reader.take()? {
//!         if let Some(data) = sample.data {
//!             println!("{} bytes from {}", data.data.len(), sample.info.writer_guid);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Read vs Take
//!
//! - `read()` leaves samples in the History and marks them READ
//! - `take()` removes them, freeing room for KEEP_ALL flow control
//!
//! Samples come out in per-writer sequence order (or source-timestamp
//! order with `DestinationOrder::BySourceTimestamp`). A NOT_ALIVE change
//! (dispose / unregister) is returned with `data == None` and
//! `info.valid_data == false`.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};

use super::entity::{EntityState, StatusMask};
use super::listener::{
    Counter, DataReaderListener, DeadlineCounter, LivelinessChangedStatus, LivelinessCounter,
    MatchCounter, RequestedDeadlineMissedStatus, RequestedIncompatibleQosStatus, SampleLostStatus,
    SubscriptionMatchedStatus,
};
use super::participant::Participant;
use super::topic::{decapsulate, TopicType};
use super::waitset::StatusCondition;
use super::{Enableable, Error, Result, StatusTracked};
use crate::core::{Time, GUID};
use crate::discovery::{Discovery, EndpointEvents, LocalReader, ReaderProxyData};
use crate::history::{CacheChange, ChangeKind, InstanceHandle};
use crate::liveliness::LivelinessManager;
use crate::qos::QoS;
use crate::reader::{ReaderEngine, ReaderEvents, ReaderTiming};
use crate::reliability::ReliableMetrics;

/// Lifecycle of the instance a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

impl From<ChangeKind> for InstanceState {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Alive => InstanceState::Alive,
            ChangeKind::NotAliveDisposed | ChangeKind::NotAliveDisposedUnregistered => {
                InstanceState::NotAliveDisposed
            }
            ChangeKind::NotAliveUnregistered => InstanceState::NotAliveNoWriters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleState {
    /// Returned by a previous `read`.
    Read,
    NotRead,
}

/// Metadata delivered with every sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleInfo {
    pub source_timestamp: Time,
    pub writer_guid: GUID,
    pub sequence_number: i64,
    pub instance_handle: Option<InstanceHandle>,
    pub instance_state: InstanceState,
    pub sample_state: SampleState,
    /// False for dispose / unregister notifications.
    pub valid_data: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample<T> {
    pub data: Option<T>,
    pub info: SampleInfo,
}

#[derive(Default)]
struct ReaderStatus {
    matched: MatchCounter,
    incompatible: Counter,
    sample_lost: Counter,
    liveliness: LivelinessCounter,
    deadline_missed: DeadlineCounter,
}

/// Type-erased reader state shared by the participant, discovery and the
/// [`DataReader`] handles.
pub(crate) struct ReaderInner {
    guid: GUID,
    topic: String,
    type_name: &'static str,
    qos: Mutex<QoS>,
    engine: OnceLock<Arc<ReaderEngine>>,
    state: EntityState,
    participant: Weak<Participant>,
    discovery: Arc<Discovery>,
    remote_liveliness: Arc<LivelinessManager>,
    listener: RwLock<Option<Arc<dyn DataReaderListener>>>,
    status: Mutex<ReaderStatus>,
}

/// Engine events routed back to the reader without keeping it alive.
struct EngineHook(Weak<ReaderInner>);

impl ReaderEvents for EngineHook {
    fn on_data_available(&self) {
        if let Some(reader) = self.0.upgrade() {
            reader.on_data_available();
        }
    }

    fn on_sample_lost(&self, total: u64, delta: u64) {
        if let Some(reader) = self.0.upgrade() {
            reader.on_sample_lost(total, delta);
        }
    }

    fn on_writer_asserted(&self, writer: &GUID) {
        if let Some(reader) = self.0.upgrade() {
            reader.remote_liveliness.assert_writer(writer);
        }
    }

    fn on_deadline_missed(&self, total: u64, delta: u64, last_instance: Option<InstanceHandle>) {
        if let Some(reader) = self.0.upgrade() {
            reader.on_deadline_missed(total, delta, last_instance);
        }
    }
}

impl ReaderInner {
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
            remote_liveliness: Arc::clone(participant.remote_liveliness()),
            listener: RwLock::new(None),
            status: Mutex::new(ReaderStatus::default()),
        }
    }

    pub(crate) fn guid(&self) -> GUID {
        self.guid
    }

    pub(crate) fn engine(&self) -> Option<&Arc<ReaderEngine>> {
        self.engine.get()
    }

    fn usable_engine(&self) -> Result<&Arc<ReaderEngine>> {
        self.state.check_usable()?;
        self.engine.get().ok_or(Error::NotEnabled)
    }

    fn proxy_data(&self) -> ReaderProxyData {
        ReaderProxyData {
            guid: self.guid,
            topic_name: self.topic.clone(),
            type_name: self.type_name.to_string(),
            qos: self.qos.lock().clone(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        }
    }

    /// Create the engine and announce the reader.
    pub(crate) fn enable(self: &Arc<Self>) -> Result<()> {
        if self.state.is_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        if !self.state.mark_enabled() {
            return Ok(());
        }
        let participant = self.participant.upgrade().ok_or(Error::AlreadyDeleted)?;
        let timing = participant.config().timing_for_topic(&self.topic);
        let engine = Arc::new(ReaderEngine::new(
            self.guid,
            self.qos.lock().clone(),
            Arc::clone(participant.sender()),
            ReaderTiming::from(&timing),
        ));
        engine.set_listener(Some(Arc::new(EngineHook(Arc::downgrade(self)))));
        engine.attach_timers(participant.events());
        let engine = Arc::clone(self.engine.get_or_init(|| engine));

        let events: Arc<dyn EndpointEvents> = Arc::clone(self) as Arc<dyn EndpointEvents>;
        self.discovery.add_local_reader(LocalReader {
            data: self.proxy_data(),
            engine,
            events,
        })?;
        log::debug!("[READER] {} enabled on '{}'", self.guid, self.topic);
        Ok(())
    }

    /// Unmatch and stop timers. Idempotent.
    pub(crate) fn teardown(&self) -> Result<()> {
        if !self.state.mark_deleted() {
            return Ok(());
        }
        let result = if self.state.is_enabled() {
            self.discovery.remove_local_reader(&self.guid)
        } else {
            Ok(())
        };
        if let Some(engine) = self.engine.get() {
            engine.detach_timers();
            engine.set_listener(None);
        }
        *self.listener.write() = None;
        log::debug!("[READER] {} deleted", self.guid);
        result
    }

    fn on_data_available(&self) {
        let listener = self.listener.read().clone();
        self.state.raise(StatusMask::DATA_AVAILABLE);
        if let Some(listener) = listener {
            listener.on_data_available();
        }
    }

    fn on_sample_lost(&self, total: u64, delta: u64) {
        log::debug!("[READER] {} lost {} sample(s), {} total", self.guid, delta, total);
        self.status
            .lock()
            .sample_lost
            .add(u32::try_from(delta).unwrap_or(u32::MAX));
        self.notify(
            StatusMask::SAMPLE_LOST,
            |status| {
                let (total_count, total_count_change, _) = status.sample_lost.take();
                SampleLostStatus {
                    total_count,
                    total_count_change,
                }
            },
            |listener, status| listener.on_sample_lost(status),
        );
    }

    fn on_deadline_missed(&self, total: u64, delta: u64, last_instance: Option<InstanceHandle>) {
        log::debug!(
            "[READER] {} requested deadline missed for {} instance(s), {} total",
            self.guid,
            delta,
            total
        );
        self.status.lock().deadline_missed.add(delta, last_instance);
        self.notify(
            StatusMask::REQUESTED_DEADLINE_MISSED,
            |status| status.deadline_missed.requested_status(),
            |listener, status| listener.on_requested_deadline_missed(status),
        );
    }

    /// Liveliness transition of a writer, reported by the remote manager.
    pub(crate) fn on_writer_liveliness(&self, writer: GUID, alive: bool) {
        let Some(engine) = self.engine.get() else {
            return;
        };
        if engine.writer_proxy(&writer).is_none() {
            return;
        }
        engine.set_writer_alive(&writer, alive);
        if !self.status.lock().liveliness.set(writer, alive) {
            return;
        }
        log::debug!(
            "[LIVELINESS] reader {} sees writer {} {}",
            self.guid,
            writer,
            if alive { "alive" } else { "not alive" }
        );
        self.notify_liveliness();
    }

    fn notify_liveliness(&self) {
        self.notify(
            StatusMask::LIVELINESS_CHANGED,
            |status| status.liveliness.status(),
            |listener, status| listener.on_liveliness_changed(status),
        );
    }

    /// Hand the status to the listener when one is set, otherwise flag it
    /// on the status condition. The listener runs without the status lock.
    fn notify<S>(
        &self,
        mask: StatusMask,
        snapshot: impl FnOnce(&mut ReaderStatus) -> S,
        call: impl FnOnce(&dyn DataReaderListener, S),
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

impl EndpointEvents for ReaderInner {
    fn on_matched(&self, remote: GUID) {
        log::debug!("[READER] {} matched writer {}", self.guid, remote);
        self.status.lock().matched.matched(remote);
        self.notify(
            StatusMask::SUBSCRIPTION_MATCHED,
            |status| status.matched.subscription_status(),
            |listener, status| listener.on_subscription_matched(status),
        );
        // Same-participant writers are not lease-tracked here; take their
        // current state from the participant.
        if remote.prefix == self.guid.prefix {
            let alive = self
                .participant
                .upgrade()
                .is_some_and(|p| p.is_local_writer_alive(&remote));
            if alive {
                self.on_writer_liveliness(remote, true);
            }
        }
    }

    fn on_unmatched(&self, remote: GUID) {
        log::debug!("[READER] {} unmatched writer {}", self.guid, remote);
        let liveliness_changed = {
            let mut status = self.status.lock();
            status.matched.unmatched(remote);
            status.liveliness.remove(&remote)
        };
        self.notify(
            StatusMask::SUBSCRIPTION_MATCHED,
            |status| status.matched.subscription_status(),
            |listener, status| listener.on_subscription_matched(status),
        );
        if liveliness_changed {
            self.notify_liveliness();
        }
    }

    fn on_incompatible_qos(&self, remote: GUID, policy: &'static str) {
        log::warn!(
            "[MATCH-QOS] reader {} requests {} incompatible with writer {}",
            self.guid,
            policy,
            remote
        );
        self.status.lock().incompatible.add_policy(policy);
        self.notify(
            StatusMask::REQUESTED_INCOMPATIBLE_QOS,
            |status| {
                let (total_count, total_count_change, last_policy) = status.incompatible.take();
                RequestedIncompatibleQosStatus {
                    total_count,
                    total_count_change,
                    last_policy,
                }
            },
            |listener, status| listener.on_requested_incompatible_qos(status),
        );
    }
}

/// Typed handle on a reader. Cheap to clone.
pub struct DataReader<T: TopicType> {
    inner: Arc<ReaderInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TopicType> Clone for DataReader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T: TopicType> DataReader<T> {
    pub(crate) fn new(inner: Arc<ReaderInner>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ReaderInner> {
        &self.inner
    }

    pub fn guid(&self) -> GUID {
        self.inner.guid
    }

    pub fn topic_name(&self) -> &str {
        &self.inner.topic
    }

    fn to_sample(&self, change: CacheChange, was_read: bool) -> Option<Sample<T>> {
        let valid_data = change.kind.is_alive();
        let data = if valid_data {
            match decapsulate(change.payload.as_slice()).and_then(T::deserialize) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::warn!(
                        "[READER] {} dropping undecodable #{} from {}: {}",
                        self.inner.guid,
                        change.sequence_number,
                        change.writer_guid,
                        e
                    );
                    return None;
                }
            }
        } else {
            None
        };
        Some(Sample {
            data,
            info: SampleInfo {
                source_timestamp: change.source_timestamp,
                writer_guid: change.writer_guid,
                sequence_number: change.sequence_number,
                instance_handle: change.instance,
                instance_state: InstanceState::from(change.kind),
                sample_state: if was_read {
                    SampleState::Read
                } else {
                    SampleState::NotRead
                },
                valid_data,
            },
        })
    }

    fn convert(&self, changes: Vec<(CacheChange, bool)>) -> Vec<Sample<T>> {
        self.inner.state.clear(StatusMask::DATA_AVAILABLE);
        changes
            .into_iter()
            .filter_map(|(change, was_read)| self.to_sample(change, was_read))
            .collect()
    }

    /// Every sample in the History, left in place and marked READ.
    pub fn read(&self) -> Result<Vec<Sample<T>>> {
        let engine = self.inner.usable_engine()?;
        Ok(self.convert(engine.read_all()))
    }

    /// Remove and return every sample in the History.
    pub fn take(&self) -> Result<Vec<Sample<T>>> {
        let engine = self.inner.usable_engine()?;
        Ok(self.convert(engine.take_all()))
    }

    /// Remove and return the oldest sample, if any.
    pub fn take_next_sample(&self) -> Result<Option<Sample<T>>> {
        let engine = self.inner.usable_engine()?;
        while let Some((change, was_read)) = engine.take_next() {
            if let Some(sample) = self.to_sample(change, was_read) {
                if engine.history().is_empty() {
                    self.inner.state.clear(StatusMask::DATA_AVAILABLE);
                }
                return Ok(Some(sample));
            }
        }
        self.inner.state.clear(StatusMask::DATA_AVAILABLE);
        Ok(None)
    }

    pub fn qos(&self) -> QoS {
        self.inner.qos.lock().clone()
    }

    /// Replace the QoS. Once enabled only DEADLINE and PARTITION may change;
    /// matching is re-evaluated.
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
            self.inner.discovery.update_local_reader(&self.inner.guid, qos.clone())?;
            if let Some(engine) = self.inner.engine() {
                engine.set_deadline_period(qos.deadline.period);
            }
        }
        *self.inner.qos.lock() = qos;
        Ok(())
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn DataReaderListener>>) {
        *self.inner.listener.write() = listener;
    }

    /// Writers currently matched.
    pub fn matched_publications(&self) -> Vec<GUID> {
        self.inner.engine().map(|e| e.matched_writers()).unwrap_or_default()
    }

    pub fn subscription_matched_status(&self) -> SubscriptionMatchedStatus {
        let status = self.inner.status.lock().matched.subscription_status();
        self.inner.state.clear(StatusMask::SUBSCRIPTION_MATCHED);
        status
    }

    pub fn requested_incompatible_qos_status(&self) -> RequestedIncompatibleQosStatus {
        let (total_count, total_count_change, last_policy) = self.inner.status.lock().incompatible.take();
        self.inner.state.clear(StatusMask::REQUESTED_INCOMPATIBLE_QOS);
        RequestedIncompatibleQosStatus {
            total_count,
            total_count_change,
            last_policy,
        }
    }

    pub fn liveliness_changed_status(&self) -> LivelinessChangedStatus {
        let status = self.inner.status.lock().liveliness.status();
        self.inner.state.clear(StatusMask::LIVELINESS_CHANGED);
        status
    }

    pub fn sample_lost_status(&self) -> SampleLostStatus {
        let (total_count, total_count_change, _) = self.inner.status.lock().sample_lost.take();
        self.inner.state.clear(StatusMask::SAMPLE_LOST);
        SampleLostStatus {
            total_count,
            total_count_change,
        }
    }

    pub fn requested_deadline_missed_status(&self) -> RequestedDeadlineMissedStatus {
        let status = self.inner.status.lock().deadline_missed.requested_status();
        self.inner.state.clear(StatusMask::REQUESTED_DEADLINE_MISSED);
        status
    }

    pub fn metrics(&self) -> Option<Arc<ReliableMetrics>> {
        self.inner.engine().map(|e| Arc::clone(e.metrics()))
    }

    /// Whether `writer` is matched and currently considered alive.
    pub fn is_writer_alive(&self, writer: &GUID) -> bool {
        self.inner.engine().is_some_and(|e| e.is_writer_alive(writer))
    }
}

impl<T: TopicType> Enableable for DataReader<T> {
    fn enable(&self) -> Result<()> {
        self.inner.enable()
    }

    fn is_enabled(&self) -> bool {
        self.inner.state.is_enabled()
    }
}

impl<T: TopicType> StatusTracked for DataReader<T> {
    fn status_condition(&self) -> Arc<StatusCondition> {
        self.inner.state.condition()
    }

    fn status_changes(&self) -> StatusMask {
        self.inner.state.changes()
    }
}

impl<T: TopicType> std::fmt::Debug for DataReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataReader")
            .field("guid", &self.inner.guid)
            .field("topic", &self.inner.topic)
            .field("type", &self.inner.type_name)
            .finish()
    }
}
