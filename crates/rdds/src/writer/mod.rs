// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer Engine (stateful RTPS writer)
//!
//! One [`WriterEngine`] per local DataWriter (and per built-in SEDP / WLP
//! writer). It owns the writer History and one [`ReaderProxy`] per matched
//! reader.
//!
//! ```text
//! write ──▶ History.add_change ──▶ mark unsent on every proxy ──▶ DATA (+HB)
//!                                                         │
//! ACKNACK ──▶ acked_up_to = base-1 ──▶ resend / GAP ──────┘
//!                   │
//!                   └──▶ ack-gated removal (VOLATILE) + wake blocked writers
//! ```
//!
//! Payloads over [`MAX_UNFRAGMENTED_SIZE`] go out as DATA_FRAG runs of
//! [`FRAGMENT_SIZE`] bytes; NACK_FRAG resends single fragments.
//!
//! Changes older than the LIFESPAN are purged before each write and each
//! periodic heartbeat; readers asking for them get a GAP. DEADLINE misses
//! (no write of an instance within the period) are reported through
//! [`WriterEvents`].
//!
//! # Locking
//!
//! `state` (engine lock) is taken before the History's own lock. Datagrams are
//! built under the engine lock and sent after it is released.

mod proxy;

pub use proxy::{ReaderProxy, RemoteReaderInfo};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::Timing;
use crate::core::{EventThread, GuidPrefix, Locator, Payload, Time, TimerAction, TimerHandle, GUID};
use crate::dds::{Error, Result};
use crate::history::{CacheChange, ChangeKind, HistoryAttributes, HistoryCache, InstanceHandle};
use crate::protocol::{
    AckNack, Data, DataFrag, Gap, Heartbeat, InlineQos, MessageBuilder, NackFrag, SequenceNumberSet,
};
use crate::qos::{DeadlineTracker, Durability, History, Lifespan, QoS};
use crate::reliability::{build_gaps, jittered_period, ReliableMetrics, SeqNumGenerator};
use crate::transport::RtpsSender;

/// Largest serialized payload `write` accepts.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Payloads above this size are sent as DATA_FRAG.
pub const MAX_UNFRAGMENTED_SIZE: usize = 8192;

/// Bytes per DATA_FRAG fragment (the last one may be shorter).
pub const FRAGMENT_SIZE: usize = 1024;

/// Datagrams are split once they grow past this size.
const MAX_DATAGRAM_SIZE: usize = 60_000;

/// Room kept for INFO_TS plus the DATA_FRAG header and inline QoS.
const FRAGMENT_OVERHEAD: usize = 128;

/// Writer-side events, delivered without engine locks held.
pub trait WriterEvents: Send + Sync {
    /// Instances were not written within the DEADLINE period (`total` is
    /// cumulative).
    fn on_deadline_missed(&self, _total: u64, _delta: u64, _last_instance: Option<InstanceHandle>) {}
}

/// Heartbeat scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterTiming {
    pub heartbeat_period: Duration,
    pub heartbeat_jitter: Duration,
}

impl From<&Timing> for WriterTiming {
    fn from(t: &Timing) -> Self {
        Self {
            heartbeat_period: t.heartbeat_period,
            heartbeat_jitter: t.heartbeat_jitter,
        }
    }
}

impl Default for WriterTiming {
    fn default() -> Self {
        Self::from(&Timing::default())
    }
}

struct WriterState {
    proxies: BTreeMap<GUID, ReaderProxy>,
}

type Outbox = Vec<(Vec<Locator>, Vec<u8>)>;

/// Stateful reliable / best-effort writer.
pub struct WriterEngine {
    guid: GUID,
    qos: QoS,
    history: HistoryCache,
    state: Mutex<WriterState>,
    /// Signalled on acknowledgment progress and unmatch.
    acked: Condvar,
    seq: SeqNumGenerator,
    sender: Arc<RtpsSender>,
    metrics: Arc<ReliableMetrics>,
    timing: Mutex<WriterTiming>,
    hb_timer: Mutex<Option<TimerHandle>>,
    lifespan: Mutex<Lifespan>,
    deadline: Mutex<DeadlineTracker>,
    deadline_timer: Mutex<Option<TimerHandle>>,
    listener: RwLock<Option<Arc<dyn WriterEvents>>>,
}

impl WriterEngine {
    pub fn new(guid: GUID, qos: QoS, sender: Arc<RtpsSender>, timing: WriterTiming) -> Self {
        Self {
            guid,
            history: HistoryCache::new(HistoryAttributes::from_qos(&qos)),
            lifespan: Mutex::new(qos.lifespan),
            deadline: Mutex::new(DeadlineTracker::new(qos.deadline.period)),
            qos,
            state: Mutex::new(WriterState {
                proxies: BTreeMap::new(),
            }),
            acked: Condvar::new(),
            seq: SeqNumGenerator::new(),
            sender,
            metrics: Arc::new(ReliableMetrics::new()),
            timing: Mutex::new(timing),
            hb_timer: Mutex::new(None),
            deadline_timer: Mutex::new(None),
            listener: RwLock::new(None),
        }
    }

    pub fn guid(&self) -> GUID {
        self.guid
    }

    pub fn qos(&self) -> &QoS {
        &self.qos
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn metrics(&self) -> &Arc<ReliableMetrics> {
        &self.metrics
    }

    /// Last sequence number written (0 before the first write).
    pub fn last_sequence(&self) -> i64 {
        self.seq.current()
    }

    pub fn set_timing(&self, timing: WriterTiming) {
        *self.timing.lock() = timing;
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn WriterEvents>>) {
        *self.listener.write() = listener;
    }

    /// LIFESPAN changed through `set_qos`.
    pub fn set_lifespan(&self, lifespan: Lifespan) {
        *self.lifespan.lock() = lifespan;
        self.purge_expired();
    }

    /// DEADLINE changed through `set_qos`; applies from the next write.
    pub fn set_deadline_period(&self, period: Duration) {
        self.deadline.lock().set_period(period);
    }

    /// Cumulative offered-deadline misses.
    pub fn deadline_missed_total(&self) -> u64 {
        self.deadline.lock().missed_total()
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Write an ALIVE sample.
    pub fn write(&self, payload: Payload, instance: Option<InstanceHandle>, ts: Time) -> Result<i64> {
        self.write_change(ChangeKind::Alive, instance, payload, ts)
    }

    /// Append a change of any kind and push it to every matched reader.
    ///
    /// # Errors
    /// - `BadParameter` for payloads over [`MAX_PAYLOAD_SIZE`] (larger than
    ///   [`MAX_UNFRAGMENTED_SIZE`] is fine: it is fragmented).
    /// - `ResourceLimitExceeded` when a KEEP_ALL history stays full for
    ///   `max_blocking_time`, or a new instance exceeds `max_instances`.
    pub fn write_change(
        &self,
        kind: ChangeKind,
        instance: Option<InstanceHandle>,
        payload: Payload,
        ts: Time,
    ) -> Result<i64> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::BadParameter(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        let deadline = Instant::now().checked_add(self.qos.reliability.max_blocking_time);

        let mut state = self.state.lock();
        self.purge_expired();
        let seq = loop {
            let seq = self.seq.current() + 1;
            let change = CacheChange {
                kind,
                writer_guid: self.guid,
                sequence_number: seq,
                instance,
                payload: payload.clone(),
                source_timestamp: ts,
            };
            match self.history.add_change(change) {
                Ok(evicted) => {
                    if let Some(ev) = evicted {
                        log::trace!("[WRITER] {} evicted #{}", self.guid, ev.sequence_number);
                    }
                    break seq;
                }
                Err(Error::ResourceLimitExceeded(msg)) => {
                    // KEEP_LAST only fails on max_instances; dropping samples won't help.
                    if matches!(self.qos.history, History::KeepLast(_)) {
                        return Err(Error::ResourceLimitExceeded(msg));
                    }
                    if self.reclaim_oldest(&state, instance.as_ref()) {
                        continue;
                    }
                    let timed_out = match deadline {
                        Some(d) => self.acked.wait_until(&mut state, d).timed_out(),
                        None => {
                            self.acked.wait(&mut state);
                            false
                        }
                    };
                    if timed_out {
                        log::debug!(
                            "[WRITER] {} history full for {:?}: {}",
                            self.guid,
                            self.qos.reliability.max_blocking_time,
                            msg
                        );
                        return Err(Error::ResourceLimitExceeded(msg));
                    }
                }
                Err(e) => return Err(e),
            }
        };
        self.seq.next();
        self.track_deadline(kind, instance);

        let mut outbox = Outbox::new();
        for proxy in state.proxies.values_mut() {
            if proxy.is_relevant(seq) {
                proxy.unsent.insert(seq);
            }
            let locators = proxy.locators.clone();
            for bytes in self.flush_proxy(proxy, false) {
                outbox.push((locators.clone(), bytes));
            }
        }
        self.remove_acked(&state);
        let has_reliable = state.proxies.values().any(|p| p.reliable);
        drop(state);

        self.dispatch(outbox);
        if has_reliable {
            self.ensure_heartbeat_timer();
        }
        Ok(seq)
    }

    /// KEEP_ALL needs space: drop the oldest change if every matched reader
    /// has it (vacuously true with no readers). A per-instance limit only
    /// reclaims within `instance`; `max_samples` reclaims globally.
    fn reclaim_oldest(&self, state: &WriterState, instance: Option<&InstanceHandle>) -> bool {
        let watermark = state
            .proxies
            .values()
            .map(ReaderProxy::ack_watermark)
            .min()
            .unwrap_or(i64::MAX);
        let acked = |c: &CacheChange| c.sequence_number <= watermark;
        let reclaimed = if self.history.at_max_samples() {
            self.history.remove_oldest_if(acked)
        } else {
            self.history.remove_oldest_of_instance_if(instance, acked)
        };
        reclaimed.is_some()
    }

    /// Drop changes older than the LIFESPAN; returns how many went.
    fn purge_expired(&self) -> usize {
        let lifespan = *self.lifespan.lock();
        if lifespan.is_infinite() {
            return 0;
        }
        let now = Time::now();
        let removed = self
            .history
            .remove_where(|c| lifespan.is_expired(c.source_timestamp, now));
        if removed > 0 {
            log::trace!("[WRITER] {} lifespan expired {} changes", self.guid, removed);
            self.acked.notify_all();
        }
        removed
    }

    /// VOLATILE writers drop what every matched reader acknowledged.
    fn remove_acked(&self, state: &WriterState) -> usize {
        if self.qos.durability != Durability::Volatile {
            return 0;
        }
        let Some(watermark) = state.proxies.values().map(ReaderProxy::ack_watermark).min() else {
            return 0;
        };
        let removed = self.history.remove_up_to(watermark);
        if removed > 0 {
            log::trace!("[WRITER] {} released {} acked changes", self.guid, removed);
        }
        removed
    }

    // ========================================================================
    // Datagram construction
    // ========================================================================

    fn new_builder(&self, dst: GuidPrefix) -> MessageBuilder {
        let mut b = self.sender.builder();
        b.info_dst(dst);
        b
    }

    fn data_for(&self, change: &CacheChange, reader: &GUID) -> Data {
        let alive = change.kind.is_alive();
        let inline_qos = (change.instance.is_some() || !alive).then(|| InlineQos {
            key_hash: change.instance.map(|h| h.0),
            status_info: (!alive).then(|| change.kind.status_info()),
        });
        let serialized_payload = (alive || !change.payload.is_empty()).then(|| change.payload.to_vec());
        Data {
            reader_id: reader.entity_id,
            writer_id: self.guid.entity_id,
            writer_sn: change.sequence_number,
            inline_qos,
            serialized_payload,
            key_only: !alive,
        }
    }

    /// Fragment `number` (1-based) of a large change.
    fn data_frag_for(&self, change: &CacheChange, reader: &GUID, number: u32) -> DataFrag {
        let bytes = change.payload.as_slice();
        let start = (number as usize - 1) * FRAGMENT_SIZE;
        let end = (start + FRAGMENT_SIZE).min(bytes.len());
        DataFrag {
            reader_id: reader.entity_id,
            writer_id: self.guid.entity_id,
            writer_sn: change.sequence_number,
            fragment_starting_num: number,
            fragments_in_submessage: 1,
            fragment_size: FRAGMENT_SIZE as u16,
            sample_size: bytes.len() as u32,
            inline_qos: change.instance.map(|h| InlineQos {
                key_hash: Some(h.0),
                status_info: None,
            }),
            fragments: bytes[start.min(end)..end].to_vec(),
        }
    }

    /// Append `change` as one DATA or a run of DATA_FRAGs, moving to a new
    /// datagram whenever the current one fills up. `only` restricts which
    /// fragments are sent.
    fn emit_change(
        &self,
        out: &mut Vec<Vec<u8>>,
        b: &mut MessageBuilder,
        reader: &GUID,
        change: &CacheChange,
        only: Option<&[u32]>,
    ) -> bool {
        let size = change.payload.len();
        if size <= MAX_UNFRAGMENTED_SIZE {
            if b.submessage_count() > 1 && b.len() + size > MAX_DATAGRAM_SIZE {
                out.push(std::mem::replace(b, self.new_builder(reader.prefix)).finish());
            }
            b.info_ts(change.source_timestamp);
            if let Err(e) = b.data(self.data_for(change, reader)) {
                log::warn!("[WRITER] {} cannot encode #{}: {}", self.guid, change.sequence_number, e);
                return false;
            }
            return true;
        }

        let total = size.div_ceil(FRAGMENT_SIZE) as u32;
        let numbers: Vec<u32> = match only {
            Some(list) => list.iter().copied().filter(|n| (1..=total).contains(n)).collect(),
            None => (1..=total).collect(),
        };
        let mut stamped = false;
        for number in numbers {
            if b.submessage_count() > 1 && b.len() + FRAGMENT_SIZE + FRAGMENT_OVERHEAD > MAX_DATAGRAM_SIZE {
                out.push(std::mem::replace(b, self.new_builder(reader.prefix)).finish());
                stamped = false;
            }
            if !stamped {
                b.info_ts(change.source_timestamp);
                stamped = true;
            }
            if let Err(e) = b.data_frag(self.data_frag_for(change, reader, number)) {
                log::warn!(
                    "[WRITER] {} cannot encode #{} fragment {}: {}",
                    self.guid,
                    change.sequence_number,
                    number,
                    e
                );
                return false;
            }
            self.metrics.increment_fragments_sent(1);
        }
        true
    }

    fn heartbeat_for(&self, proxy: &mut ReaderProxy, final_flag: bool, liveliness_flag: bool) -> Heartbeat {
        let last = self.seq.current();
        let min = self.history.get_min_seq().unwrap_or(last + 1);
        let first = min.max(proxy.irrelevant_up_to + 1).min(last + 1);
        Heartbeat {
            reader_id: proxy.remote_guid.entity_id,
            writer_id: self.guid.entity_id,
            first_sn: first,
            last_sn: last,
            count: proxy.next_heartbeat_count(),
            final_flag,
            liveliness_flag,
        }
    }

    /// Drain `requested` + `unsent` for one proxy into datagrams.
    fn flush_proxy(&self, proxy: &mut ReaderProxy, force_heartbeat: bool) -> Vec<Vec<u8>> {
        let repair = std::mem::take(&mut proxy.requested);
        let fresh = std::mem::take(&mut proxy.unsent);

        let mut changes = Vec::new();
        let mut gaps = Vec::new();
        for seq in repair.iter().chain(fresh.iter()).copied() {
            if !proxy.is_relevant(seq) {
                gaps.push(seq);
                continue;
            }
            match self.history.get_change(&self.guid, seq) {
                Some(c) => changes.push(c),
                None => gaps.push(seq),
            }
        }
        changes.sort_by_key(|c| c.sequence_number);
        changes.dedup_by_key(|c| c.sequence_number);
        if !proxy.reliable {
            gaps.clear();
        }
        if changes.is_empty() && gaps.is_empty() && !force_heartbeat {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut b = self.new_builder(proxy.remote_guid.prefix);
        for (gap_start, gap_list) in build_gaps(&gaps) {
            b.gap(Gap {
                reader_id: proxy.remote_guid.entity_id,
                writer_id: self.guid.entity_id,
                gap_start,
                gap_list,
            });
            self.metrics.increment_gaps_sent(1);
        }
        for change in &changes {
            if !self.emit_change(&mut out, &mut b, &proxy.remote_guid, change, None) {
                continue;
            }
            proxy.highest_sent = proxy.highest_sent.max(change.sequence_number);
            if repair.contains(&change.sequence_number) {
                self.metrics.increment_retransmissions(1);
            } else {
                self.metrics.increment_data_sent(1);
            }
        }
        if proxy.reliable {
            let hb = self.heartbeat_for(proxy, false, false);
            b.heartbeat(hb);
            self.metrics.increment_heartbeats_sent(1);
        }
        if b.submessage_count() > 1 {
            out.push(b.finish());
        }
        out
    }

    fn dispatch(&self, outbox: Outbox) {
        for (locators, bytes) in outbox {
            self.sender.send_to(&locators, &bytes);
        }
    }

    // ========================================================================
    // Reliability protocol
    // ========================================================================

    /// Handle an ACKNACK from `reader_prefix`.
    pub fn on_acknack(&self, reader_prefix: GuidPrefix, ack: &AckNack) {
        let reader_guid = GUID::new(reader_prefix, ack.reader_id);
        let mut state = self.state.lock();
        let last = self.seq.current();
        let Some(proxy) = state.proxies.get_mut(&reader_guid) else {
            log::debug!("[WRITER] {} ACKNACK from unmatched {}", self.guid, reader_guid);
            return;
        };
        if !proxy.reliable || !proxy.acknack_filter.accept(ack.count) {
            return;
        }
        self.metrics.increment_acknacks_received(1);

        let acked = (ack.reader_sn_state.base() - 1).min(last);
        if acked > proxy.acked_up_to {
            proxy.acked_up_to = acked;
        }
        for seq in ack.reader_sn_state.iter() {
            if seq <= last && seq > proxy.acked_up_to {
                proxy.requested.insert(seq);
            }
        }
        let force_heartbeat = !ack.final_flag && proxy.requested.is_empty();
        let locators = proxy.locators.clone();
        let datagrams = self.flush_proxy(proxy, force_heartbeat);
        self.remove_acked(&state);
        drop(state);

        self.acked.notify_all();
        for bytes in datagrams {
            self.sender.send_to(&locators, &bytes);
        }
    }

    /// Handle a NACK_FRAG: resend the listed fragments, or GAP the sample if
    /// it is no longer in the History.
    pub fn on_nack_frag(&self, reader_prefix: GuidPrefix, nack: &NackFrag) {
        let reader_guid = GUID::new(reader_prefix, nack.reader_id);
        let mut state = self.state.lock();
        if nack.writer_sn > self.seq.current() {
            return;
        }
        let Some(proxy) = state.proxies.get_mut(&reader_guid) else {
            log::debug!("[WRITER] {} NACK_FRAG from unmatched {}", self.guid, reader_guid);
            return;
        };
        if !proxy.reliable || !proxy.nack_frag_filter.accept(nack.count) {
            return;
        }
        self.metrics.increment_nack_frags_received(1);

        let dst = proxy.remote_guid;
        let mut out = Vec::new();
        let mut b = self.new_builder(dst.prefix);
        let change = self
            .history
            .get_change(&self.guid, nack.writer_sn)
            .filter(|_| proxy.is_relevant(nack.writer_sn));
        match change {
            Some(change) => {
                let wanted: Vec<u32> = nack.fragment_number_state.iter().collect();
                if self.emit_change(&mut out, &mut b, &dst, &change, Some(&wanted)) {
                    self.metrics.increment_retransmissions(1);
                }
            }
            None => {
                b.gap(Gap {
                    reader_id: dst.entity_id,
                    writer_id: self.guid.entity_id,
                    gap_start: nack.writer_sn,
                    gap_list: SequenceNumberSet::new(nack.writer_sn + 1),
                });
                self.metrics.increment_gaps_sent(1);
            }
        }
        if b.submessage_count() > 1 {
            out.push(b.finish());
        }
        let locators = proxy.locators.clone();
        drop(state);

        for bytes in out {
            self.sender.send_to(&locators, &bytes);
        }
    }

    /// Periodic HEARTBEAT to every reliable reader with unacknowledged data.
    ///
    /// Returns whether any reliable reader is still matched.
    pub fn send_heartbeats(&self) -> bool {
        let mut state = self.state.lock();
        self.purge_expired();
        let last = self.seq.current();
        let mut outbox = Outbox::new();
        for proxy in state.proxies.values_mut() {
            if !proxy.has_unacked(last) {
                continue;
            }
            let mut b = self.new_builder(proxy.remote_guid.prefix);
            let hb = self.heartbeat_for(proxy, false, false);
            b.heartbeat(hb);
            self.metrics.increment_heartbeats_sent(1);
            outbox.push((proxy.locators.clone(), b.finish()));
        }
        let any_reliable = state.proxies.values().any(|p| p.reliable);
        drop(state);
        self.dispatch(outbox);
        any_reliable
    }

    /// HEARTBEAT with the liveliness flag to every matched reader.
    pub fn assert_liveliness(&self) {
        let mut state = self.state.lock();
        let mut outbox = Outbox::new();
        for proxy in state.proxies.values_mut() {
            let mut b = self.new_builder(proxy.remote_guid.prefix);
            let hb = self.heartbeat_for(proxy, true, true);
            b.heartbeat(hb);
            self.metrics.increment_heartbeats_sent(1);
            outbox.push((proxy.locators.clone(), b.finish()));
        }
        drop(state);
        self.dispatch(outbox);
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Add a ReaderProxy. Returns false (after refreshing locators) if the
    /// reader was already matched.
    pub fn matched_reader_add(&self, info: RemoteReaderInfo) -> bool {
        let mut state = self.state.lock();
        if let Some(existing) = state.proxies.get_mut(&info.guid) {
            existing.locators = info.locators;
            return false;
        }

        let guid = info.guid;
        let last = self.seq.current();
        let mut proxy = ReaderProxy::new(info);
        self.purge_expired();
        let mut datagrams = Vec::new();

        if self.qos.durability >= Durability::TransientLocal && proxy.durability == Durability::Volatile {
            // Nothing written so far concerns this reader.
            proxy.irrelevant_up_to = last;
            proxy.acked_up_to = last;
            proxy.highest_sent = last;
            if proxy.reliable {
                let mut b = self.new_builder(guid.prefix);
                if last >= 1 {
                    b.gap(Gap {
                        reader_id: guid.entity_id,
                        writer_id: self.guid.entity_id,
                        gap_start: 1,
                        gap_list: SequenceNumberSet::new(last + 1),
                    });
                    self.metrics.increment_gaps_sent(1);
                }
                let hb = self.heartbeat_for(&mut proxy, false, false);
                b.heartbeat(hb);
                self.metrics.increment_heartbeats_sent(1);
                datagrams.push(b.finish());
            }
        } else {
            let floor = self.history.get_min_seq().map_or(last, |min| min - 1);
            proxy.acked_up_to = floor;
            proxy.highest_sent = floor;
            if proxy.reliable {
                // History is repaired through HEARTBEAT -> ACKNACK -> resend.
                datagrams = self.flush_proxy(&mut proxy, true);
            } else {
                proxy.unsent.extend(self.history.iter_from(floor + 1).iter().map(|c| c.sequence_number));
                datagrams = self.flush_proxy(&mut proxy, false);
            }
        }

        let reliable = proxy.reliable;
        let locators = proxy.locators.clone();
        state.proxies.insert(guid, proxy);
        self.remove_acked(&state);
        drop(state);

        log::debug!("[WRITER] {} matched reader {} (reliable={})", self.guid, guid, reliable);
        for bytes in datagrams {
            self.sender.send_to(&locators, &bytes);
        }
        if reliable {
            self.ensure_heartbeat_timer();
        }
        true
    }

    /// Remove a ReaderProxy; may release acked changes and unblock writers.
    pub fn matched_reader_remove(&self, reader: &GUID) -> bool {
        let mut state = self.state.lock();
        let removed = state.proxies.remove(reader).is_some();
        if removed {
            if self.qos.durability == Durability::Volatile && state.proxies.is_empty() {
                self.history.clear();
            } else {
                self.remove_acked(&state);
            }
        }
        let any_reliable = state.proxies.values().any(|p| p.reliable);
        drop(state);

        if removed {
            log::debug!("[WRITER] {} unmatched reader {}", self.guid, reader);
            self.acked.notify_all();
            if !any_reliable {
                if let Some(timer) = self.hb_timer.lock().as_ref() {
                    timer.disarm();
                }
            }
        }
        removed
    }

    pub fn matched_readers(&self) -> Vec<GUID> {
        self.state.lock().proxies.keys().copied().collect()
    }

    pub fn reader_proxy(&self, reader: &GUID) -> Option<ReaderProxy> {
        self.state.lock().proxies.get(reader).cloned()
    }

    /// Whether every matched reliable reader acknowledged `seq`.
    pub fn is_acked_by_all(&self, seq: i64) -> bool {
        self.state
            .lock()
            .proxies
            .values()
            .all(|p| !p.reliable || p.acked_up_to >= seq)
    }

    /// Block until every reliable reader acknowledged everything written.
    ///
    /// # Errors
    /// `Timeout` if that does not happen within `timeout`.
    pub fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            let last = self.seq.current();
            if state.proxies.values().all(|p| !p.has_unacked(last)) {
                return Ok(());
            }
            match deadline {
                Some(d) => {
                    if self.acked.wait_until(&mut state, d).timed_out() {
                        let last = self.seq.current();
                        if state.proxies.values().all(|p| !p.has_unacked(last)) {
                            return Ok(());
                        }
                        return Err(Error::Timeout);
                    }
                }
                None => self.acked.wait(&mut state),
            }
        }
    }

    // ========================================================================
    // Deadline
    // ========================================================================

    fn track_deadline(&self, kind: ChangeKind, instance: Option<InstanceHandle>) {
        let armed = {
            let mut tracker = self.deadline.lock();
            if !tracker.is_enabled() {
                return;
            }
            if kind.is_alive() {
                tracker.on_update(instance, Instant::now());
            } else {
                tracker.forget(instance.as_ref());
            }
            tracker.next_due()
        };
        if let (Some(due), Some(timer)) = (armed, self.deadline_timer.lock().as_ref()) {
            if !timer.is_armed() {
                timer.restart(due.saturating_duration_since(Instant::now()));
            }
        }
    }

    /// Report instances whose offered deadline elapsed by `now`; returns the
    /// next time a check is due.
    pub fn check_deadlines(&self, now: Instant) -> Option<Instant> {
        let (missed, total, next) = {
            let mut tracker = self.deadline.lock();
            let missed = tracker.check(now);
            (missed, tracker.missed_total(), tracker.next_due())
        };
        if let Some(last) = missed.last().copied() {
            log::debug!(
                "[WRITER] {} offered deadline missed for {} instance(s)",
                self.guid,
                missed.len()
            );
            let listener = self.listener.read().clone();
            if let Some(listener) = listener {
                listener.on_deadline_missed(total, missed.len() as u64, last);
            }
        }
        next
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn next_heartbeat_delay(&self) -> Duration {
        let timing = *self.timing.lock();
        jittered_period(timing.heartbeat_period, timing.heartbeat_jitter)
    }

    /// Create the periodic HEARTBEAT timer on the participant's event thread.
    pub fn attach_timers(self: &Arc<Self>, events: &EventThread) {
        let weak = Arc::downgrade(self);
        let handle = events.create_idle(move || {
            let Some(engine) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            if engine.send_heartbeats() {
                TimerAction::RearmAfter(engine.next_heartbeat_delay())
            } else {
                TimerAction::Stop
            }
        });
        let has_reliable = self.state.lock().proxies.values().any(|p| p.reliable);
        if has_reliable {
            handle.restart(self.next_heartbeat_delay());
        }
        *self.hb_timer.lock() = Some(handle);

        let weak = Arc::downgrade(self);
        let deadline = events.create_idle(move || {
            let Some(engine) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            let now = Instant::now();
            match engine.check_deadlines(now) {
                Some(due) => TimerAction::RearmAfter(due.saturating_duration_since(now)),
                None => TimerAction::Stop,
            }
        });
        if let Some(due) = self.deadline.lock().next_due() {
            deadline.restart(due.saturating_duration_since(Instant::now()));
        }
        *self.deadline_timer.lock() = Some(deadline);
    }

    fn ensure_heartbeat_timer(&self) {
        if let Some(timer) = self.hb_timer.lock().as_ref() {
            if !timer.is_armed() {
                timer.restart(self.next_heartbeat_delay());
            }
        }
    }

    /// Cancel timers synchronously (endpoint deletion).
    pub fn detach_timers(&self) {
        let timers = [self.hb_timer.lock().take(), self.deadline_timer.lock().take()];
        for timer in timers.into_iter().flatten() {
            timer.cancel();
        }
    }
}

impl std::fmt::Debug for WriterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterEngine")
            .field("guid", &self.guid)
            .field("last_sequence", &self.seq.current())
            .field("history", &self.history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityId;
    use crate::protocol::{RtpsMessage, Submessage};
    use crate::transport::Transport;
    use std::net::Ipv4Addr;

    /// Captures datagrams instead of delivering them.
    #[derive(Default)]
    struct Capture(Mutex<Vec<Vec<u8>>>);

    impl Transport for Capture {
        fn send(&self, _dest: &Locator, bytes: &[u8]) -> Result<()> {
            self.0.lock().push(bytes.to_vec());
            Ok(())
        }
        fn open_output_channel(&self, _dest: &Locator) -> Result<()> {
            Ok(())
        }
        fn open_input_channel(
            &self,
            _locator: &Locator,
            _receiver: Arc<dyn crate::transport::ReceiverResource>,
        ) -> Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn submessages(&self) -> Vec<Submessage> {
            self.0
                .lock()
                .drain(..)
                .flat_map(|bytes| RtpsMessage::parse(&bytes).unwrap().submessages)
                .collect()
        }
    }

    fn writer_guid() -> GUID {
        GUID::new(GuidPrefix([1; 12]), EntityId::user_writer(1, false))
    }

    fn reader_guid(n: u8) -> GUID {
        GUID::new(GuidPrefix([n; 12]), EntityId::user_reader(1, false))
    }

    fn engine(qos: QoS) -> (WriterEngine, Arc<Capture>) {
        let capture = Arc::new(Capture::default());
        let sender = Arc::new(RtpsSender::new(capture.clone(), writer_guid().prefix));
        (WriterEngine::new(writer_guid(), qos, sender, WriterTiming::default()), capture)
    }

    fn reader(n: u8, reliable: bool, durability: Durability) -> RemoteReaderInfo {
        RemoteReaderInfo {
            guid: reader_guid(n),
            reliable,
            durability,
            locators: vec![Locator::udpv4(Ipv4Addr::LOCALHOST, 7411 + u32::from(n))],
        }
    }

    fn payload(seq: u8) -> Payload {
        Payload::from_vec(vec![seq, 0, 0, 0])
    }

    fn ack(n: u8, base: i64, missing: &[i64], count: u32) -> AckNack {
        AckNack {
            reader_id: reader_guid(n).entity_id,
            writer_id: writer_guid().entity_id,
            reader_sn_state: SequenceNumberSet::from_sequences(base, missing.iter().copied()),
            count,
            final_flag: missing.is_empty(),
        }
    }

    #[test]
    fn test_write_sends_data_and_piggyback_heartbeat() {
        let (w, cap) = engine(QoS::reliable().keep_all());
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        cap.submessages();
        assert_eq!(w.write(payload(1), None, Time::now()).unwrap(), 1);
        let subs = cap.submessages();
        assert!(matches!(subs[0], Submessage::InfoDst(_)));
        assert!(subs.iter().any(|s| matches!(s, Submessage::Data(d) if d.writer_sn == 1)));
        assert!(subs
            .iter()
            .any(|s| matches!(s, Submessage::Heartbeat(hb) if hb.first_sn == 1 && hb.last_sn == 1)));
        assert_eq!(w.history().len(), 1);
    }

    #[test]
    fn test_acknack_releases_volatile_history_and_repairs() {
        let (w, cap) = engine(QoS::reliable().keep_all());
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        for i in 1..=3 {
            w.write(payload(i), None, Time::now()).unwrap();
        }
        cap.submessages();

        w.on_acknack(reader_guid(2).prefix, &ack(2, 2, &[2, 3], 1));
        assert_eq!(w.reader_proxy(&reader_guid(2)).unwrap().acked_up_to, 1);
        assert_eq!(w.history().get_min_seq(), Some(2));
        let resent: Vec<i64> = cap
            .submessages()
            .iter()
            .filter_map(|s| match s {
                Submessage::Data(d) => Some(d.writer_sn),
                _ => None,
            })
            .collect();
        assert_eq!(resent, vec![2, 3]);
        assert_eq!(w.metrics().retransmissions(), 2);

        // Stale count is ignored.
        w.on_acknack(reader_guid(2).prefix, &ack(2, 4, &[], 1));
        assert_eq!(w.history().len(), 2);
        w.on_acknack(reader_guid(2).prefix, &ack(2, 4, &[], 2));
        assert!(w.history().is_empty());
        assert!(w.is_acked_by_all(3));
    }

    #[test]
    fn test_evicted_request_answered_with_gap() {
        let (w, cap) = engine(QoS::reliable().keep_last(1));
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        for i in 1..=3 {
            w.write(payload(i), None, Time::now()).unwrap();
        }
        cap.submessages();
        w.on_acknack(reader_guid(2).prefix, &ack(2, 1, &[1, 2, 3], 1));
        let subs = cap.submessages();
        let gap = subs
            .iter()
            .find_map(|s| match s {
                Submessage::Gap(g) => Some(g.sequences().collect::<Vec<_>>()),
                _ => None,
            })
            .unwrap();
        assert_eq!(gap, vec![1, 2]);
        assert!(subs.iter().any(|s| matches!(s, Submessage::Data(d) if d.writer_sn == 3)));
    }

    #[test]
    fn test_no_readers_keeps_history() {
        let (w, _cap) = engine(QoS::reliable().keep_all());
        for i in 1..=3 {
            w.write(payload(i), None, Time::now()).unwrap();
        }
        assert_eq!(w.history().len(), 3);
    }

    #[test]
    fn test_keep_all_blocks_then_fails() {
        let qos = QoS::reliable()
            .keep_all()
            .max_samples(2)
            .max_blocking_time(Duration::from_millis(20));
        let (w, _cap) = engine(qos);
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        w.write(payload(1), None, Time::now()).unwrap();
        w.write(payload(2), None, Time::now()).unwrap();
        let start = Instant::now();
        assert!(matches!(
            w.write(payload(3), None, Time::now()),
            Err(Error::ResourceLimitExceeded(_))
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(w.last_sequence(), 2, "failed write must not consume a sequence number");
    }

    #[test]
    fn test_unmatch_unblocks_writer() {
        let qos = QoS::reliable()
            .keep_all()
            .max_samples(1)
            .max_blocking_time(Duration::from_secs(5));
        let (w, _cap) = engine(qos);
        let w = Arc::new(w);
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        w.write(payload(1), None, Time::now()).unwrap();

        let w2 = Arc::clone(&w);
        let t = std::thread::spawn(move || w2.write(payload(2), None, Time::now()));
        std::thread::sleep(Duration::from_millis(20));
        assert!(w.matched_reader_remove(&reader_guid(2)));
        assert_eq!(t.join().unwrap().unwrap(), 2);
    }

    #[test]
    fn test_transient_local_to_volatile_reader_gets_gap() {
        let (w, cap) = engine(QoS::reliable().keep_last(10).transient_local());
        for i in 1..=3 {
            w.write(payload(i), None, Time::now()).unwrap();
        }
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        let subs = cap.submessages();
        let gap: Vec<i64> = subs
            .iter()
            .find_map(|s| match s {
                Submessage::Gap(g) => Some(g.sequences().collect()),
                _ => None,
            })
            .unwrap();
        assert_eq!(gap, vec![1, 2, 3]);
        let proxy = w.reader_proxy(&reader_guid(2)).unwrap();
        assert_eq!(proxy.acked_up_to, 3);
        assert_eq!(w.history().len(), 3, "TRANSIENT_LOCAL keeps history");

        // A TRANSIENT_LOCAL reader is offered the history via HEARTBEAT.
        w.matched_reader_add(reader(3, true, Durability::TransientLocal));
        let subs = cap.submessages();
        assert!(subs
            .iter()
            .any(|s| matches!(s, Submessage::Heartbeat(hb) if hb.first_sn == 1 && hb.last_sn == 3)));
    }

    #[test]
    fn test_best_effort_late_joiner_gets_history_pushed() {
        let (w, cap) = engine(QoS::best_effort().keep_last(5));
        for i in 1..=2 {
            w.write(payload(i), None, Time::now()).unwrap();
        }
        w.matched_reader_add(reader(2, false, Durability::Volatile));
        let subs = cap.submessages();
        let sent: Vec<i64> = subs
            .iter()
            .filter_map(|s| match s {
                Submessage::Data(d) => Some(d.writer_sn),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![1, 2]);
        assert!(!subs.iter().any(|s| matches!(s, Submessage::Heartbeat(_))));
        assert!(w.history().is_empty(), "best-effort watermark releases sent changes");
    }

    #[test]
    fn test_wait_for_acknowledgments() {
        let (w, _cap) = engine(QoS::reliable().keep_all());
        let w = Arc::new(w);
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        w.write(payload(1), None, Time::now()).unwrap();
        assert_eq!(
            w.wait_for_acknowledgments(Duration::from_millis(10)),
            Err(Error::Timeout)
        );
        let w2 = Arc::clone(&w);
        let t = std::thread::spawn(move || w2.wait_for_acknowledgments(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        w.on_acknack(reader_guid(2).prefix, &ack(2, 2, &[], 1));
        assert!(t.join().unwrap().is_ok());
    }

    #[test]
    fn test_dispose_carries_status_info() {
        let (w, cap) = engine(QoS::reliable().keep_all());
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        cap.submessages();
        let key = InstanceHandle::from_key(b"k1");
        w.write_change(ChangeKind::NotAliveDisposed, Some(key), Payload::empty(), Time::now())
            .unwrap();
        let data = cap
            .submessages()
            .into_iter()
            .find_map(|s| match s {
                Submessage::Data(d) => Some(d),
                _ => None,
            })
            .unwrap();
        let qos = data.inline_qos.unwrap();
        assert_eq!(qos.key_hash, Some(key.0));
        assert_eq!(qos.status_info, Some(1));
        assert!(data.serialized_payload.is_none());
    }

    #[test]
    fn test_liveliness_heartbeat_flag() {
        let (w, cap) = engine(QoS::reliable());
        w.matched_reader_add(reader(2, false, Durability::Volatile));
        cap.submessages();
        w.assert_liveliness();
        assert!(cap
            .submessages()
            .iter()
            .any(|s| matches!(s, Submessage::Heartbeat(hb) if hb.liveliness_flag)));
    }

    fn frags(subs: &[Submessage]) -> Vec<&DataFrag> {
        subs.iter()
            .filter_map(|s| match s {
                Submessage::DataFrag(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_large_payload_is_fragmented() {
        let (w, cap) = engine(QoS::reliable().keep_all());
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        cap.submessages();
        let bytes: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        w.write(Payload::from_vec(bytes.clone()), None, Time::now()).unwrap();

        let subs = cap.submessages();
        assert!(!subs.iter().any(|s| matches!(s, Submessage::Data(_))));
        let frags = frags(&subs);
        assert_eq!(frags.len(), 20);
        assert!(frags.iter().all(|f| f.writer_sn == 1 && f.sample_size == 20_000));
        assert_eq!(frags[0].fragment_starting_num, 1);
        assert_eq!(frags[19].fragments.len(), 20_000 - 19 * FRAGMENT_SIZE);
        let joined: Vec<u8> = frags.iter().flat_map(|f| f.fragments.iter().copied()).collect();
        assert_eq!(joined, bytes);
        assert_eq!(w.metrics().snapshot().fragments_sent, 20);
    }

    #[test]
    fn test_fragments_span_datagrams_with_timestamp() {
        let (w, cap) = engine(QoS::reliable().keep_all());
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        cap.submessages();
        w.write(Payload::from_vec(vec![7; 150_000]), None, Time::now()).unwrap();

        let datagrams: Vec<Vec<u8>> = cap.0.lock().drain(..).collect();
        assert!(datagrams.len() >= 3);
        for bytes in &datagrams {
            assert!(bytes.len() <= MAX_DATAGRAM_SIZE);
            let subs = RtpsMessage::parse(bytes).unwrap().submessages;
            assert!(matches!(subs[0], Submessage::InfoDst(_)));
            assert!(matches!(subs[1], Submessage::InfoTs(Some(_))));
        }
    }

    #[test]
    fn test_nack_frag_resends_requested_fragments() {
        let (w, cap) = engine(QoS::reliable().keep_last(1));
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        w.write(Payload::from_vec(vec![1; 10_000]), None, Time::now()).unwrap();
        cap.submessages();

        let nack = |sn: i64, count: u32| NackFrag {
            reader_id: reader_guid(2).entity_id,
            writer_id: writer_guid().entity_id,
            writer_sn: sn,
            fragment_number_state: crate::protocol::FragmentNumberSet::from_fragments(3, [3, 7]),
            count,
        };
        w.on_nack_frag(reader_guid(2).prefix, &nack(1, 1));
        let subs = cap.submessages();
        let resent: Vec<u32> = frags(&subs).iter().map(|f| f.fragment_starting_num).collect();
        assert_eq!(resent, vec![3, 7]);

        // Repeated count is ignored.
        w.on_nack_frag(reader_guid(2).prefix, &nack(1, 1));
        assert!(cap.submessages().is_empty());

        // Once the sample is gone the reader is told to give up on it.
        w.write(payload(2), None, Time::now()).unwrap();
        cap.submessages();
        w.on_nack_frag(reader_guid(2).prefix, &nack(1, 2));
        let gap = cap
            .submessages()
            .into_iter()
            .find_map(|s| match s {
                Submessage::Gap(g) => Some(g.sequences().collect::<Vec<_>>()),
                _ => None,
            })
            .unwrap();
        assert_eq!(gap, vec![1]);
    }

    #[test]
    fn test_per_instance_limit_reclaims_within_instance() {
        let qos = QoS::reliable()
            .keep_all()
            .transient_local()
            .max_samples_per_instance(1);
        let (w, _cap) = engine(qos);
        let a = InstanceHandle::from_key(b"A");
        let b = InstanceHandle::from_key(b"B");
        w.write(payload(1), Some(b), Time::now()).unwrap();
        w.write(payload(2), Some(a), Time::now()).unwrap();
        assert_eq!(w.write(payload(3), Some(a), Time::now()).unwrap(), 3);
        assert_eq!(w.history().samples_for_instance(Some(&b)), 1);
        assert_eq!(w.history().samples_for_instance(Some(&a)), 1);
        assert!(w.history().contains(&writer_guid(), 3));
    }

    #[test]
    fn test_expired_changes_purged_and_gapped() {
        let qos = QoS::reliable().keep_all().lifespan(Duration::from_millis(50));
        let (w, cap) = engine(qos);
        w.matched_reader_add(reader(2, true, Durability::Volatile));
        let stale = Time::from_duration(Time::now().to_duration() - Duration::from_secs(1));
        w.write(payload(1), None, stale).unwrap();
        w.write(payload(2), None, Time::now()).unwrap();
        assert_eq!(w.history().len(), 1);
        assert_eq!(w.history().get_min_seq(), Some(2));

        cap.submessages();
        w.on_acknack(reader_guid(2).prefix, &ack(2, 1, &[1], 1));
        let subs = cap.submessages();
        assert!(subs
            .iter()
            .any(|s| matches!(s, Submessage::Gap(g) if g.sequences().any(|sn| sn == 1))));
        assert!(!subs.iter().any(|s| matches!(s, Submessage::Data(d) if d.writer_sn == 1)));
    }

    #[derive(Default)]
    struct Missed(Mutex<Vec<(u64, u64, Option<InstanceHandle>)>>);

    impl WriterEvents for Missed {
        fn on_deadline_missed(&self, total: u64, delta: u64, last_instance: Option<InstanceHandle>) {
            self.0.lock().push((total, delta, last_instance));
        }
    }

    #[test]
    fn test_offered_deadline_missed_per_instance() {
        let (w, _cap) = engine(QoS::reliable().deadline(Duration::from_millis(100)));
        let missed = Arc::new(Missed::default());
        w.set_listener(Some(missed.clone()));
        let key = InstanceHandle::from_key(b"k");
        w.write(payload(1), Some(key), Time::now()).unwrap();

        assert!(w.check_deadlines(Instant::now()).is_some());
        assert!(missed.0.lock().is_empty());
        let later = Instant::now() + Duration::from_millis(150);
        assert!(w.check_deadlines(later).is_some());
        assert_eq!(missed.0.lock().as_slice(), &[(1, 1, Some(key))]);
        assert_eq!(w.deadline_missed_total(), 1);

        // A disposed instance owes nothing.
        w.write_change(ChangeKind::NotAliveDisposed, Some(key), Payload::empty(), Time::now())
            .unwrap();
        assert!(w.check_deadlines(later + Duration::from_secs(1)).is_none());
        assert_eq!(missed.0.lock().len(), 1);
    }
}
