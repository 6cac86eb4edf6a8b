// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader Engine (stateful RTPS reader)
//!
//! One [`ReaderEngine`] per local DataReader (and per built-in SEDP / WLP
//! reader). Each matched writer gets a [`WriterProxy`] that reorders,
//! deduplicates and flow-controls its sample stream before it reaches the
//! reader History.
//!
//! ```text
//! DATA ──▶ dedup ──▶ buffer ──▶ deliver contiguous ──▶ History ──▶ take/read
//!                       │                                  ▲
//! HEARTBEAT ──▶ missing set ──▶ NackScheduler ──▶ ACKNACK  │
//! GAP ────────▶ write off ──────────────────────────────────┘
//! ```
//!
//! Best-effort proxies skip buffering: anything newer than the last delivered
//! sample is accepted and the hole is counted as lost.
//!
//! DATA_FRAG runs are reassembled per writer ([`FragmentBuffer`]) and then
//! follow the DATA path; missing fragments are requested with NACK_FRAG next
//! to the ACKNACK.
//!
//! Before a sample enters the History it must pass three filters: not
//! outdated (BY_SOURCE_TIMESTAMP), not past its writer's LIFESPAN, and from
//! the instance owner when OWNERSHIP is EXCLUSIVE. Filtered samples are
//! settled without counting as lost.
//!
//! # Locking
//!
//! `state` is taken before the History, ownership and deadline locks.
//! Listener callbacks and sends happen after `state` is released.

mod fragments;
mod proxy;

pub use fragments::{FragmentBuffer, MAX_SAMPLE_SIZE};
pub use proxy::{RemoteWriterInfo, WriterProxy};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::Timing;
use crate::core::{EventThread, GuidPrefix, Locator, Payload, Time, TimerAction, TimerHandle, GUID};
use crate::history::{CacheChange, ChangeKind, HistoryAttributes, HistoryCache, InstanceHandle};
use crate::protocol::{AckNack, Data, DataFrag, Gap, Heartbeat, NackFrag};
use crate::qos::{DeadlineTracker, History, Lifespan, OwnershipArbiter, OwnershipKind, QoS};
use crate::reliability::{response_delay, ReliableMetrics};
use crate::transport::RtpsSender;

/// Upper bound on sequence numbers written off one by one from a single GAP
/// range that is not adjacent to the delivered prefix.
const MAX_GAP_RANGE: i64 = 1 << 16;

/// Reader-side protocol events, delivered without engine locks held.
pub trait ReaderEvents: Send + Sync {
    /// New samples reached the History.
    fn on_data_available(&self) {}

    /// Samples were declared irrecoverable (`total` is cumulative).
    fn on_sample_lost(&self, _total: u64, _delta: u64) {}

    /// DATA or a liveliness HEARTBEAT arrived from `writer`.
    fn on_writer_asserted(&self, _writer: &GUID) {}

    /// Instances received nothing within the DEADLINE period (`total` is
    /// cumulative).
    fn on_deadline_missed(&self, _total: u64, _delta: u64, _last_instance: Option<InstanceHandle>) {}
}

/// ACKNACK scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderTiming {
    pub nack_response_delay: Duration,
    pub nack_backoff_base: Duration,
    pub nack_max_retries: u32,
    pub acknack_period: Duration,
}

impl From<&Timing> for ReaderTiming {
    fn from(t: &Timing) -> Self {
        Self {
            nack_response_delay: t.nack_response_delay,
            nack_backoff_base: t.nack_backoff_base,
            nack_max_retries: t.nack_max_retries,
            acknack_period: t.acknack_period,
        }
    }
}

impl Default for ReaderTiming {
    fn default() -> Self {
        Self::from(&Timing::default())
    }
}

struct ReaderState {
    writers: BTreeMap<GUID, WriterProxy>,
    lost_total: u64,
}

/// What one protocol event produced, acted upon after the lock is dropped.
#[derive(Default)]
struct Outcome {
    delivered: usize,
    lost: u64,
    lost_total: u64,
    asserted: Option<GUID>,
    outbox: Vec<(Vec<Locator>, Vec<u8>)>,
    next_due: Option<Instant>,
}

/// Stateful reliable / best-effort reader.
pub struct ReaderEngine {
    guid: GUID,
    qos: QoS,
    history: HistoryCache,
    state: Mutex<ReaderState>,
    sender: Arc<RtpsSender>,
    metrics: Arc<ReliableMetrics>,
    listener: RwLock<Option<Arc<dyn ReaderEvents>>>,
    timing: ReaderTiming,
    response_timer: Mutex<Option<TimerHandle>>,
    periodic_timer: Mutex<Option<TimerHandle>>,
    ownership: Mutex<OwnershipArbiter>,
    deadline: Mutex<DeadlineTracker>,
    deadline_timer: Mutex<Option<TimerHandle>>,
}

impl ReaderEngine {
    pub fn new(guid: GUID, qos: QoS, sender: Arc<RtpsSender>, timing: ReaderTiming) -> Self {
        Self {
            guid,
            history: HistoryCache::new(HistoryAttributes::from_qos(&qos)),
            deadline: Mutex::new(DeadlineTracker::new(qos.deadline.period)),
            qos,
            state: Mutex::new(ReaderState {
                writers: BTreeMap::new(),
                lost_total: 0,
            }),
            sender,
            metrics: Arc::new(ReliableMetrics::new()),
            listener: RwLock::new(None),
            timing,
            response_timer: Mutex::new(None),
            periodic_timer: Mutex::new(None),
            ownership: Mutex::new(OwnershipArbiter::new()),
            deadline_timer: Mutex::new(None),
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

    pub fn set_listener(&self, listener: Option<Arc<dyn ReaderEvents>>) {
        *self.listener.write() = listener;
    }

    /// Cumulative count of samples declared lost.
    pub fn samples_lost(&self) -> u64 {
        self.state.lock().lost_total
    }

    /// DEADLINE changed through `set_qos`; applies from the next sample.
    pub fn set_deadline_period(&self, period: Duration) {
        self.deadline.lock().set_period(period);
    }

    /// Cumulative requested-deadline misses.
    pub fn deadline_missed_total(&self) -> u64 {
        self.deadline.lock().missed_total()
    }

    /// Current owner of `instance` (EXCLUSIVE ownership only).
    pub fn instance_owner(&self, instance: Option<&InstanceHandle>) -> Option<GUID> {
        self.ownership.lock().owner_of(instance)
    }

    // ========================================================================
    // Inbound protocol
    // ========================================================================

    /// Handle DATA from `writer_prefix`. `source_ts` comes from a preceding
    /// INFO_TS, if any.
    pub fn on_data(&self, writer_prefix: GuidPrefix, data: &Data, source_ts: Option<Time>) {
        let writer = GUID::new(writer_prefix, data.writer_id);
        let now = Instant::now();
        let mut outcome = Outcome::default();
        let mut state = self.state.lock();
        let Some(proxy) = state.writers.get_mut(&writer) else {
            log::trace!("[READER] {} DATA from unmatched {}", self.guid, writer);
            return;
        };
        proxy.alive = true;
        outcome.asserted = Some(writer);

        let seq = data.writer_sn;
        let change = change_from_data(writer, data, source_ts.unwrap_or_else(Time::now));

        if proxy.reliable {
            if proxy.is_duplicate(seq) {
                self.metrics.increment_duplicates_dropped(1);
            } else {
                proxy.announced_last = proxy.announced_last.max(seq);
                proxy.buffered.insert(seq, change);
                if seq > proxy.lower_bound() {
                    proxy.nack.on_gap_detected(now);
                    outcome.next_due = proxy.nack.due();
                }
                self.deliver(proxy, &mut outcome);
            }
        } else if seq <= proxy.delivered_up_to {
            self.metrics.increment_duplicates_dropped(1);
        } else {
            if proxy.synced && seq > proxy.delivered_up_to + 1 {
                outcome.lost += (seq - proxy.delivered_up_to - 1) as u64;
            }
            proxy.delivered_up_to = seq;
            proxy.synced = true;
            proxy.fragments.discard_below(seq + 1);
            if self.admit(proxy, &change) {
                self.store(change, &mut outcome);
            }
        }

        self.settle(&mut state, &mut outcome);
        drop(state);
        self.finish(outcome);
    }

    /// Handle a HEARTBEAT from `writer_prefix`.
    pub fn on_heartbeat(&self, writer_prefix: GuidPrefix, hb: &Heartbeat) {
        let writer = GUID::new(writer_prefix, hb.writer_id);
        let now = Instant::now();
        let mut outcome = Outcome::default();
        let mut state = self.state.lock();
        let Some(proxy) = state.writers.get_mut(&writer) else {
            log::trace!("[READER] {} HEARTBEAT from unmatched {}", self.guid, writer);
            return;
        };
        if hb.liveliness_flag {
            proxy.alive = true;
            outcome.asserted = Some(writer);
        }
        if !proxy.reliable || !proxy.hb_filter.accept(hb.count) {
            drop(state);
            self.finish(outcome);
            return;
        }
        self.metrics.increment_heartbeats_received(1);

        let lost = proxy.mark_lost_below(hb.first_sn);
        if proxy.synced {
            outcome.lost += lost;
        }
        proxy.announced_last = proxy.announced_last.max(hb.last_sn);
        proxy.synced = true;

        self.deliver(proxy, &mut outcome);
        if proxy.needs_repair() || !hb.final_flag {
            proxy
                .nack
                .on_heartbeat(now, response_delay(self.timing.nack_response_delay));
            outcome.next_due = proxy.nack.due();
        }

        self.settle(&mut state, &mut outcome);
        drop(state);
        self.finish(outcome);
    }

    /// Handle a GAP from `writer_prefix`.
    pub fn on_gap(&self, writer_prefix: GuidPrefix, gap: &Gap) {
        let writer = GUID::new(writer_prefix, gap.writer_id);
        let mut outcome = Outcome::default();
        let mut state = self.state.lock();
        let Some(proxy) = state.writers.get_mut(&writer) else {
            return;
        };
        if !proxy.reliable {
            return;
        }
        self.metrics.increment_gaps_received(1);

        let range_end = gap.gap_list.base();
        let mut lost = 0;
        if gap.gap_start <= proxy.lower_bound() {
            lost += proxy.mark_lost_below(range_end);
        } else {
            let capped = range_end.min(gap.gap_start.saturating_add(MAX_GAP_RANGE));
            for seq in gap.gap_start..capped {
                lost += u64::from(proxy.mark_irrecoverable(seq));
            }
        }
        for seq in gap.gap_list.iter() {
            lost += u64::from(proxy.mark_irrecoverable(seq));
        }
        if proxy.synced {
            outcome.lost += lost;
        }

        self.deliver(proxy, &mut outcome);
        self.settle(&mut state, &mut outcome);
        drop(state);
        self.finish(outcome);
    }

    /// Handle a DATA_FRAG from `writer_prefix`. A completed sample continues
    /// as a DATA.
    pub fn on_data_frag(&self, writer_prefix: GuidPrefix, frag: &DataFrag, source_ts: Option<Time>) {
        let writer = GUID::new(writer_prefix, frag.writer_id);
        let now = Instant::now();
        let mut outcome = Outcome::default();
        let mut state = self.state.lock();
        let Some(proxy) = state.writers.get_mut(&writer) else {
            log::trace!("[READER] {} DATA_FRAG from unmatched {}", self.guid, writer);
            return;
        };
        let seq = frag.writer_sn;
        let duplicate = if proxy.reliable {
            proxy.is_duplicate(seq)
        } else {
            seq <= proxy.delivered_up_to
        };
        if duplicate {
            self.metrics.increment_duplicates_dropped(1);
            return;
        }
        let complete = proxy.fragments.insert(frag, source_ts, now);
        if complete.is_none() {
            proxy.alive = true;
            outcome.asserted = Some(writer);
            if proxy.reliable {
                proxy.announced_last = proxy.announced_last.max(seq);
                proxy.nack.on_gap_detected(now);
                outcome.next_due = proxy.nack.due();
            }
            drop(state);
            self.finish(outcome);
            return;
        }
        drop(state);

        if let Some((data, ts)) = complete {
            self.metrics.increment_samples_reassembled(1);
            log::trace!("[READER] {} reassembled #{} from {}", self.guid, seq, writer);
            self.on_data(writer_prefix, &data, ts);
        }
    }

    /// Whether `change` may enter the History. Rejected samples are settled
    /// without counting as lost.
    fn admit(&self, proxy: &WriterProxy, change: &CacheChange) -> bool {
        if self.history.is_outdated(change.instance.as_ref(), change.source_timestamp) {
            log::trace!("[READER] {} dropped outdated #{}", self.guid, change.sequence_number);
            return false;
        }
        if proxy.lifespan.is_expired(change.source_timestamp, Time::now()) {
            log::trace!("[READER] {} dropped expired #{}", self.guid, change.sequence_number);
            return false;
        }
        if self.qos.ownership.kind == OwnershipKind::Exclusive
            && !self
                .ownership
                .lock()
                .accept(change.instance, &proxy.remote_guid, proxy.ownership_strength)
        {
            log::trace!(
                "[READER] {} dropped #{} from non-owner {}",
                self.guid,
                change.sequence_number,
                proxy.remote_guid
            );
            return false;
        }
        true
    }

    /// Insert into the History; a refused insert is a lost sample.
    fn store(&self, change: CacheChange, outcome: &mut Outcome) {
        let seq = change.sequence_number;
        let instance = change.instance;
        let alive = change.kind.is_alive();
        match self.history.add_change(change) {
            Ok(_) => {
                outcome.delivered += 1;
                let mut deadline = self.deadline.lock();
                if alive {
                    deadline.on_update(instance, Instant::now());
                } else {
                    deadline.forget(instance.as_ref());
                }
            }
            Err(e) => {
                log::debug!("[READER] {} rejected #{}: {}", self.guid, seq, e);
                outcome.lost += 1;
            }
        }
    }

    /// Move contiguous buffered samples into the History.
    ///
    /// KEEP_ALL readers stop at the first sample that does not fit; it stays
    /// buffered and is not acknowledged until `take` makes room.
    fn deliver(&self, proxy: &mut WriterProxy, outcome: &mut Outcome) {
        let keep_all = matches!(self.qos.history, History::KeepAll);
        loop {
            let next = proxy.delivered_up_to + 1;
            if let Some(change) = proxy.buffered.get(&next) {
                if !self.admit(proxy, change) {
                    proxy.buffered.remove(&next);
                    proxy.delivered_up_to = next;
                    continue;
                }
                if keep_all && !self.history.has_room_for(change.instance.as_ref()) {
                    break;
                }
                let Some(change) = proxy.buffered.remove(&next) else {
                    break;
                };
                self.store(change, outcome);
                proxy.delivered_up_to = next;
            } else if proxy.irrecoverable.remove(&next) {
                proxy.delivered_up_to = next;
            } else if next < proxy.irrecoverable_below {
                let next_buffered = proxy.buffered.keys().next().map_or(i64::MAX, |k| k - 1);
                proxy.delivered_up_to = (proxy.irrecoverable_below - 1).min(next_buffered);
            } else {
                break;
            }
        }
        proxy.fragments.discard_below(proxy.lower_bound());
    }

    /// Fold per-event losses into the reader totals.
    fn settle(&self, state: &mut ReaderState, outcome: &mut Outcome) {
        if outcome.lost > 0 {
            state.lost_total += outcome.lost;
            self.metrics.record_lost(outcome.lost);
            log::debug!(
                "[READER] {} lost {} samples ({} total)",
                self.guid,
                outcome.lost,
                state.lost_total
            );
        }
        outcome.lost_total = state.lost_total;
    }

    fn finish(&self, outcome: Outcome) {
        for (locators, bytes) in &outcome.outbox {
            self.sender.send_to(locators, bytes);
        }
        if let Some(due) = outcome.next_due {
            self.arm_response_timer(due);
        }
        if outcome.delivered > 0 {
            self.ensure_deadline_timer();
        }
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            if let Some(writer) = outcome.asserted {
                listener.on_writer_asserted(&writer);
            }
            if outcome.lost > 0 {
                listener.on_sample_lost(outcome.lost_total, outcome.lost);
            }
            if outcome.delivered > 0 {
                listener.on_data_available();
            }
        }
    }

    // ========================================================================
    // ACKNACK
    // ========================================================================

    /// ACKNACK, followed by one NACK_FRAG per partially received sample.
    fn acknack_for(&self, proxy: &mut WriterProxy) -> Vec<u8> {
        let set = proxy.ack_state();
        let partial = proxy.fragments.missing();
        let ack = AckNack {
            reader_id: self.guid.entity_id,
            writer_id: proxy.remote_guid.entity_id,
            reader_sn_state: set,
            count: proxy.next_acknack_count(),
            final_flag: set.is_empty() && partial.is_empty(),
        };
        proxy.last_ack_base = set.base();
        self.metrics.increment_acknacks_sent(1);
        let mut b = self.sender.builder();
        b.info_dst(proxy.remote_guid.prefix);
        b.acknack(ack);
        for (writer_sn, fragment_number_state) in partial {
            b.nack_frag(NackFrag {
                reader_id: self.guid.entity_id,
                writer_id: proxy.remote_guid.entity_id,
                writer_sn,
                fragment_number_state,
                count: proxy.next_nack_frag_count(),
            });
            self.metrics.increment_nack_frags_sent(1);
        }
        b.finish()
    }

    /// Send every ACKNACK that is due. Returns the next deadline.
    pub fn process_acknacks(&self, now: Instant) -> Option<Instant> {
        let mut state = self.state.lock();
        let mut outbox = Vec::new();
        for proxy in state.writers.values_mut().filter(|p| p.reliable) {
            if !proxy.nack.poll(now) {
                continue;
            }
            let bytes = self.acknack_for(proxy);
            let still_missing = proxy.needs_repair();
            proxy.nack.on_sent(now, still_missing);
            outbox.push((proxy.locators.clone(), bytes));
        }
        let next = state.writers.values().filter_map(|p| p.nack.due()).min();
        drop(state);
        for (locators, bytes) in outbox {
            self.sender.send_to(&locators, &bytes);
        }
        next
    }

    /// Progress ACKNACK to writers whose delivered prefix advanced since the
    /// last one.
    pub fn send_periodic_acknacks(&self) {
        let mut state = self.state.lock();
        let mut outbox = Vec::new();
        for proxy in state.writers.values_mut().filter(|p| p.reliable) {
            if proxy.delivered_up_to + 1 > proxy.last_ack_base {
                let bytes = self.acknack_for(proxy);
                outbox.push((proxy.locators.clone(), bytes));
            }
        }
        drop(state);
        for (locators, bytes) in outbox {
            self.sender.send_to(&locators, &bytes);
        }
    }

    // ========================================================================
    // Application access
    // ========================================================================

    /// Take the next unread sample. Freed space is refilled from buffered
    /// samples and acknowledged at once.
    pub fn take_next(&self) -> Option<(CacheChange, bool)> {
        self.purge_expired();
        let taken = self.history.take_next();
        if taken.is_some() {
            self.flush();
        }
        taken
    }

    pub fn take_all(&self) -> Vec<(CacheChange, bool)> {
        self.purge_expired();
        let taken = self.history.take_all();
        if !taken.is_empty() {
            self.flush();
        }
        taken
    }

    /// Samples stay in the History, marked read.
    pub fn read_all(&self) -> Vec<(CacheChange, bool)> {
        self.purge_expired();
        self.history.read_all()
    }

    /// Drop History samples past their writer's LIFESPAN.
    fn purge_expired(&self) -> usize {
        let lifespans: Vec<(GUID, Lifespan)> = self
            .state
            .lock()
            .writers
            .values()
            .filter(|p| !p.lifespan.is_infinite())
            .map(|p| (p.remote_guid, p.lifespan))
            .collect();
        if lifespans.is_empty() {
            return 0;
        }
        let now = Time::now();
        let removed = self.history.remove_where(|c| {
            lifespans
                .iter()
                .find(|(writer, _)| *writer == c.writer_guid)
                .is_some_and(|(_, lifespan)| lifespan.is_expired(c.source_timestamp, now))
        });
        if removed > 0 {
            log::trace!("[READER] {} lifespan expired {} samples", self.guid, removed);
            self.flush();
        }
        removed
    }

    fn flush(&self) {
        let mut outcome = Outcome::default();
        let mut state = self.state.lock();
        for proxy in state.writers.values_mut() {
            if proxy.buffered.is_empty() {
                continue;
            }
            let before = proxy.delivered_up_to;
            self.deliver(proxy, &mut outcome);
            if proxy.reliable && proxy.delivered_up_to > before {
                let bytes = self.acknack_for(proxy);
                outcome.outbox.push((proxy.locators.clone(), bytes));
            }
        }
        self.settle(&mut state, &mut outcome);
        drop(state);
        self.finish(outcome);
    }

    // ========================================================================
    // Matching / liveliness
    // ========================================================================

    /// Add a WriterProxy. Reliable writers get a preemptive ACKNACK, which
    /// prompts a HEARTBEAT. Returns false if the writer was already matched.
    pub fn matched_writer_add(&self, info: RemoteWriterInfo) -> bool {
        let mut state = self.state.lock();
        if let Some(existing) = state.writers.get_mut(&info.guid) {
            existing.locators = info.locators;
            existing.ownership_strength = info.ownership_strength;
            existing.lifespan = info.lifespan;
            return false;
        }
        let guid = info.guid;
        let mut proxy = WriterProxy::new(info, self.timing.nack_backoff_base, self.timing.nack_max_retries);
        let mut outbox = Vec::new();
        if proxy.reliable {
            let mut b = self.sender.builder();
            b.info_dst(guid.prefix);
            b.acknack(AckNack {
                reader_id: self.guid.entity_id,
                writer_id: guid.entity_id,
                reader_sn_state: proxy.ack_state(),
                count: proxy.next_acknack_count(),
                final_flag: false,
            });
            outbox.push((proxy.locators.clone(), b.finish()));
        }
        let reliable = proxy.reliable;
        state.writers.insert(guid, proxy);
        drop(state);

        log::debug!("[READER] {} matched writer {} (reliable={})", self.guid, guid, reliable);
        for (locators, bytes) in outbox {
            self.sender.send_to(&locators, &bytes);
        }
        true
    }

    pub fn matched_writer_remove(&self, writer: &GUID) -> bool {
        let removed = self.state.lock().writers.remove(writer).is_some();
        if removed {
            self.ownership.lock().release_writer(writer);
            log::debug!("[READER] {} unmatched writer {}", self.guid, writer);
        }
        removed
    }

    /// OWNERSHIP_STRENGTH or LIFESPAN of a matched writer changed.
    pub fn update_writer_qos(&self, writer: &GUID, ownership_strength: i32, lifespan: Lifespan) {
        let mut state = self.state.lock();
        let Some(proxy) = state.writers.get_mut(writer) else {
            return;
        };
        proxy.lifespan = lifespan;
        if proxy.ownership_strength != ownership_strength {
            log::debug!(
                "[READER] {} writer {} strength {} -> {}",
                self.guid,
                writer,
                proxy.ownership_strength,
                ownership_strength
            );
            proxy.ownership_strength = ownership_strength;
            self.ownership.lock().update_strength(writer, ownership_strength);
        }
    }

    pub fn matched_writers(&self) -> Vec<GUID> {
        self.state.lock().writers.keys().copied().collect()
    }

    pub fn writer_proxy(&self, writer: &GUID) -> Option<WriterProxy> {
        self.state.lock().writers.get(writer).cloned()
    }

    /// Liveliness verdict from the liveliness manager. A writer that lost
    /// liveliness keeps its proxy, but buffered samples are dropped.
    pub fn set_writer_alive(&self, writer: &GUID, alive: bool) {
        let mut state = self.state.lock();
        if let Some(proxy) = state.writers.get_mut(writer) {
            proxy.alive = alive;
            if !alive {
                let released = self.ownership.lock().release_writer(writer);
                if released > 0 {
                    log::debug!("[READER] {} {} released {} instances", self.guid, writer, released);
                }
                let dropped = proxy.drop_buffered();
                if dropped > 0 {
                    log::debug!(
                        "[READER] {} dropped {} buffered samples of {}",
                        self.guid,
                        dropped,
                        writer
                    );
                }
            }
        }
    }

    pub fn is_writer_alive(&self, writer: &GUID) -> bool {
        self.state.lock().writers.get(writer).is_some_and(|p| p.alive)
    }

    // ========================================================================
    // Deadline
    // ========================================================================

    /// Report instances whose requested deadline elapsed by `now`, releasing
    /// their EXCLUSIVE owner. Returns the next time a check is due.
    pub fn check_deadlines(&self, now: Instant) -> Option<Instant> {
        let (missed, total, next) = {
            let mut tracker = self.deadline.lock();
            let missed = tracker.check(now);
            (missed, tracker.missed_total(), tracker.next_due())
        };
        let Some(last) = missed.last().copied() else {
            return next;
        };
        if self.qos.ownership.kind == OwnershipKind::Exclusive {
            let mut ownership = self.ownership.lock();
            for instance in &missed {
                ownership.release_instance(instance.as_ref());
            }
        }
        log::debug!(
            "[READER] {} requested deadline missed for {} instance(s)",
            self.guid,
            missed.len()
        );
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_deadline_missed(total, missed.len() as u64, last);
        }
        next
    }

    fn ensure_deadline_timer(&self) {
        let Some(due) = self.deadline.lock().next_due() else {
            return;
        };
        if let Some(timer) = self.deadline_timer.lock().as_ref() {
            if !timer.is_armed() {
                timer.restart(due.saturating_duration_since(Instant::now()));
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Create the ACKNACK response, periodic progress and deadline timers.
    pub fn attach_timers(self: &Arc<Self>, events: &EventThread) {
        let weak = Arc::downgrade(self);
        let response = events.create_idle(move || {
            let Some(engine) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            let now = Instant::now();
            match engine.process_acknacks(now) {
                Some(due) => TimerAction::RearmAfter(due.saturating_duration_since(now)),
                None => TimerAction::Stop,
            }
        });
        let weak = Arc::downgrade(self);
        let periodic = events.schedule_periodic(self.timing.acknack_period, move || {
            let Some(engine) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            engine.send_periodic_acknacks();
            TimerAction::Rearm
        });
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
        *self.response_timer.lock() = Some(response);
        *self.periodic_timer.lock() = Some(periodic);
        *self.deadline_timer.lock() = Some(deadline);
    }

    fn arm_response_timer(&self, due: Instant) {
        let earliest = self
            .state
            .lock()
            .writers
            .values()
            .filter_map(|p| p.nack.due())
            .min()
            .map_or(due, |d| d.min(due));
        if let Some(timer) = self.response_timer.lock().as_ref() {
            timer.restart(earliest.saturating_duration_since(Instant::now()));
        }
    }

    pub fn detach_timers(&self) {
        let response = self.response_timer.lock().take();
        let periodic = self.periodic_timer.lock().take();
        let deadline = self.deadline_timer.lock().take();
        for timer in [response, periodic, deadline].into_iter().flatten() {
            timer.cancel();
        }
    }
}

impl std::fmt::Debug for ReaderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderEngine")
            .field("guid", &self.guid)
            .field("history", &self.history)
            .finish()
    }
}

/// Rebuild a CacheChange from a DATA submessage.
fn change_from_data(writer: GUID, data: &Data, ts: Time) -> CacheChange {
    let qos = data.inline_qos.as_ref();
    let kind = qos
        .and_then(|q| q.status_info)
        .map_or(ChangeKind::Alive, ChangeKind::from_status_info);
    let instance = qos.and_then(|q| q.key_hash).map(InstanceHandle);
    let payload = data
        .serialized_payload
        .as_ref()
        .map_or_else(Payload::empty, |p| Payload::from_vec(p.clone()));
    CacheChange {
        kind,
        writer_guid: writer,
        sequence_number: data.writer_sn,
        instance,
        payload,
        source_timestamp: ts,
    }
}
