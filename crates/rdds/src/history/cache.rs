// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HistoryCache: ordered CacheChanges owned by one local endpoint.
//!
//! Shared by the writer engine (retransmission buffer) and the reader engine
//! (delivery queue). Enforces HISTORY + RESOURCE_LIMITS:
//!
//! - KEEP_LAST(depth): evict the oldest change of the same instance, then the
//!   globally oldest change when `max_samples` is reached.
//! - KEEP_ALL: reject with `ResourceLimitExceeded`; the owning engine decides
//!   whether to block, reclaim or apply flow control.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use parking_lot::ReentrantMutex;

use super::change::{CacheChange, InstanceHandle};
use crate::core::{Time, GUID};
use crate::dds::{Error, Result};
use crate::qos::{DestinationOrder, History, QoS, ResourceLimits, LENGTH_UNLIMITED};

/// Policies a History enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryAttributes {
    pub history: History,
    pub limits: ResourceLimits,
    pub order: DestinationOrder,
}

impl HistoryAttributes {
    pub fn from_qos(qos: &QoS) -> Self {
        Self {
            history: qos.history,
            limits: qos.resource_limits,
            order: qos.destination_order,
        }
    }

    /// Effective per-instance bound.
    fn per_instance(&self) -> usize {
        match self.history {
            History::KeepLast(depth) => {
                (depth as usize).min(self.limits.max_samples_per_instance)
            }
            History::KeepAll => self.limits.max_samples_per_instance,
        }
    }
}

#[derive(Debug)]
struct Entry {
    change: CacheChange,
    read: bool,
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<Entry>,
    /// Newest accepted source timestamp per instance (BY_SOURCE_TIMESTAMP).
    newest_accepted: HashMap<Option<InstanceHandle>, Time>,
}

impl Inner {
    fn instance_samples(&self, instance: Option<&InstanceHandle>) -> usize {
        self.entries
            .iter()
            .filter(|e| e.change.instance.as_ref() == instance)
            .count()
    }

    fn instance_count(&self) -> usize {
        let mut seen: Vec<Option<InstanceHandle>> = Vec::new();
        for e in &self.entries {
            if !seen.contains(&e.change.instance) {
                seen.push(e.change.instance);
            }
        }
        seen.len()
    }

    fn has_instance(&self, instance: Option<&InstanceHandle>) -> bool {
        self.entries
            .iter()
            .any(|e| e.change.instance.as_ref() == instance)
    }

    fn remove_at(&mut self, idx: usize) -> Option<CacheChange> {
        self.entries.remove(idx).map(|e| e.change)
    }

    fn oldest_of_instance(&self, instance: Option<&InstanceHandle>) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.change.instance.as_ref() == instance)
    }
}

/// History cache (recursive lock, usable from application and network threads).
pub struct HistoryCache {
    attrs: HistoryAttributes,
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl HistoryCache {
    pub fn new(attrs: HistoryAttributes) -> Self {
        Self {
            attrs,
            inner: ReentrantMutex::new(RefCell::new(Inner {
                entries: VecDeque::new(),
                newest_accepted: HashMap::new(),
            })),
        }
    }

    #[must_use]
    pub fn attributes(&self) -> HistoryAttributes {
        self.attrs
    }

    /// Append a change.
    ///
    /// Returns the change evicted to make room (KEEP_LAST), if any. Dropping
    /// it releases its payload back to the pool once in-flight clones finish.
    ///
    /// # Errors
    /// - `ResourceLimitExceeded` under KEEP_ALL when any limit is reached, or
    ///   when a new instance would exceed `max_instances`.
    /// - `PreconditionNotMet` for a duplicate `(writer_guid, sequence_number)`.
    pub fn add_change(&self, change: CacheChange) -> Result<Option<CacheChange>> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        if inner.entries.iter().any(|e| {
            e.change.writer_guid == change.writer_guid
                && e.change.sequence_number == change.sequence_number
        }) {
            return Err(Error::PreconditionNotMet(format!(
                "duplicate change {}#{}",
                change.writer_guid, change.sequence_number
            )));
        }

        let instance = change.instance;
        let new_instance = !inner.has_instance(instance.as_ref());
        let limits = self.attrs.limits;
        if new_instance
            && limits.max_instances != LENGTH_UNLIMITED
            && inner.instance_count() >= limits.max_instances
        {
            return Err(Error::ResourceLimitExceeded(format!(
                "max_instances={}",
                limits.max_instances
            )));
        }

        let per_instance = self.attrs.per_instance();
        let mut evicted = None;
        match self.attrs.history {
            History::KeepLast(_) => {
                if inner.instance_samples(instance.as_ref()) >= per_instance {
                    if let Some(idx) = inner.oldest_of_instance(instance.as_ref()) {
                        evicted = inner.remove_at(idx);
                    }
                } else if inner.entries.len() >= limits.max_samples {
                    evicted = inner.entries.pop_front().map(|e| e.change);
                }
            }
            History::KeepAll => {
                if inner.entries.len() >= limits.max_samples {
                    return Err(Error::ResourceLimitExceeded(format!(
                        "max_samples={}",
                        limits.max_samples
                    )));
                }
                if inner.instance_samples(instance.as_ref()) >= per_instance {
                    return Err(Error::ResourceLimitExceeded(format!(
                        "max_samples_per_instance={}",
                        per_instance
                    )));
                }
            }
        }

        if let Some(ev) = &evicted {
            log::debug!(
                "[HISTORY] evicted {}#{} to admit #{}",
                ev.writer_guid,
                ev.sequence_number,
                change.sequence_number
            );
        }

        let entry = Entry {
            change,
            read: false,
        };
        match self.attrs.order {
            DestinationOrder::ByReceptionTimestamp => inner.entries.push_back(entry),
            DestinationOrder::BySourceTimestamp => {
                let ts = entry.change.source_timestamp;
                let newest = inner.newest_accepted.entry(instance).or_insert(ts);
                if ts > *newest {
                    *newest = ts;
                }
                // Stable insert: after every entry not newer than `ts`.
                let pos = inner
                    .entries
                    .iter()
                    .rposition(|e| e.change.source_timestamp <= ts)
                    .map_or(0, |p| p + 1);
                inner.entries.insert(pos, entry);
            }
        }
        Ok(evicted)
    }

    /// True when a change with this source timestamp would violate
    /// BY_SOURCE_TIMESTAMP ordering for its instance (always false for
    /// BY_RECEPTION_TIMESTAMP).
    pub fn is_outdated(&self, instance: Option<&InstanceHandle>, ts: Time) -> bool {
        if self.attrs.order != DestinationOrder::BySourceTimestamp {
            return false;
        }
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner
            .newest_accepted
            .get(&instance.copied())
            .is_some_and(|newest| ts < *newest)
    }

    /// Whether `add_change` for this instance would succeed without eviction
    /// or error (used for reader flow control).
    pub fn has_room_for(&self, instance: Option<&InstanceHandle>) -> bool {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let limits = self.attrs.limits;
        if !inner.has_instance(instance)
            && limits.max_instances != LENGTH_UNLIMITED
            && inner.instance_count() >= limits.max_instances
        {
            return false;
        }
        match self.attrs.history {
            History::KeepLast(_) => true,
            History::KeepAll => {
                inner.entries.len() < limits.max_samples
                    && inner.instance_samples(instance) < self.attrs.per_instance()
            }
        }
    }

    /// Remove one change; false if absent (idempotent).
    pub fn remove_change(&self, writer_guid: &GUID, seq: i64) -> bool {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.change.writer_guid == *writer_guid && e.change.sequence_number == seq);
        idx.and_then(|idx| inner.remove_at(idx)).is_some()
    }

    /// Remove every change with `sequence_number <= seq`; returns the count.
    pub fn remove_up_to(&self, seq: i64) -> usize {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.change.sequence_number > seq);
        before - inner.entries.len()
    }

    /// Remove every change `pred` accepts (LIFESPAN expiry); returns the count.
    pub fn remove_where(&self, pred: impl Fn(&CacheChange) -> bool) -> usize {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|e| !pred(&e.change));
        before - inner.entries.len()
    }

    /// Remove the oldest change if `pred` accepts it.
    pub fn remove_oldest_if(&self, pred: impl Fn(&CacheChange) -> bool) -> Option<CacheChange> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if inner.entries.front().is_some_and(|e| pred(&e.change)) {
            inner.entries.pop_front().map(|e| e.change)
        } else {
            None
        }
    }

    /// Remove the oldest change of `instance` if `pred` accepts it.
    pub fn remove_oldest_of_instance_if(
        &self,
        instance: Option<&InstanceHandle>,
        pred: impl Fn(&CacheChange) -> bool,
    ) -> Option<CacheChange> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let idx = inner.oldest_of_instance(instance)?;
        if pred(&inner.entries[idx].change) {
            inner.remove_at(idx)
        } else {
            None
        }
    }

    /// KEEP_ALL at `max_samples` (as opposed to a per-instance limit).
    pub fn at_max_samples(&self) -> bool {
        self.len() >= self.attrs.limits.max_samples
    }

    pub fn get_change(&self, writer_guid: &GUID, seq: i64) -> Option<CacheChange> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner
            .entries
            .iter()
            .find(|e| e.change.writer_guid == *writer_guid && e.change.sequence_number == seq)
            .map(|e| e.change.clone())
    }

    pub fn contains(&self, writer_guid: &GUID, seq: i64) -> bool {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner
            .entries
            .iter()
            .any(|e| e.change.writer_guid == *writer_guid && e.change.sequence_number == seq)
    }

    pub fn get_min_seq(&self) -> Option<i64> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.entries.iter().map(|e| e.change.sequence_number).min()
    }

    pub fn get_max_seq(&self) -> Option<i64> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.entries.iter().map(|e| e.change.sequence_number).max()
    }

    /// Snapshot of changes with `sequence_number >= seq`, ascending.
    pub fn iter_from(&self, seq: i64) -> Vec<CacheChange> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let mut out: Vec<CacheChange> = inner
            .entries
            .iter()
            .filter(|e| e.change.sequence_number >= seq)
            .map(|e| e.change.clone())
            .collect();
        out.sort_by_key(|c| c.sequence_number);
        out
    }

    /// Remove and return the oldest change.
    pub fn take_next(&self) -> Option<(CacheChange, bool)> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.entries.pop_front().map(|e| (e.change, e.read))
    }

    /// Copy every change out and mark it read. The flag is the previous
    /// read state.
    pub fn read_all(&self) -> Vec<(CacheChange, bool)> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner
            .entries
            .iter_mut()
            .map(|e| {
                let was_read = e.read;
                e.read = true;
                (e.change.clone(), was_read)
            })
            .collect()
    }

    /// Remove and return every change with its read flag.
    pub fn take_all(&self) -> Vec<(CacheChange, bool)> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.entries.drain(..).map(|e| (e.change, e.read)).collect()
    }

    pub fn clear(&self) -> usize {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let n = inner.entries.len();
        inner.entries.clear();
        n
    }

    pub fn instance_count(&self) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.instance_count()
    }

    pub fn samples_for_instance(&self, instance: Option<&InstanceHandle>) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.instance_samples(instance)
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// KEEP_ALL history at `max_samples`.
    pub fn is_full(&self) -> bool {
        matches!(self.attrs.history, History::KeepAll) && self.at_max_samples()
    }
}

impl std::fmt::Debug for HistoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCache")
            .field("attrs", &self.attrs)
            .field("len", &self.len())
            .finish()
    }
}
