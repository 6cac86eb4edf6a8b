// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDS Listener Traits
//!
//! Listeners provide callback-based notification for DataWriter and
//! DataReader events. This is an alternative to the polling-based
//! StatusCondition/WaitSet pattern.
//!
//! # Usage
//!
//! ```ignore
//! struct Printer;
//!
//! impl DataReaderListener for Printer {
//!     fn on_subscription_matched(&self, status: SubscriptionMatchedStatus) {
//!         println!("matched with {} writers", status.current_count);
//!     }
//! }
//!
//! reader.set_listener(Some(Arc::new(Printer)));
//! ```
//!
//! # Thread Safety
//!
//! Callbacks run on a transport receive thread or the participant's event
//! thread. They must be `Send + Sync`, return quickly and must not call back
//! into the writer or reader that invoked them.

use std::collections::HashMap;

use crate::core::GUID;
use crate::history::InstanceHandle;

/// Status information for subscription matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    /// Total cumulative count of matched publications.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Current number of matched publications.
    pub current_count: u32,
    /// Change in current_count since last callback.
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched publication.
    pub last_publication_handle: Option<GUID>,
}

/// Status information for publication matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationMatchedStatus {
    /// Total cumulative count of matched subscriptions.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Current number of matched subscriptions.
    pub current_count: u32,
    /// Change in current_count since last callback.
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched subscription.
    pub last_subscription_handle: Option<GUID>,
}

/// Status information for liveliness changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivelinessChangedStatus {
    /// Number of matched publications currently asserting liveliness.
    pub alive_count: u32,
    /// Change in alive_count since last callback.
    pub alive_count_change: i32,
    /// Number of matched publications that have lost liveliness.
    pub not_alive_count: u32,
    /// Change in not_alive_count since last callback.
    pub not_alive_count_change: i32,
    /// GUID of the last publication to change liveliness.
    pub last_publication_handle: Option<GUID>,
}

/// Status information for a writer that failed to assert its liveliness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivelinessLostStatus {
    pub total_count: u32,
    pub total_count_change: i32,
}

/// Status information for sample lost events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleLostStatus {
    /// Total cumulative count of lost samples.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
}

/// Status information for incompatible QoS events (reader side).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedIncompatibleQosStatus {
    /// Total cumulative count of incompatible writers.
    pub total_count: u32,
    /// Change in total_count since last callback.
    pub total_count_change: i32,
    /// Name of the last incompatible policy (e.g. `"RELIABILITY"`).
    pub last_policy: Option<&'static str>,
}

/// Status information for incompatible QoS events (writer side).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferedIncompatibleQosStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub last_policy: Option<&'static str>,
}

/// Status information for a writer that left instances without a new
/// sample for longer than its DEADLINE period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferedDeadlineMissedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    /// Last instance that missed its deadline (`None` for unkeyed topics).
    pub last_instance_handle: Option<InstanceHandle>,
}

/// Status information for a reader that received no sample of an instance
/// within its DEADLINE period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedDeadlineMissedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub last_instance_handle: Option<InstanceHandle>,
}

/// Listener for DataWriter events. Every method defaults to a no-op.
pub trait DataWriterListener: Send + Sync {
    fn on_publication_matched(&self, status: PublicationMatchedStatus) {
        let _ = status;
    }

    fn on_offered_incompatible_qos(&self, status: OfferedIncompatibleQosStatus) {
        let _ = status;
    }

    /// A MANUAL_* writer did not assert liveliness within its lease.
    fn on_liveliness_lost(&self, status: LivelinessLostStatus) {
        let _ = status;
    }

    fn on_offered_deadline_missed(&self, status: OfferedDeadlineMissedStatus) {
        let _ = status;
    }
}

/// Listener for DataReader events. Every method defaults to a no-op.
pub trait DataReaderListener: Send + Sync {
    /// New samples can be read or taken.
    ///
    /// Runs on a transport receive thread; take on another thread (or via
    /// a WaitSet) when processing is slow.
    fn on_data_available(&self) {}

    fn on_subscription_matched(&self, status: SubscriptionMatchedStatus) {
        let _ = status;
    }

    fn on_requested_incompatible_qos(&self, status: RequestedIncompatibleQosStatus) {
        let _ = status;
    }

    fn on_liveliness_changed(&self, status: LivelinessChangedStatus) {
        let _ = status;
    }

    fn on_sample_lost(&self, status: SampleLostStatus) {
        let _ = status;
    }

    fn on_requested_deadline_missed(&self, status: RequestedDeadlineMissedStatus) {
        let _ = status;
    }
}

// ============================================================================
// Status bookkeeping
// ============================================================================

/// Matched-count bookkeeping shared by both matched statuses.
#[derive(Debug, Default)]
pub(crate) struct MatchCounter {
    total: u32,
    current: u32,
    total_change: i32,
    current_change: i32,
    last: Option<GUID>,
}

impl MatchCounter {
    pub(crate) fn matched(&mut self, remote: GUID) {
        self.total += 1;
        self.current += 1;
        self.total_change += 1;
        self.current_change += 1;
        self.last = Some(remote);
    }

    pub(crate) fn unmatched(&mut self, remote: GUID) {
        self.current = self.current.saturating_sub(1);
        self.current_change -= 1;
        self.last = Some(remote);
    }

    /// Snapshot and reset the change counters.
    pub(crate) fn publication_status(&mut self) -> PublicationMatchedStatus {
        let status = PublicationMatchedStatus {
            total_count: self.total,
            total_count_change: self.total_change,
            current_count: self.current,
            current_count_change: self.current_change,
            last_subscription_handle: self.last,
        };
        self.reset();
        status
    }

    pub(crate) fn subscription_status(&mut self) -> SubscriptionMatchedStatus {
        let status = SubscriptionMatchedStatus {
            total_count: self.total,
            total_count_change: self.total_change,
            current_count: self.current,
            current_count_change: self.current_change,
            last_publication_handle: self.last,
        };
        self.reset();
        status
    }

    fn reset(&mut self) {
        self.total_change = 0;
        self.current_change = 0;
    }
}

/// Cumulative counter with a change since the last read.
#[derive(Debug, Default)]
pub(crate) struct Counter {
    total: u32,
    change: i32,
    last_policy: Option<&'static str>,
}

impl Counter {
    pub(crate) fn add(&mut self, n: u32) {
        self.total = self.total.saturating_add(n);
        self.change = self.change.saturating_add(i32::try_from(n).unwrap_or(i32::MAX));
    }

    pub(crate) fn add_policy(&mut self, policy: &'static str) {
        self.add(1);
        self.last_policy = Some(policy);
    }

    /// Snapshot `(total, change, last_policy)` and reset the change.
    pub(crate) fn take(&mut self) -> (u32, i32, Option<&'static str>) {
        let out = (self.total, self.change, self.last_policy);
        self.change = 0;
        out
    }
}

/// Deadline misses with the last instance involved.
#[derive(Debug, Default)]
pub(crate) struct DeadlineCounter {
    missed: Counter,
    last: Option<InstanceHandle>,
}

impl DeadlineCounter {
    pub(crate) fn add(&mut self, n: u64, last: Option<InstanceHandle>) {
        self.missed.add(u32::try_from(n).unwrap_or(u32::MAX));
        self.last = last;
    }

    pub(crate) fn offered_status(&mut self) -> OfferedDeadlineMissedStatus {
        let (total_count, total_count_change, _) = self.missed.take();
        OfferedDeadlineMissedStatus {
            total_count,
            total_count_change,
            last_instance_handle: self.last,
        }
    }

    pub(crate) fn requested_status(&mut self) -> RequestedDeadlineMissedStatus {
        let (total_count, total_count_change, _) = self.missed.take();
        RequestedDeadlineMissedStatus {
            total_count,
            total_count_change,
            last_instance_handle: self.last,
        }
    }
}

/// Alive / not-alive bookkeeping over the writers matched to one reader.
#[derive(Debug, Default)]
pub(crate) struct LivelinessCounter {
    writers: HashMap<GUID, bool>,
    alive_change: i32,
    not_alive_change: i32,
    last: Option<GUID>,
}

impl LivelinessCounter {
    /// Record `writer` as alive or not. False if nothing changed.
    pub(crate) fn set(&mut self, writer: GUID, alive: bool) -> bool {
        let previous = self.writers.insert(writer, alive);
        if previous == Some(alive) {
            return false;
        }
        match previous {
            Some(true) => self.alive_change -= 1,
            Some(false) => self.not_alive_change -= 1,
            None => {}
        }
        if alive {
            self.alive_change += 1;
        } else {
            self.not_alive_change += 1;
        }
        self.last = Some(writer);
        true
    }

    /// Forget an unmatched writer. False if it was not counted.
    pub(crate) fn remove(&mut self, writer: &GUID) -> bool {
        match self.writers.remove(writer) {
            Some(true) => self.alive_change -= 1,
            Some(false) => self.not_alive_change -= 1,
            None => return false,
        }
        self.last = Some(*writer);
        true
    }

    pub(crate) fn status(&mut self) -> LivelinessChangedStatus {
        let alive = self.writers.values().filter(|a| **a).count();
        let status = LivelinessChangedStatus {
            alive_count: u32::try_from(alive).unwrap_or(u32::MAX),
            alive_count_change: self.alive_change,
            not_alive_count: u32::try_from(self.writers.len() - alive).unwrap_or(u32::MAX),
            not_alive_count_change: self.not_alive_change,
            last_publication_handle: self.last,
        };
        self.alive_change = 0;
        self.not_alive_change = 0;
        status
    }
}
