// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics for Reliable QoS
//!
//! Writer-side and reader-side protocol counters. One instance per engine;
//! integration tests read them to assert wire behavior (for example "no
//! ACKNACK ever sent by a best-effort reader").

use std::sync::atomic::{AtomicU64, Ordering};

/// Reliable QoS metrics collector
///
/// # Thread Safety
///
/// All methods use atomic operations (Relaxed ordering) for lock-free updates.
#[derive(Debug, Default)]
pub struct ReliableMetrics {
    // Writer side
    data_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
    acknacks_received: AtomicU64,
    retransmissions: AtomicU64,
    gaps_sent: AtomicU64,
    fragments_sent: AtomicU64,
    nack_frags_received: AtomicU64,

    // Reader side
    acknacks_sent: AtomicU64,
    heartbeats_received: AtomicU64,
    gaps_received: AtomicU64,
    samples_lost: AtomicU64,
    duplicates_dropped: AtomicU64,
    max_gap_size: AtomicU64,
    nack_frags_sent: AtomicU64,
    samples_reassembled: AtomicU64,
}

/// Point-in-time copy of [`ReliableMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub data_sent: u64,
    pub heartbeats_sent: u64,
    pub acknacks_received: u64,
    pub retransmissions: u64,
    pub gaps_sent: u64,
    pub fragments_sent: u64,
    pub nack_frags_received: u64,
    pub acknacks_sent: u64,
    pub heartbeats_received: u64,
    pub gaps_received: u64,
    pub samples_lost: u64,
    pub duplicates_dropped: u64,
    pub max_gap_size: u64,
    pub nack_frags_sent: u64,
    pub samples_reassembled: u64,
}

impl ReliableMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_data_sent(&self, count: u64) {
        self.data_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_heartbeats_sent(&self, count: u64) {
        self.heartbeats_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_acknacks_received(&self, count: u64) {
        self.acknacks_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retransmissions(&self, count: u64) {
        self.retransmissions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_gaps_sent(&self, count: u64) {
        self.gaps_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_fragments_sent(&self, count: u64) {
        self.fragments_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_nack_frags_received(&self, count: u64) {
        self.nack_frags_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_acknacks_sent(&self, count: u64) {
        self.acknacks_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_heartbeats_received(&self, count: u64) {
        self.heartbeats_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_gaps_received(&self, count: u64) {
        self.gaps_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_duplicates_dropped(&self, count: u64) {
        self.duplicates_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_nack_frags_sent(&self, count: u64) {
        self.nack_frags_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_samples_reassembled(&self, count: u64) {
        self.samples_reassembled.fetch_add(count, Ordering::Relaxed);
    }

    /// Record `count` irrecoverable sequences in one event.
    pub fn record_lost(&self, count: u64) {
        self.samples_lost.fetch_add(count, Ordering::Relaxed);
        self.update_max_gap_size(count);
    }

    /// Compare-exchange loop; only ever raises the high-water mark.
    fn update_max_gap_size(&self, new_size: u64) {
        let mut current = self.max_gap_size.load(Ordering::Relaxed);
        while new_size > current {
            match self.max_gap_size.compare_exchange_weak(
                current,
                new_size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn acknacks_sent(&self) -> u64 {
        self.acknacks_sent.load(Ordering::Relaxed)
    }

    pub fn samples_lost(&self) -> u64 {
        self.samples_lost.load(Ordering::Relaxed)
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions.load(Ordering::Relaxed)
    }

    /// Snapshot current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            data_sent: self.data_sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            acknacks_received: self.acknacks_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            gaps_sent: self.gaps_sent.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            nack_frags_received: self.nack_frags_received.load(Ordering::Relaxed),
            acknacks_sent: self.acknacks_sent.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            gaps_received: self.gaps_received.load(Ordering::Relaxed),
            samples_lost: self.samples_lost.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            max_gap_size: self.max_gap_size.load(Ordering::Relaxed),
            nack_frags_sent: self.nack_frags_sent.load(Ordering::Relaxed),
            samples_reassembled: self.samples_reassembled.load(Ordering::Relaxed),
        }
    }
}
