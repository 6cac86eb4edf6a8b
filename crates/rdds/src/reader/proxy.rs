// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WriterProxy: reader-side state for one matched remote writer.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::core::{Locator, GUID};
use crate::history::CacheChange;
use crate::protocol::seqset::MAX_SET_BITS;
use crate::protocol::SequenceNumberSet;
use crate::qos::Lifespan;
use crate::reliability::{CountFilter, NackScheduler};

use super::fragments::FragmentBuffer;

/// What discovery knows about a remote (or local) writer when it is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWriterInfo {
    pub guid: GUID,
    pub reliable: bool,
    pub locators: Vec<Locator>,
    /// OWNERSHIP_STRENGTH offered by the writer.
    pub ownership_strength: i32,
    pub lifespan: Lifespan,
}

impl RemoteWriterInfo {
    /// Strength 0, infinite lifespan.
    pub fn new(guid: GUID, reliable: bool, locators: Vec<Locator>) -> Self {
        Self {
            guid,
            reliable,
            locators,
            ownership_strength: 0,
            lifespan: Lifespan::default(),
        }
    }
}

/// Per-writer reception bookkeeping.
///
/// Sequence numbers up to `delivered_up_to` are settled (delivered to the
/// History or known lost). Above it, each number is buffered, irrecoverable,
/// or still missing.
#[derive(Debug, Clone)]
pub struct WriterProxy {
    pub remote_guid: GUID,
    pub reliable: bool,
    pub locators: Vec<Locator>,
    pub ownership_strength: i32,
    pub lifespan: Lifespan,
    pub delivered_up_to: i64,
    /// Received out of order, or held back by reader flow control.
    pub buffered: BTreeMap<i64, CacheChange>,
    /// Individually declared lost/irrelevant (GAP list members).
    pub irrecoverable: BTreeSet<i64>,
    /// Everything below this that is not buffered is irrecoverable.
    pub irrecoverable_below: i64,
    /// Highest sequence number the writer is known to have produced.
    pub announced_last: i64,
    pub alive: bool,
    /// Set once the writer's position is known; losses before that are not
    /// reported.
    pub synced: bool,
    /// Partially received DATA_FRAG samples.
    pub fragments: FragmentBuffer,
    pub(crate) hb_filter: CountFilter,
    pub(crate) acknack_count: u32,
    pub(crate) last_ack_base: i64,
    pub(crate) nack_frag_count: u32,
    pub(crate) nack: NackScheduler,
}

impl WriterProxy {
    pub fn new(info: RemoteWriterInfo, backoff_base: Duration, max_retries: u32) -> Self {
        Self {
            remote_guid: info.guid,
            reliable: info.reliable,
            locators: info.locators,
            ownership_strength: info.ownership_strength,
            lifespan: info.lifespan,
            delivered_up_to: 0,
            buffered: BTreeMap::new(),
            irrecoverable: BTreeSet::new(),
            irrecoverable_below: 0,
            announced_last: 0,
            alive: true,
            synced: false,
            fragments: FragmentBuffer::default(),
            hb_filter: CountFilter::new(),
            acknack_count: 0,
            last_ack_base: 0,
            nack_frag_count: 0,
            nack: NackScheduler::new(backoff_base, max_retries),
        }
    }

    /// Lowest sequence number that may still arrive.
    pub fn lower_bound(&self) -> i64 {
        (self.delivered_up_to + 1).max(self.irrecoverable_below)
    }

    /// Already delivered, buffered, or written off.
    pub fn is_duplicate(&self, seq: i64) -> bool {
        seq < self.lower_bound() || self.buffered.contains_key(&seq) || self.irrecoverable.contains(&seq)
    }

    /// Missing sequence numbers inside the ACKNACK window. Partially
    /// received samples are repaired with NACK_FRAG instead.
    pub fn missing(&self) -> Vec<i64> {
        let window_end = self.delivered_up_to + i64::from(MAX_SET_BITS);
        let last = self.announced_last.min(window_end);
        (self.lower_bound()..=last)
            .filter(|s| {
                !self.buffered.contains_key(s) && !self.irrecoverable.contains(s) && !self.fragments.has(*s)
            })
            .collect()
    }

    /// Something still needs repair (whole samples or fragments).
    pub fn needs_repair(&self) -> bool {
        !self.fragments.is_empty() || !self.missing().is_empty()
    }

    /// `(base, set)` for the next ACKNACK.
    pub fn ack_state(&self) -> SequenceNumberSet {
        SequenceNumberSet::from_sequences(self.delivered_up_to + 1, self.missing())
    }

    /// Write off everything below `first` that has not been received.
    /// Returns how many sequence numbers became newly irrecoverable.
    pub fn mark_lost_below(&mut self, first: i64) -> u64 {
        let lower = self.lower_bound();
        if first <= lower {
            return 0;
        }
        let buffered = self.buffered.range(lower..first).count() as u64;
        let already = self.irrecoverable.range(lower..first).count() as u64;
        self.irrecoverable = self.irrecoverable.split_off(&first);
        self.irrecoverable_below = first;
        self.announced_last = self.announced_last.max(first - 1);
        (first - lower) as u64 - buffered - already
    }

    /// Write off one sequence number; false if it was not outstanding.
    pub fn mark_irrecoverable(&mut self, seq: i64) -> bool {
        if self.is_duplicate(seq) {
            return false;
        }
        self.announced_last = self.announced_last.max(seq);
        self.irrecoverable.insert(seq)
    }

    pub(crate) fn next_acknack_count(&mut self) -> u32 {
        self.acknack_count = self.acknack_count.wrapping_add(1);
        self.acknack_count
    }

    pub(crate) fn next_nack_frag_count(&mut self) -> u32 {
        self.nack_frag_count = self.nack_frag_count.wrapping_add(1);
        self.nack_frag_count
    }

    /// Drop buffered samples and partial fragments (liveliness lost); they
    /// will be requested again.
    pub fn drop_buffered(&mut self) -> usize {
        let n = self.buffered.len() + self.fragments.len();
        self.buffered.clear();
        self.fragments.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix, Payload};

    fn proxy() -> WriterProxy {
        WriterProxy::new(
            RemoteWriterInfo::new(
                GUID::new(GuidPrefix([4; 12]), EntityId::user_writer(1, false)),
                true,
                Vec::new(),
            ),
            Duration::from_millis(10),
            3,
        )
    }

    fn change(p: &WriterProxy, seq: i64) -> CacheChange {
        CacheChange::alive(p.remote_guid, seq, Payload::from_vec(vec![0; 4]))
    }

    #[test]
    fn test_missing_skips_buffered_and_irrecoverable() {
        let mut p = proxy();
        p.announced_last = 6;
        p.buffered.insert(2, change(&p, 2));
        assert!(p.mark_irrecoverable(4));
        assert_eq!(p.missing(), vec![1, 3, 5, 6]);
        let set = p.ack_state();
        assert_eq!(set.base(), 1);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3, 5, 6]);
    }

    #[test]
    fn test_mark_lost_below_counts_only_new_losses() {
        let mut p = proxy();
        p.buffered.insert(3, change(&p, 3));
        p.mark_irrecoverable(2);
        // 1..=4: 3 buffered, 2 already written off.
        assert_eq!(p.mark_lost_below(5), 2);
        assert_eq!(p.irrecoverable_below, 5);
        assert!(p.is_duplicate(4));
        assert!(!p.is_duplicate(5));
        assert_eq!(p.mark_lost_below(5), 0);
    }

    #[test]
    fn test_duplicates() {
        let mut p = proxy();
        p.delivered_up_to = 3;
        assert!(p.is_duplicate(3));
        assert!(!p.is_duplicate(4));
        p.buffered.insert(5, change(&p, 5));
        assert!(p.is_duplicate(5));
        assert!(!p.mark_irrecoverable(5));
    }

    #[test]
    fn test_partial_sample_is_not_missing() {
        use crate::protocol::DataFrag;
        use std::time::Instant;

        let mut p = proxy();
        p.announced_last = 3;
        p.fragments.insert(
            &DataFrag {
                reader_id: EntityId::UNKNOWN,
                writer_id: p.remote_guid.entity_id,
                writer_sn: 2,
                fragment_starting_num: 1,
                fragments_in_submessage: 1,
                fragment_size: 4,
                sample_size: 8,
                inline_qos: None,
                fragments: vec![0; 4],
            },
            None,
            Instant::now(),
        );
        assert_eq!(p.missing(), vec![1, 3]);
        assert!(p.needs_repair());
        assert_eq!(p.drop_buffered(), 1);
    }

    #[test]
    fn test_ack_window_is_bounded() {
        let mut p = proxy();
        p.announced_last = 10_000;
        assert_eq!(p.missing().len(), MAX_SET_BITS as usize);
    }
}
