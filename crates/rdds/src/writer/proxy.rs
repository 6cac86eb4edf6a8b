// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ReaderProxy: writer-side state for one matched remote reader.

use std::collections::BTreeSet;

use crate::core::{Locator, GUID};
use crate::qos::Durability;
use crate::reliability::CountFilter;

/// What discovery knows about a remote (or local) reader when it is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReaderInfo {
    pub guid: GUID,
    pub reliable: bool,
    pub durability: Durability,
    pub locators: Vec<Locator>,
}

/// Per-reader delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct ReaderProxy {
    pub remote_guid: GUID,
    pub reliable: bool,
    pub durability: Durability,
    pub locators: Vec<Locator>,
    /// Highest sequence acknowledged (`ACKNACK.base - 1`).
    pub acked_up_to: i64,
    /// Highest sequence pushed to this reader.
    pub highest_sent: i64,
    /// Sequences NACKed and not yet resent.
    pub requested: BTreeSet<i64>,
    /// Sequences written since the last flush.
    pub unsent: BTreeSet<i64>,
    /// Sequences at or below this never concern the reader (late VOLATILE
    /// reader on a TRANSIENT_LOCAL writer).
    pub irrelevant_up_to: i64,
    pub(crate) heartbeat_count: u32,
    pub(crate) acknack_filter: CountFilter,
    pub(crate) nack_frag_filter: CountFilter,
}

impl ReaderProxy {
    pub fn new(info: RemoteReaderInfo) -> Self {
        Self {
            remote_guid: info.guid,
            reliable: info.reliable,
            durability: info.durability,
            locators: info.locators,
            acked_up_to: 0,
            highest_sent: 0,
            requested: BTreeSet::new(),
            unsent: BTreeSet::new(),
            irrelevant_up_to: 0,
            heartbeat_count: 0,
            acknack_filter: CountFilter::new(),
            nack_frag_filter: CountFilter::new(),
        }
    }

    /// Watermark this reader contributes to ack-gated removal. Best-effort
    /// readers never acknowledge, so whatever was sent counts.
    pub fn ack_watermark(&self) -> i64 {
        if self.reliable {
            self.acked_up_to
        } else {
            self.highest_sent
        }
    }

    /// Reliable reader still missing acknowledgment for something up to `last`.
    pub fn has_unacked(&self, last: i64) -> bool {
        self.reliable && self.acked_up_to < last
    }

    pub(crate) fn next_heartbeat_count(&mut self) -> u32 {
        self.heartbeat_count = self.heartbeat_count.wrapping_add(1);
        self.heartbeat_count
    }

    pub fn is_relevant(&self, seq: i64) -> bool {
        seq > self.irrelevant_up_to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix};

    fn info(reliable: bool) -> RemoteReaderInfo {
        RemoteReaderInfo {
            guid: GUID::new(GuidPrefix([3; 12]), EntityId::user_reader(1, false)),
            reliable,
            durability: Durability::Volatile,
            locators: Vec::new(),
        }
    }

    #[test]
    fn test_watermark_by_reliability() {
        let mut reliable = ReaderProxy::new(info(true));
        reliable.highest_sent = 10;
        reliable.acked_up_to = 4;
        assert_eq!(reliable.ack_watermark(), 4);
        assert!(reliable.has_unacked(10));

        let mut be = ReaderProxy::new(info(false));
        be.highest_sent = 10;
        assert_eq!(be.ack_watermark(), 10);
        assert!(!be.has_unacked(10));
    }

    #[test]
    fn test_heartbeat_counts_increase() {
        let mut p = ReaderProxy::new(info(true));
        assert_eq!(p.next_heartbeat_count(), 1);
        assert_eq!(p.next_heartbeat_count(), 2);
    }

    #[test]
    fn test_relevance() {
        let mut p = ReaderProxy::new(info(true));
        p.irrelevant_up_to = 3;
        assert!(!p.is_relevant(3));
        assert!(p.is_relevant(4));
    }
}
