// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DATA_FRAG reassembly for one matched writer.
//!
//! Partial samples are keyed by sequence number. A sample is complete once
//! every fragment `1..=total` arrived; it is then handed back as a plain
//! DATA. At most `max_pending` partial samples are kept; the least recently
//! updated one is evicted first.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::core::Time;
use crate::protocol::seqset::MAX_SET_BITS;
use crate::protocol::{Data, DataFrag, FragmentNumberSet, InlineQos};

/// Largest sample accepted for reassembly.
pub const MAX_SAMPLE_SIZE: usize = 64 * 1024 * 1024;

/// Default bound on partial samples per writer.
pub const DEFAULT_MAX_PENDING: usize = 16;

#[derive(Debug, Clone)]
struct Partial {
    sample_size: u32,
    fragment_size: u16,
    received: Vec<bool>,
    remaining: usize,
    bytes: Vec<u8>,
    inline_qos: Option<InlineQos>,
    source_ts: Option<Time>,
    touched: Instant,
}

impl Partial {
    fn new(frag: &DataFrag, now: Instant) -> Self {
        let total = frag.total_fragments() as usize;
        Self {
            sample_size: frag.sample_size,
            fragment_size: frag.fragment_size,
            received: vec![false; total],
            remaining: total,
            bytes: vec![0; frag.sample_size as usize],
            inline_qos: None,
            source_ts: None,
            touched: now,
        }
    }

    fn fits(&self, frag: &DataFrag) -> bool {
        self.sample_size == frag.sample_size && self.fragment_size == frag.fragment_size
    }

    fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, got)| !**got)
            .map(|(i, _)| i as u32 + 1)
    }
}

/// Partial samples of one writer.
#[derive(Debug, Clone)]
pub struct FragmentBuffer {
    pending: BTreeMap<i64, Partial>,
    max_pending: usize,
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl FragmentBuffer {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Store the fragments of `frag`. Returns the rebuilt sample (and the
    /// INFO_TS that came with its fragments) once the last fragment arrived.
    pub fn insert(&mut self, frag: &DataFrag, source_ts: Option<Time>, now: Instant) -> Option<(Data, Option<Time>)> {
        if frag.sample_size as usize > MAX_SAMPLE_SIZE {
            log::debug!(
                "[FRAG] #{} of {} bytes exceeds {}",
                frag.writer_sn,
                frag.sample_size,
                MAX_SAMPLE_SIZE
            );
            return None;
        }
        let seq = frag.writer_sn;
        if self.pending.get(&seq).is_some_and(|p| !p.fits(frag)) {
            log::debug!("[FRAG] #{} changed fragment layout, restarting", seq);
            self.pending.remove(&seq);
        }
        if !self.pending.contains_key(&seq) && self.pending.len() >= self.max_pending {
            self.evict_lru();
        }
        let partial = self.pending.entry(seq).or_insert_with(|| Partial::new(frag, now));
        partial.touched = now;
        if frag.inline_qos.is_some() {
            partial.inline_qos = frag.inline_qos.clone();
        }
        if source_ts.is_some() {
            partial.source_ts = source_ts;
        }

        let fragment_size = frag.fragment_size as usize;
        let offset = frag.offset();
        let end = (offset + frag.fragments.len()).min(partial.bytes.len());
        if offset >= end {
            return None;
        }
        partial.bytes[offset..end].copy_from_slice(&frag.fragments[..end - offset]);
        let first = frag.fragment_starting_num as usize - 1;
        for index in first..first + frag.fragments_in_submessage as usize {
            let frag_end = ((index + 1) * fragment_size).min(partial.bytes.len());
            if index >= partial.received.len() || frag_end > end {
                break;
            }
            if !partial.received[index] {
                partial.received[index] = true;
                partial.remaining -= 1;
            }
        }
        if partial.remaining > 0 {
            return None;
        }

        let done = self.pending.remove(&seq)?;
        let data = Data {
            reader_id: frag.reader_id,
            writer_id: frag.writer_id,
            writer_sn: seq,
            inline_qos: done.inline_qos,
            serialized_payload: Some(done.bytes),
            key_only: false,
        };
        Some((data, done.source_ts))
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, p)| p.touched)
            .map(|(seq, _)| *seq);
        if let Some(seq) = oldest {
            log::debug!("[FRAG] evicting partial #{}", seq);
            self.pending.remove(&seq);
        }
    }

    pub fn has(&self, seq: i64) -> bool {
        self.pending.contains_key(&seq)
    }

    /// Missing fragments of every partial sample, for NACK_FRAG.
    pub fn missing(&self) -> Vec<(i64, FragmentNumberSet)> {
        self.pending
            .iter()
            .filter_map(|(seq, p)| {
                let mut missing = p.missing().peekable();
                let base = *missing.peek()?;
                let set = FragmentNumberSet::from_fragments(base, missing.take(MAX_SET_BITS as usize));
                Some((*seq, set))
            })
            .collect()
    }

    /// Forget partial samples below `seq` (delivered or written off).
    pub fn discard_below(&mut self, seq: i64) -> usize {
        let keep = self.pending.split_off(&seq);
        let dropped = self.pending.len();
        self.pending = keep;
        dropped
    }

    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
