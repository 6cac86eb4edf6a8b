// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GAP construction.
//!
//! A GAP covers the contiguous range `[gap_start, gap_list.base - 1]` plus the
//! bits set in `gap_list`. The builder below packs an arbitrary set of
//! irrelevant sequences into as few GAPs as the 256-bit window allows.

use crate::protocol::SequenceNumberSet;
use crate::protocol::seqset::MAX_SET_BITS;

/// Pack `seqs` into `(gap_start, gap_list)` pairs.
///
/// Input need not be sorted; duplicates are ignored.
pub fn build_gaps(seqs: &[i64]) -> Vec<(i64, SequenceNumberSet)> {
    let mut sorted: Vec<i64> = seqs.iter().copied().filter(|s| *s >= 1).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        // Leading contiguous run goes in the range part.
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1] == sorted[j] + 1 {
            j += 1;
        }
        let base = sorted[j] + 1;
        let mut list = SequenceNumberSet::new(base);
        let mut k = j + 1;
        while k < sorted.len() && sorted[k] - base < i64::from(MAX_SET_BITS) {
            list.insert(sorted[k]);
            k += 1;
        }
        out.push((start, list));
        i = k;
    }
    out
}
