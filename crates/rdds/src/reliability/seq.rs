// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence number generation (per writer).
//!
//! RTPS sequence numbers are signed 64-bit values split into `high: i32` and
//! `low: u32` on the wire; the first change of a writer is number 1.

use std::sync::atomic::{AtomicI64, Ordering};

/// Sequence number generator (per-writer)
///
/// # Thread Safety
///
/// `next()` is a single `fetch_add`; concurrent writers on the same engine
/// serialize through the engine lock anyway, so relaxed ordering is enough.
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicI64,
}

impl SeqNumGenerator {
    /// Start at sequence number 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Allocate the next sequence number.
    #[inline]
    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Last number handed out (0 before the first write).
    #[inline]
    #[must_use]
    pub fn current(&self) -> i64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_one() {
        let gen = SeqNumGenerator::new();
        assert_eq!(gen.current(), 0);
        assert_eq!(gen.next(), 1);
        assert_eq!(gen.next(), 2);
        assert_eq!(gen.current(), 2);
    }

    #[test]
    fn test_concurrent_numbers_are_unique() {
        let gen = Arc::new(SeqNumGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = Arc::clone(&gen);
                thread::spawn(move || (0..250).map(|_| g.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
        assert_eq!(all[0], 1);
        assert_eq!(all[999], 1000);
    }
}
