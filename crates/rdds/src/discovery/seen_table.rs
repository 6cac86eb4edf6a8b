// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplicate filter for discovery announcements.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::core::GUID;

/// Remembers which `(writer_guid, sequence_number)` announcements were
/// already processed.
///
/// Bounded by an LRU: under pressure the least recently seen pair is
/// forgotten and, if resent, processed once more. Processing an
/// announcement twice is harmless; the table only saves work.
pub struct SeenTable {
    table: LruCache<(GUID, i64), ()>,
}

impl SeenTable {
    /// Default capacity: 4096 announcements.
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            table: LruCache::new(cap),
        }
    }

    /// Returns true if already seen; records the pair otherwise.
    pub fn is_seen(&mut self, writer: GUID, seq: i64) -> bool {
        if self.table.get(&(writer, seq)).is_some() {
            return true;
        }
        self.table.put((writer, seq), ());
        false
    }

    /// Forget everything learnt from one writer (participant removal).
    pub fn forget_writer(&mut self, writer: &GUID) {
        let keys: Vec<(GUID, i64)> = self
            .table
            .iter()
            .filter(|((w, _), _)| w == writer)
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            self.table.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

impl Default for SeenTable {
    fn default() -> Self {
        Self::new()
    }
}
