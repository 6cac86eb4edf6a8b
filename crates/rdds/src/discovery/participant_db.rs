// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote participant table with lease tracking.
//!
//! Plain data: the owning [`super::Discovery`] guards it with its lock and
//! runs [`ParticipantDb::expire`] from the event thread every
//! `lease_check_period`.

use std::collections::HashMap;
use std::time::Instant;

use crate::core::GuidPrefix;

use super::proxy::{ParticipantEntry, ParticipantProxyData, ParticipantState};

/// What an announcement did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantUpdate {
    /// First time seen (or seen again after removal).
    New,
    /// Known participant whose announcement content changed.
    Changed,
    /// Same content; lease renewed only.
    Renewed,
}

#[derive(Debug, Default)]
pub struct ParticipantDb {
    entries: HashMap<GuidPrefix, ParticipantEntry>,
}

impl ParticipantDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an announcement and renew its lease.
    pub fn merge(&mut self, data: ParticipantProxyData, now: Instant) -> ParticipantUpdate {
        match self.entries.get_mut(&data.guid_prefix) {
            Some(entry) => {
                entry.last_seen = now;
                if entry.data == data {
                    ParticipantUpdate::Renewed
                } else {
                    entry.data = data;
                    ParticipantUpdate::Changed
                }
            }
            None => {
                self.entries.insert(
                    data.guid_prefix,
                    ParticipantEntry {
                        data,
                        state: ParticipantState::Discovered,
                        last_seen: now,
                    },
                );
                ParticipantUpdate::New
            }
        }
    }

    /// Renew without content (duplicate announcement).
    pub fn renew(&mut self, prefix: &GuidPrefix, now: Instant) -> bool {
        match self.entries.get_mut(prefix) {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn set_state(&mut self, prefix: &GuidPrefix, state: ParticipantState) {
        if let Some(entry) = self.entries.get_mut(prefix) {
            entry.state = state;
        }
    }

    /// Remove a participant that announced its own removal.
    pub fn remove(&mut self, prefix: &GuidPrefix) -> Option<ParticipantEntry> {
        self.entries.remove(prefix).map(|mut entry| {
            entry.state = ParticipantState::Removed;
            entry
        })
    }

    /// Remove every participant whose lease ran out; they come back `Dropped`.
    pub fn expire(&mut self, now: Instant) -> Vec<ParticipantEntry> {
        let expired: Vec<GuidPrefix> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(p, _)| *p)
            .collect();
        expired
            .into_iter()
            .filter_map(|prefix| self.entries.remove(&prefix))
            .map(|mut entry| {
                entry.state = ParticipantState::Dropped;
                entry
            })
            .collect()
    }

    pub fn get(&self, prefix: &GuidPrefix) -> Option<&ParticipantEntry> {
        self.entries.get(prefix)
    }

    pub fn contains(&self, prefix: &GuidPrefix) -> bool {
        self.entries.contains_key(prefix)
    }

    pub fn state_of(&self, prefix: &GuidPrefix) -> ParticipantState {
        self.entries
            .get(prefix)
            .map_or(ParticipantState::Unknown, |e| e.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn data(n: u8, lease_ms: u64) -> ParticipantProxyData {
        let mut d = ParticipantProxyData::new(GuidPrefix([n; 12]), 0);
        d.lease_duration = Duration::from_millis(lease_ms);
        d
    }

    #[test]
    fn test_merge_new_changed_renewed() {
        let mut db = ParticipantDb::new();
        let now = Instant::now();
        assert_eq!(db.merge(data(1, 1000), now), ParticipantUpdate::New);
        assert_eq!(db.state_of(&GuidPrefix([1; 12])), ParticipantState::Discovered);
        assert_eq!(db.merge(data(1, 1000), now), ParticipantUpdate::Renewed);
        assert_eq!(db.merge(data(1, 2000), now), ParticipantUpdate::Changed);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_expire_drops_only_stale() {
        let mut db = ParticipantDb::new();
        let now = Instant::now();
        db.merge(data(1, 100), now);
        db.merge(data(2, 10_000), now);

        let dropped = db.expire(now + Duration::from_millis(200));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].state, ParticipantState::Dropped);
        assert_eq!(dropped[0].data.guid_prefix, GuidPrefix([1; 12]));
        assert!(db.contains(&GuidPrefix([2; 12])));
    }

    #[test]
    fn test_renew_postpones_expiry() {
        let mut db = ParticipantDb::new();
        let start = Instant::now();
        db.merge(data(1, 100), start);
        assert!(db.renew(&GuidPrefix([1; 12]), start + Duration::from_millis(80)));
        assert!(db.expire(start + Duration::from_millis(150)).is_empty());
        assert!(!db.renew(&GuidPrefix([9; 12]), start));
    }

    #[test]
    fn test_remove_marks_removed() {
        let mut db = ParticipantDb::new();
        db.merge(data(1, 100), Instant::now());
        let entry = db.remove(&GuidPrefix([1; 12])).expect("present");
        assert_eq!(entry.state, ParticipantState::Removed);
        assert_eq!(db.state_of(&GuidPrefix([1; 12])), ParticipantState::Unknown);
    }
}
