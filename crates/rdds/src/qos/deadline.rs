// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DEADLINE enforcement (DDS v1.4 Sec.2.2.3.7)
//!
//! Each instance that was written (writer side) or received (reader side)
//! owes a new sample within `period`. A miss is reported once per elapsed
//! period until the instance is updated again.
//!
//! ```text
//! update(I) ──▶ due[I] = now + period
//! check(now) ──▶ every due[I] <= now: missed, due[I] = now + period
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::DURATION_INFINITE;
use crate::history::InstanceHandle;

/// Per-instance deadline bookkeeping for one endpoint.
#[derive(Debug)]
pub struct DeadlineTracker {
    period: Duration,
    due: HashMap<Option<InstanceHandle>, Instant>,
    missed_total: u64,
}

impl DeadlineTracker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            due: HashMap::new(),
            missed_total: 0,
        }
    }

    /// False for an infinite period (nothing is tracked).
    pub fn is_enabled(&self) -> bool {
        self.period < DURATION_INFINITE
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// DEADLINE is mutable: new due times apply from the next update.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
        if !self.is_enabled() {
            self.due.clear();
        }
    }

    /// A sample of `instance` was written or received.
    pub fn on_update(&mut self, instance: Option<InstanceHandle>, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        if let Some(due) = now.checked_add(self.period) {
            self.due.insert(instance, due);
        }
    }

    /// Stop expecting samples of `instance` (disposed or unregistered).
    pub fn forget(&mut self, instance: Option<&InstanceHandle>) {
        self.due.remove(&instance.copied());
    }

    /// Instances whose deadline elapsed; each one is rescheduled one period
    /// from `now`.
    pub fn check(&mut self, now: Instant) -> Vec<Option<InstanceHandle>> {
        let period = self.period;
        let mut missed = Vec::new();
        for (instance, due) in self.due.iter_mut() {
            if *due <= now {
                missed.push(*instance);
                *due = now.checked_add(period).unwrap_or(now);
            }
        }
        self.missed_total += missed.len() as u64;
        missed
    }

    /// Earliest pending deadline.
    pub fn next_due(&self) -> Option<Instant> {
        self.due.values().min().copied()
    }

    pub fn missed_total(&self) -> u64 {
        self.missed_total
    }

    pub fn tracked(&self) -> usize {
        self.due.len()
    }
}
