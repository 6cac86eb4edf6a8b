// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plain-value QoS policies used for matching and engine configuration.

use std::time::Duration;

use crate::core::{Time, DURATION_INFINITE};

/// DDS LENGTH_UNLIMITED (-1 as i32 on the wire).
pub const LENGTH_UNLIMITED: usize = usize::MAX;

// ============================================================================
// RELIABILITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReliabilityKind {
    BestEffort,
    Reliable,
}

/// RELIABILITY QoS policy (DDS v1.4 Sec.2.2.3.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reliability {
    pub kind: ReliabilityKind,
    /// Maximum time `write` may block when the history is full (KEEP_ALL).
    pub max_blocking_time: Duration,
}

impl Reliability {
    pub fn best_effort() -> Self {
        Self {
            kind: ReliabilityKind::BestEffort,
            max_blocking_time: Duration::from_millis(100),
        }
    }

    pub fn reliable() -> Self {
        Self {
            kind: ReliabilityKind::Reliable,
            max_blocking_time: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn with_max_blocking_time(mut self, max_blocking_time: Duration) -> Self {
        self.max_blocking_time = max_blocking_time;
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.kind == ReliabilityKind::Reliable
    }
}

// ============================================================================
// DURABILITY
// ============================================================================

/// DURABILITY kinds, ordered by strength for RxO comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Durability {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

impl Durability {
    pub fn rank(self) -> u8 {
        match self {
            Durability::Volatile => 0,
            Durability::TransientLocal => 1,
            Durability::Transient => 2,
            Durability::Persistent => 3,
        }
    }
}

// ============================================================================
// HISTORY / RESOURCE_LIMITS
// ============================================================================

/// HISTORY QoS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    /// Keep the last `depth` samples per instance.
    KeepLast(u32),
    /// Keep everything until resource limits are hit.
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        History::KeepLast(1)
    }
}

/// RESOURCE_LIMITS QoS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_samples: usize,
    pub max_instances: usize,
    pub max_samples_per_instance: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 5000,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

// ============================================================================
// DEADLINE / OWNERSHIP / DESTINATION_ORDER
// ============================================================================

/// DEADLINE QoS policy; infinite by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub period: Duration,
}

impl Default for Deadline {
    fn default() -> Self {
        Self {
            period: DURATION_INFINITE,
        }
    }
}

impl Deadline {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OwnershipKind {
    #[default]
    Shared,
    Exclusive,
}

/// OWNERSHIP QoS policy; `strength` only matters for EXCLUSIVE writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ownership {
    pub kind: OwnershipKind,
    pub strength: i32,
}

impl Ownership {
    pub fn exclusive(strength: i32) -> Self {
        Self {
            kind: OwnershipKind::Exclusive,
            strength,
        }
    }
}

// ============================================================================
// LIFESPAN
// ============================================================================

/// LIFESPAN QoS policy (DDS v1.4 Sec.2.2.3.16); infinite by default.
///
/// Offered by writers only. A sample expires `duration` after its source
/// timestamp, on the writer's history and on every matched reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifespan {
    pub duration: Duration,
}

impl Default for Lifespan {
    fn default() -> Self {
        Self {
            duration: DURATION_INFINITE,
        }
    }
}

impl Lifespan {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn is_infinite(&self) -> bool {
        self.duration >= DURATION_INFINITE
    }

    /// True once `now` is at least `duration` past `source`.
    pub fn is_expired(&self, source: Time, now: Time) -> bool {
        if self.is_infinite() {
            return false;
        }
        now.to_duration().saturating_sub(source.to_duration()) >= self.duration
    }
}

/// DESTINATION_ORDER kinds, ordered for RxO comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DestinationOrder {
    #[default]
    ByReceptionTimestamp,
    BySourceTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durability_ordering() {
        assert!(Durability::Volatile < Durability::TransientLocal);
        assert!(Durability::TransientLocal < Durability::Persistent);
        assert_eq!(Durability::Transient.rank(), 2);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(History::default(), History::KeepLast(1));
        assert_eq!(Deadline::default().period, DURATION_INFINITE);
        assert_eq!(ResourceLimits::default().max_instances, LENGTH_UNLIMITED);
        assert!(!Reliability::best_effort().is_reliable());
        assert!(Lifespan::default().is_infinite());
    }

    #[test]
    fn test_lifespan_expiry() {
        let lifespan = Lifespan::new(Duration::from_millis(500));
        let source = Time::from_duration(Duration::from_secs(100));
        let before = Time::from_duration(Duration::from_millis(100_499));
        let at = Time::from_duration(Duration::from_millis(100_500));
        assert!(!lifespan.is_expired(source, before));
        assert!(lifespan.is_expired(source, at));
        // A source timestamp ahead of the local clock never expires early.
        assert!(!lifespan.is_expired(at, source));
        assert!(!Lifespan::default().is_expired(Time::ZERO, Time::now()));
    }
}
