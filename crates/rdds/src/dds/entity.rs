// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity traits and the lifecycle flags they are built from.
//!
//! Writers and readers compose an [`EntityState`] instead of inheriting
//! from a base entity.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::waitset::StatusCondition;
use super::{Error, Result};

/// Communication status bits (DDS v1.4 Sec.2.2.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusMask(u32);

impl StatusMask {
    pub const NONE: StatusMask = StatusMask(0);
    pub const ALL: StatusMask = StatusMask(0xFFFF_FFFF);

    /// Data available to read (DataReader)
    pub const DATA_AVAILABLE: StatusMask = StatusMask(1 << 0);
    /// Sample lost (DataReader)
    pub const SAMPLE_LOST: StatusMask = StatusMask(1 << 1);
    /// Liveliness changed (DataReader)
    pub const LIVELINESS_CHANGED: StatusMask = StatusMask(1 << 3);
    /// Requested deadline missed (DataReader)
    pub const REQUESTED_DEADLINE_MISSED: StatusMask = StatusMask(1 << 4);
    /// Requested incompatible QoS (DataReader)
    pub const REQUESTED_INCOMPATIBLE_QOS: StatusMask = StatusMask(1 << 5);
    /// Subscription matched (DataReader)
    pub const SUBSCRIPTION_MATCHED: StatusMask = StatusMask(1 << 6);
    /// Liveliness lost (DataWriter)
    pub const LIVELINESS_LOST: StatusMask = StatusMask(1 << 7);
    /// Offered deadline missed (DataWriter)
    pub const OFFERED_DEADLINE_MISSED: StatusMask = StatusMask(1 << 8);
    /// Offered incompatible QoS (DataWriter)
    pub const OFFERED_INCOMPATIBLE_QOS: StatusMask = StatusMask(1 << 9);
    /// Publication matched (DataWriter)
    pub const PUBLICATION_MATCHED: StatusMask = StatusMask(1 << 10);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        StatusMask(bits)
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(&self, other: StatusMask) -> bool {
        (self.0 & other.0) == other.0
    }

    #[must_use]
    pub const fn intersects(&self, other: StatusMask) -> bool {
        (self.0 & other.0) != 0
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for StatusMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        StatusMask(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for StatusMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        StatusMask(self.0 & rhs.0)
    }
}

/// Entities created disabled (participant `autoenable = false`) must be
/// enabled before use.
pub trait Enableable {
    /// Enable the entity. Enabling twice is a no-op.
    fn enable(&self) -> Result<()>;

    fn is_enabled(&self) -> bool;
}

/// Entities exposing communication statuses.
pub trait StatusTracked {
    /// Condition triggered by the statuses in its enabled mask.
    fn status_condition(&self) -> Arc<StatusCondition>;

    /// Statuses changed since they were last read.
    fn status_changes(&self) -> StatusMask;
}

/// Lifecycle flags plus the status condition of one entity.
pub(crate) struct EntityState {
    enabled: AtomicBool,
    deleted: AtomicBool,
    changes: AtomicU32,
    condition: Arc<StatusCondition>,
}

impl EntityState {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            changes: AtomicU32::new(0),
            condition: Arc::new(StatusCondition::new()),
        }
    }

    /// Flip to enabled. False if it already was.
    pub(crate) fn mark_enabled(&self) -> bool {
        !self.enabled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip to deleted. False if it already was.
    pub(crate) fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// `AlreadyDeleted` / `NotEnabled` unless the entity is usable.
    pub(crate) fn check_usable(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        if !self.is_enabled() {
            return Err(Error::NotEnabled);
        }
        Ok(())
    }

    pub(crate) fn raise(&self, status: StatusMask) {
        self.changes.fetch_or(status.bits(), Ordering::AcqRel);
        self.condition.raise(status);
    }

    /// Mark `status` as read.
    pub(crate) fn clear(&self, status: StatusMask) {
        self.changes.fetch_and(!status.bits(), Ordering::AcqRel);
        self.condition.clear(status);
    }

    pub(crate) fn changes(&self) -> StatusMask {
        StatusMask::from_bits(self.changes.load(Ordering::Acquire))
    }

    pub(crate) fn condition(&self) -> Arc<StatusCondition> {
        Arc::clone(&self.condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ops() {
        let mask = StatusMask::DATA_AVAILABLE | StatusMask::SAMPLE_LOST;
        assert!(mask.contains(StatusMask::DATA_AVAILABLE));
        assert!(!mask.contains(StatusMask::PUBLICATION_MATCHED));
        assert!(mask.intersects(StatusMask::SAMPLE_LOST | StatusMask::LIVELINESS_LOST));
        assert!((mask & StatusMask::LIVELINESS_LOST).is_empty());
    }

    #[test]
    fn test_lifecycle() {
        let state = EntityState::new();
        assert_eq!(state.check_usable(), Err(Error::NotEnabled));
        assert!(state.mark_enabled());
        assert!(!state.mark_enabled());
        assert_eq!(state.check_usable(), Ok(()));
        assert!(state.mark_deleted());
        assert_eq!(state.check_usable(), Err(Error::AlreadyDeleted));
    }

    #[test]
    fn test_raise_and_clear() {
        let state = EntityState::new();
        state.raise(StatusMask::DATA_AVAILABLE);
        assert_eq!(state.changes(), StatusMask::DATA_AVAILABLE);
        state.clear(StatusMask::DATA_AVAILABLE);
        assert!(state.changes().is_empty());
    }
}
