// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LIVELINESS QoS policy (DDS v1.4 Sec.2.2.3.10).

use std::time::Duration;

use crate::core::DURATION_INFINITE;

/// Liveliness kinds, ordered from weakest to strongest guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LivelinessKind {
    /// Asserted by the middleware (any write or periodic background assertion).
    #[default]
    Automatic,
    /// Asserted when any writer of the participant asserts.
    ManualByParticipant,
    /// Each writer must assert on its own.
    ManualByTopic,
}

impl LivelinessKind {
    /// Wire value used by the participant-message liveliness protocol.
    pub fn wire_kind(self) -> u32 {
        match self {
            LivelinessKind::Automatic => 0x0000_0001,
            LivelinessKind::ManualByParticipant => 0x0000_0002,
            LivelinessKind::ManualByTopic => 0x0000_0003,
        }
    }

    pub fn from_wire_kind(raw: u32) -> Option<Self> {
        match raw {
            0x0000_0001 => Some(LivelinessKind::Automatic),
            0x0000_0002 => Some(LivelinessKind::ManualByParticipant),
            0x0000_0003 => Some(LivelinessKind::ManualByTopic),
            _ => None,
        }
    }

    /// DDS PID_LIVELINESS encoding (0 = AUTOMATIC, 1 = BY_PARTICIPANT, 2 = BY_TOPIC).
    pub fn qos_value(self) -> u32 {
        match self {
            LivelinessKind::Automatic => 0,
            LivelinessKind::ManualByParticipant => 1,
            LivelinessKind::ManualByTopic => 2,
        }
    }

    pub fn from_qos_value(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(LivelinessKind::Automatic),
            1 => Some(LivelinessKind::ManualByParticipant),
            2 => Some(LivelinessKind::ManualByTopic),
            _ => None,
        }
    }
}

/// LIVELINESS QoS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: DURATION_INFINITE,
        }
    }
}

impl Liveliness {
    #[must_use]
    pub fn new(kind: LivelinessKind, lease_duration: Duration) -> Self {
        Self {
            kind,
            lease_duration,
        }
    }

    #[must_use]
    pub fn automatic(lease_duration: Duration) -> Self {
        Self::new(LivelinessKind::Automatic, lease_duration)
    }

    #[must_use]
    pub fn manual_by_participant(lease_duration: Duration) -> Self {
        Self::new(LivelinessKind::ManualByParticipant, lease_duration)
    }

    #[must_use]
    pub fn manual_by_topic(lease_duration: Duration) -> Self {
        Self::new(LivelinessKind::ManualByTopic, lease_duration)
    }

    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.lease_duration == DURATION_INFINITE
    }

    /// Offered (`self`, writer) vs requested (reader).
    ///
    /// The writer kind must be at least as strong and its lease no longer.
    #[must_use]
    pub fn is_compatible_with(&self, requested: &Liveliness) -> bool {
        self.kind >= requested.kind && self.lease_duration <= requested.lease_duration
    }
}
