// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy data for remote (and announced local) entities.

use std::time::{Duration, Instant};

use crate::config::{DEFAULT_PARTICIPANT_LEASE, VENDOR_ID};
use crate::core::{EntityId, GuidPrefix, Locator, GUID};
use crate::qos::QoS;

/// Built-in endpoint availability bits (PID_BUILTIN_ENDPOINT_SET).
pub mod builtin_endpoint {
    pub const PARTICIPANT_ANNOUNCER: u32 = 1 << 0;
    pub const PARTICIPANT_DETECTOR: u32 = 1 << 1;
    pub const PUBLICATIONS_ANNOUNCER: u32 = 1 << 2;
    pub const PUBLICATIONS_DETECTOR: u32 = 1 << 3;
    pub const SUBSCRIPTIONS_ANNOUNCER: u32 = 1 << 4;
    pub const SUBSCRIPTIONS_DETECTOR: u32 = 1 << 5;
    pub const PARTICIPANT_MESSAGE_WRITER: u32 = 1 << 10;
    pub const PARTICIPANT_MESSAGE_READER: u32 = 1 << 11;

    pub const ALL: u32 = PARTICIPANT_ANNOUNCER
        | PARTICIPANT_DETECTOR
        | PUBLICATIONS_ANNOUNCER
        | PUBLICATIONS_DETECTOR
        | SUBSCRIPTIONS_ANNOUNCER
        | SUBSCRIPTIONS_DETECTOR
        | PARTICIPANT_MESSAGE_WRITER
        | PARTICIPANT_MESSAGE_READER;
}

/// SPDP announcement content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantProxyData {
    pub guid_prefix: GuidPrefix,
    pub domain_id: u32,
    pub vendor_id: [u8; 2],
    pub protocol_version: [u8; 2],
    pub metatraffic_unicast: Vec<Locator>,
    pub metatraffic_multicast: Vec<Locator>,
    pub default_unicast: Vec<Locator>,
    pub default_multicast: Vec<Locator>,
    pub lease_duration: Duration,
    pub builtin_endpoints: u32,
    pub entity_name: Option<String>,
}

impl ParticipantProxyData {
    pub fn new(guid_prefix: GuidPrefix, domain_id: u32) -> Self {
        Self {
            guid_prefix,
            domain_id,
            vendor_id: VENDOR_ID,
            protocol_version: crate::protocol::message::RTPS_VERSION,
            metatraffic_unicast: Vec::new(),
            metatraffic_multicast: Vec::new(),
            default_unicast: Vec::new(),
            default_multicast: Vec::new(),
            lease_duration: DEFAULT_PARTICIPANT_LEASE,
            builtin_endpoints: builtin_endpoint::ALL,
            entity_name: None,
        }
    }

    pub fn guid(&self) -> GUID {
        GUID::new(self.guid_prefix, EntityId::PARTICIPANT)
    }

    pub fn has_builtin(&self, bit: u32) -> bool {
        self.builtin_endpoints & bit != 0
    }
}

/// Lifecycle of a remote participant in the participant table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Unknown,
    /// First announcement seen, built-in endpoints not yet assigned.
    Discovered,
    /// Built-in endpoints assigned, lease running.
    Alive,
    /// Announced its own removal.
    Removed,
    /// Lease expired.
    Dropped,
}

/// Participant table entry.
#[derive(Debug, Clone)]
pub struct ParticipantEntry {
    pub data: ParticipantProxyData,
    pub state: ParticipantState,
    pub last_seen: Instant,
}

impl ParticipantEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.last_seen
            .checked_add(self.data.lease_duration)
            .is_some_and(|deadline| deadline <= now)
    }
}

/// SEDP publication content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterProxyData {
    pub guid: GUID,
    pub topic_name: String,
    pub type_name: String,
    pub qos: QoS,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
}

/// SEDP subscription content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderProxyData {
    pub guid: GUID,
    pub topic_name: String,
    pub type_name: String,
    pub qos: QoS,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
}

macro_rules! endpoint_locators {
    ($ty:ty) => {
        impl $ty {
            /// Where to send: the endpoint's own locators, or its participant's
            /// default locators when it advertises none.
            pub fn effective_locators(&self, participant: &ParticipantProxyData) -> Vec<Locator> {
                if !self.unicast_locators.is_empty() {
                    self.unicast_locators.clone()
                } else if !participant.default_unicast.is_empty() {
                    participant.default_unicast.clone()
                } else if !self.multicast_locators.is_empty() {
                    self.multicast_locators.clone()
                } else {
                    participant.default_multicast.clone()
                }
            }
        }
    };
}

endpoint_locators!(WriterProxyData);
endpoint_locators!(ReaderProxyData);

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_lease_expiry() {
        let mut data = ParticipantProxyData::new(GuidPrefix([1; 12]), 0);
        data.lease_duration = Duration::from_millis(10);
        let entry = ParticipantEntry {
            data,
            state: ParticipantState::Alive,
            last_seen: Instant::now(),
        };
        assert!(!entry.is_expired(Instant::now()));
        assert!(entry.is_expired(Instant::now() + Duration::from_millis(20)));
    }

    #[test]
    fn test_effective_locators_fall_back_to_participant() {
        let mut participant = ParticipantProxyData::new(GuidPrefix([1; 12]), 0);
        participant.default_unicast = vec![Locator::udpv4(Ipv4Addr::LOCALHOST, 7411)];
        let mut writer = WriterProxyData {
            guid: GUID::new(GuidPrefix([1; 12]), EntityId::user_writer(1, false)),
            topic_name: "t".into(),
            type_name: "T".into(),
            qos: QoS::default(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        };
        assert_eq!(writer.effective_locators(&participant), participant.default_unicast);
        writer.unicast_locators = vec![Locator::udpv4(Ipv4Addr::LOCALHOST, 9000)];
        assert_eq!(writer.effective_locators(&participant)[0].port, 9000);
    }
}
