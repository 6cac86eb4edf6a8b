// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PL_CDR encoding of SPDP and SEDP announcements.
//!
//! Every announcement is a [`ParameterList`] with the standard PIDs. QoS
//! parameters left out by the sender take their DDS default on decode.

use std::time::Duration;

use crate::core::{GuidPrefix, Time, GUID};
use crate::protocol::cursor::{WireReader, WireWriter};
use crate::protocol::parameter::*;
use crate::protocol::ParameterList;
use crate::qos::{
    DestinationOrder, Durability, History, Liveliness, LivelinessKind, Ownership, OwnershipKind,
    Partition, QoS, Reliability, ReliabilityKind,
};

use super::proxy::{ParticipantProxyData, ReaderProxyData, WriterProxyData};
use super::DiscoveryError;

const RELIABILITY_BEST_EFFORT: u32 = 1;
const RELIABILITY_RELIABLE: u32 = 2;
const HISTORY_KEEP_LAST: u32 = 0;
const HISTORY_KEEP_ALL: u32 = 1;

// ============================================================================
// SPDP
// ============================================================================

pub fn encode_participant(data: &ParticipantProxyData) -> Vec<u8> {
    let mut pl = ParameterList::new();
    pl.push(PID_PROTOCOL_VERSION, data.protocol_version.to_vec());
    pl.push(PID_VENDORID, data.vendor_id.to_vec());
    pl.push_guid(PID_PARTICIPANT_GUID, &data.guid());
    pl.push_u32(PID_DOMAIN_ID, data.domain_id);
    pl.push_time(PID_PARTICIPANT_LEASE_DURATION, Time::from_duration(data.lease_duration));
    pl.push_u32(PID_BUILTIN_ENDPOINT_SET, data.builtin_endpoints);
    for loc in &data.metatraffic_unicast {
        pl.push_locator(PID_METATRAFFIC_UNICAST_LOCATOR, loc);
    }
    for loc in &data.metatraffic_multicast {
        pl.push_locator(PID_METATRAFFIC_MULTICAST_LOCATOR, loc);
    }
    for loc in &data.default_unicast {
        pl.push_locator(PID_DEFAULT_UNICAST_LOCATOR, loc);
    }
    for loc in &data.default_multicast {
        pl.push_locator(PID_DEFAULT_MULTICAST_LOCATOR, loc);
    }
    if let Some(name) = &data.entity_name {
        pl.push_string(PID_ENTITY_NAME, name);
    }
    pl.to_bytes()
}

/// Decode an SPDP payload.
///
/// A missing domain id means domain 0; a missing lease takes the default.
pub fn decode_participant(bytes: &[u8]) -> Result<ParticipantProxyData, DiscoveryError> {
    let pl = ParameterList::from_bytes(bytes)?;
    let guid = pl
        .get_guid(PID_PARTICIPANT_GUID)
        .ok_or(DiscoveryError::MissingGuid)?;
    let mut data = ParticipantProxyData::new(guid.prefix, pl.get_u32(PID_DOMAIN_ID).unwrap_or(0));
    if let Some(v) = pl.get(PID_VENDORID).and_then(|v| v.get(..2)) {
        data.vendor_id = [v[0], v[1]];
    }
    if let Some(v) = pl.get(PID_PROTOCOL_VERSION).and_then(|v| v.get(..2)) {
        data.protocol_version = [v[0], v[1]];
    }
    if let Some(lease) = pl.get_time(PID_PARTICIPANT_LEASE_DURATION) {
        data.lease_duration = lease.to_duration();
    }
    if let Some(set) = pl.get_u32(PID_BUILTIN_ENDPOINT_SET) {
        data.builtin_endpoints = set;
    }
    data.metatraffic_unicast = pl.get_locators(PID_METATRAFFIC_UNICAST_LOCATOR);
    data.metatraffic_multicast = pl.get_locators(PID_METATRAFFIC_MULTICAST_LOCATOR);
    data.default_unicast = pl.get_locators(PID_DEFAULT_UNICAST_LOCATOR);
    data.default_multicast = pl.get_locators(PID_DEFAULT_MULTICAST_LOCATOR);
    data.entity_name = pl.get_string(PID_ENTITY_NAME);
    Ok(data)
}

// ============================================================================
// SEDP
// ============================================================================

pub fn encode_writer(data: &WriterProxyData) -> Vec<u8> {
    let mut pl = endpoint_header(&data.guid, &data.topic_name, &data.type_name);
    push_qos(&mut pl, &data.qos, true);
    push_endpoint_locators(&mut pl, &data.unicast_locators, &data.multicast_locators);
    pl.to_bytes()
}

pub fn encode_reader(data: &ReaderProxyData) -> Vec<u8> {
    let mut pl = endpoint_header(&data.guid, &data.topic_name, &data.type_name);
    push_qos(&mut pl, &data.qos, false);
    push_endpoint_locators(&mut pl, &data.unicast_locators, &data.multicast_locators);
    pl.to_bytes()
}

pub fn decode_writer(bytes: &[u8]) -> Result<WriterProxyData, DiscoveryError> {
    let pl = ParameterList::from_bytes(bytes)?;
    let (guid, topic_name, type_name) = endpoint_identity(&pl)?;
    Ok(WriterProxyData {
        guid,
        topic_name,
        type_name,
        qos: read_qos(&pl)?,
        unicast_locators: pl.get_locators(PID_UNICAST_LOCATOR),
        multicast_locators: pl.get_locators(PID_MULTICAST_LOCATOR),
    })
}

pub fn decode_reader(bytes: &[u8]) -> Result<ReaderProxyData, DiscoveryError> {
    let pl = ParameterList::from_bytes(bytes)?;
    let (guid, topic_name, type_name) = endpoint_identity(&pl)?;
    Ok(ReaderProxyData {
        guid,
        topic_name,
        type_name,
        qos: read_qos(&pl)?,
        unicast_locators: pl.get_locators(PID_UNICAST_LOCATOR),
        multicast_locators: pl.get_locators(PID_MULTICAST_LOCATOR),
    })
}

fn endpoint_header(guid: &GUID, topic: &str, type_name: &str) -> ParameterList {
    let mut pl = ParameterList::new();
    pl.push_guid(PID_ENDPOINT_GUID, guid);
    pl.push_guid(PID_PARTICIPANT_GUID, &guid.participant());
    pl.push_string(PID_TOPIC_NAME, topic);
    pl.push_string(PID_TYPE_NAME, type_name);
    pl
}

fn push_endpoint_locators(pl: &mut ParameterList, unicast: &[crate::core::Locator], multicast: &[crate::core::Locator]) {
    for loc in unicast {
        pl.push_locator(PID_UNICAST_LOCATOR, loc);
    }
    for loc in multicast {
        pl.push_locator(PID_MULTICAST_LOCATOR, loc);
    }
}

fn endpoint_identity(pl: &ParameterList) -> Result<(GUID, String, String), DiscoveryError> {
    let guid = pl
        .get_guid(PID_ENDPOINT_GUID)
        .ok_or(DiscoveryError::MissingGuid)?;
    let topic = pl
        .get_string(PID_TOPIC_NAME)
        .ok_or(DiscoveryError::Malformed("missing topic name".into()))?;
    let type_name = pl
        .get_string(PID_TYPE_NAME)
        .ok_or(DiscoveryError::Malformed("missing type name".into()))?;
    Ok((guid, topic, type_name))
}

// ============================================================================
// QoS parameters
// ============================================================================

fn push_qos(pl: &mut ParameterList, qos: &QoS, offered: bool) {
    let mut w = WireWriter::new();
    w.write_u32(match qos.reliability.kind {
        ReliabilityKind::BestEffort => RELIABILITY_BEST_EFFORT,
        ReliabilityKind::Reliable => RELIABILITY_RELIABLE,
    });
    write_time(&mut w, qos.reliability.max_blocking_time);
    pl.push(PID_RELIABILITY, w.into_inner());

    pl.push_u32(PID_DURABILITY, u32::from(qos.durability.rank()));
    pl.push_time(PID_DEADLINE, Time::from_duration(qos.deadline.period));

    let mut w = WireWriter::new();
    w.write_u32(qos.liveliness.kind.qos_value());
    write_time(&mut w, qos.liveliness.lease_duration);
    pl.push(PID_LIVELINESS, w.into_inner());

    pl.push_u32(
        PID_OWNERSHIP,
        match qos.ownership.kind {
            OwnershipKind::Shared => 0,
            OwnershipKind::Exclusive => 1,
        },
    );
    if offered {
        pl.push_i32(PID_OWNERSHIP_STRENGTH, qos.ownership.strength);
        if !qos.lifespan.is_infinite() {
            pl.push_time(PID_LIFESPAN, Time::from_duration(qos.lifespan.duration));
        }
    }
    pl.push_u32(
        PID_DESTINATION_ORDER,
        match qos.destination_order {
            DestinationOrder::ByReceptionTimestamp => 0,
            DestinationOrder::BySourceTimestamp => 1,
        },
    );

    let mut w = WireWriter::new();
    match qos.history {
        History::KeepLast(depth) => {
            w.write_u32(HISTORY_KEEP_LAST);
            w.write_i32(depth as i32);
        }
        History::KeepAll => {
            w.write_u32(HISTORY_KEEP_ALL);
            w.write_i32(0);
        }
    }
    pl.push(PID_HISTORY, w.into_inner());

    if !qos.partition.names.is_empty() {
        pl.push_string_seq(PID_PARTITION, &qos.partition.names);
    }
}

fn read_qos(pl: &ParameterList) -> Result<QoS, DiscoveryError> {
    let mut qos = QoS::default();

    if let Some(raw) = pl.get(PID_RELIABILITY) {
        let mut r = WireReader::new(raw);
        let kind = r.read_u32()?;
        let blocking = read_time(&mut r)?;
        qos.reliability = match kind {
            RELIABILITY_BEST_EFFORT => Reliability::best_effort(),
            RELIABILITY_RELIABLE => Reliability::reliable(),
            other => return Err(DiscoveryError::Malformed(format!("reliability kind {}", other))),
        }
        .with_max_blocking_time(blocking);
    }
    if let Some(rank) = pl.get_u32(PID_DURABILITY) {
        qos.durability = match rank {
            0 => Durability::Volatile,
            1 => Durability::TransientLocal,
            2 => Durability::Transient,
            3 => Durability::Persistent,
            other => return Err(DiscoveryError::Malformed(format!("durability kind {}", other))),
        };
    }
    if let Some(period) = pl.get_time(PID_DEADLINE) {
        qos.deadline.period = period.to_duration();
    }
    if let Some(raw) = pl.get(PID_LIVELINESS) {
        let mut r = WireReader::new(raw);
        let kind = r.read_u32()?;
        let lease = read_time(&mut r)?;
        let kind = LivelinessKind::from_qos_value(kind)
            .ok_or_else(|| DiscoveryError::Malformed(format!("liveliness kind {}", kind)))?;
        qos.liveliness = Liveliness::new(kind, lease);
    }
    if let Some(kind) = pl.get_u32(PID_OWNERSHIP) {
        qos.ownership = Ownership {
            kind: if kind == 1 {
                OwnershipKind::Exclusive
            } else {
                OwnershipKind::Shared
            },
            strength: pl.get_i32(PID_OWNERSHIP_STRENGTH).unwrap_or(0),
        };
    }
    if let Some(duration) = pl.get_time(PID_LIFESPAN) {
        qos.lifespan.duration = duration.to_duration();
    }
    if let Some(kind) = pl.get_u32(PID_DESTINATION_ORDER) {
        qos.destination_order = if kind == 1 {
            DestinationOrder::BySourceTimestamp
        } else {
            DestinationOrder::ByReceptionTimestamp
        };
    }
    if let Some(raw) = pl.get(PID_HISTORY) {
        let mut r = WireReader::new(raw);
        let kind = r.read_u32()?;
        let depth = r.read_i32()?;
        qos.history = match kind {
            HISTORY_KEEP_ALL => History::KeepAll,
            _ => History::KeepLast(depth.max(1) as u32),
        };
    }
    if let Some(names) = pl.get_string_seq(PID_PARTITION) {
        qos.partition = Partition::new(names);
    }
    Ok(qos)
}

fn write_time(w: &mut WireWriter, d: Duration) {
    let t = Time::from_duration(d);
    w.write_i32(t.seconds);
    w.write_u32(t.fraction);
}

fn read_time(r: &mut WireReader<'_>) -> Result<Duration, DiscoveryError> {
    let seconds = r.read_i32()?;
    let fraction = r.read_u32()?;
    Ok(Time { seconds, fraction }.to_duration())
}

/// Participant prefix carried in an SPDP disposal's key hash.
pub fn prefix_from_key_hash(key: &[u8; 16]) -> GuidPrefix {
    GUID::from_bytes(*key).prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, Locator};
    use std::net::Ipv4Addr;

    fn prefix() -> GuidPrefix {
        GuidPrefix([0x11; 12])
    }

    #[test]
    fn test_participant_fields_survive_encoding() {
        let mut data = ParticipantProxyData::new(prefix(), 7);
        data.lease_duration = Duration::from_secs(5);
        data.metatraffic_unicast = vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, 1), 7410)];
        data.default_unicast = vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, 1), 7411)];
        data.entity_name = Some("node".into());

        let decoded = decode_participant(&encode_participant(&data)).expect("decode");
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_participant_without_guid_is_rejected() {
        let mut pl = ParameterList::new();
        pl.push_u32(PID_DOMAIN_ID, 0);
        assert_eq!(
            decode_participant(&pl.to_bytes()),
            Err(DiscoveryError::MissingGuid)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode_participant(&[0xde, 0xad, 0xbe, 0xef]),
            Err(DiscoveryError::Malformed(_))
        ));
    }

    #[test]
    fn test_writer_qos_survives_encoding() {
        let qos = QoS::reliable()
            .transient_local()
            .keep_all()
            .deadline(Duration::from_millis(250))
            .liveliness(Liveliness::manual_by_topic(Duration::from_secs(2)))
            .ownership(Ownership::exclusive(9))
            .lifespan(Duration::from_millis(750))
            .partition(Partition::new(vec!["a".into(), "b*".into()]))
            .destination_order(DestinationOrder::BySourceTimestamp);
        let data = WriterProxyData {
            guid: GUID::new(prefix(), EntityId::user_writer(3, true)),
            topic_name: "Square".into(),
            type_name: "ShapeType".into(),
            qos: qos.clone(),
            unicast_locators: vec![Locator::udpv4(Ipv4Addr::LOCALHOST, 9000)],
            multicast_locators: Vec::new(),
        };
        let decoded = decode_writer(&encode_writer(&data)).expect("decode");
        assert_eq!(decoded.guid, data.guid);
        assert_eq!(decoded.topic_name, "Square");
        assert_eq!(decoded.qos.reliability.kind, qos.reliability.kind);
        assert_eq!(decoded.qos.durability, qos.durability);
        assert_eq!(decoded.qos.history, History::KeepAll);
        assert_eq!(decoded.qos.deadline, qos.deadline);
        assert_eq!(decoded.qos.liveliness, qos.liveliness);
        assert_eq!(decoded.qos.ownership, qos.ownership);
        assert_eq!(decoded.qos.lifespan.duration, Duration::from_millis(750));
        assert_eq!(decoded.qos.partition, qos.partition);
        assert_eq!(decoded.qos.destination_order, qos.destination_order);
        assert_eq!(decoded.unicast_locators, data.unicast_locators);
    }

    #[test]
    fn test_reader_defaults_fill_missing_qos() {
        let mut pl = ParameterList::new();
        let guid = GUID::new(prefix(), EntityId::user_reader(1, false));
        pl.push_guid(PID_ENDPOINT_GUID, &guid);
        pl.push_string(PID_TOPIC_NAME, "t");
        pl.push_string(PID_TYPE_NAME, "T");
        let decoded = decode_reader(&pl.to_bytes()).expect("decode");
        assert_eq!(decoded.qos, QoS::default());
        assert!(decoded.unicast_locators.is_empty());
    }

    #[test]
    fn test_missing_topic_is_malformed() {
        let mut pl = ParameterList::new();
        pl.push_guid(PID_ENDPOINT_GUID, &GUID::new(prefix(), EntityId::user_reader(1, false)));
        assert!(matches!(
            decode_reader(&pl.to_bytes()),
            Err(DiscoveryError::Malformed(_))
        ));
    }

    #[test]
    fn test_infinite_durations_survive() {
        let data = ReaderProxyData {
            guid: GUID::new(prefix(), EntityId::user_reader(1, false)),
            topic_name: "t".into(),
            type_name: "T".into(),
            qos: QoS::reliable(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        };
        let decoded = decode_reader(&encode_reader(&data)).expect("decode");
        assert!(decoded.qos.liveliness.is_infinite());
        assert_eq!(decoded.qos.deadline.period, crate::core::DURATION_INFINITE);
    }
}
