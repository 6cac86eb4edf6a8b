// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer/reader matching (topic, type, RxO QoS, partition).
//!
//! # Compatibility Rules
//!
//! | Policy            | Rule                                                 |
//! |-------------------|------------------------------------------------------|
//! | Reliability       | BEST_EFFORT writer cannot serve a RELIABLE reader    |
//! | Durability        | Writer rank >= reader rank                           |
//! | Deadline          | Writer period <= reader period                       |
//! | Liveliness        | Writer kind >= reader kind, writer lease <= reader's |
//! | Ownership         | Kinds equal                                          |
//! | Destination order | Writer kind >= reader kind                           |
//! | Partition         | Sets intersect (wildcards on either side)            |

use crate::qos::QoS;

use super::proxy::{ReaderProxyData, WriterProxyData};

/// Outcome of matching one writer against one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Matched,
    /// Different topic or type; not reported to anyone.
    Unrelated,
    /// Same topic and type, but a requested/offered policy conflicts.
    IncompatibleQos(&'static str),
    /// Same topic and type, no common partition. Silent, like [`MatchResult::Unrelated`].
    PartitionMismatch,
}

impl MatchResult {
    pub fn is_matched(self) -> bool {
        self == MatchResult::Matched
    }
}

/// First RxO policy that makes `offered` (writer) unable to serve
/// `requested` (reader), by DDS policy name.
pub fn incompatible_policy(offered: &QoS, requested: &QoS) -> Option<&'static str> {
    crate::trace_fn!("matcher::incompatible_policy");
    if !offered.reliability.is_reliable() && requested.reliability.is_reliable() {
        return Some("RELIABILITY");
    }
    if offered.durability.rank() < requested.durability.rank() {
        return Some("DURABILITY");
    }
    if offered.deadline.period > requested.deadline.period {
        return Some("DEADLINE");
    }
    if !offered.liveliness.is_compatible_with(&requested.liveliness) {
        return Some("LIVELINESS");
    }
    if offered.ownership.kind != requested.ownership.kind {
        return Some("OWNERSHIP");
    }
    if offered.destination_order < requested.destination_order {
        return Some("DESTINATION_ORDER");
    }
    None
}

/// Match a writer against a reader.
pub fn match_endpoints(writer: &WriterProxyData, reader: &ReaderProxyData) -> MatchResult {
    if writer.topic_name != reader.topic_name || writer.type_name != reader.type_name {
        return MatchResult::Unrelated;
    }
    if let Some(policy) = incompatible_policy(&writer.qos, &reader.qos) {
        log::debug!(
            "[MATCH-QOS] {} mismatch on '{}' (writer={}, reader={})",
            policy,
            writer.topic_name,
            writer.guid,
            reader.guid
        );
        return MatchResult::IncompatibleQos(policy);
    }
    if !writer.qos.partition.is_compatible_with(&reader.qos.partition) {
        log::debug!(
            "[MATCH-QOS] no common partition on '{}' (writer={:?}, reader={:?})",
            writer.topic_name,
            writer.qos.partition,
            reader.qos.partition
        );
        return MatchResult::PartitionMismatch;
    }
    MatchResult::Matched
}
