// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application-facing DDS layer
//!
//! Thin entities over the protocol engines: [`Registry`] (explicit process
//! lifecycle), [`Participant`] (factory + discovery + event thread),
//! [`DataWriter`] / [`DataReader`] (typed facades), listeners and the
//! [`WaitSet`] queue.
//!
//! # Dispatch Contract
//!
//! Listener callbacks run on the participant's internal threads (transport
//! receive callbacks or the event thread). They must return quickly and must
//! not call back into the same writer or reader. Use a [`WaitSet`] when the
//! application wants to process events on its own thread.

pub mod entity;
pub mod listener;
pub mod participant;
pub mod reader;
pub mod registry;
pub mod topic;
pub mod waitset;
pub mod writer;

pub use entity::{Enableable, StatusMask, StatusTracked};
pub use listener::{
    DataReaderListener, DataWriterListener, LivelinessChangedStatus, LivelinessLostStatus,
    OfferedDeadlineMissedStatus, OfferedIncompatibleQosStatus, PublicationMatchedStatus,
    RequestedDeadlineMissedStatus, RequestedIncompatibleQosStatus, SampleLostStatus,
    SubscriptionMatchedStatus,
};
pub use participant::{Participant, ParticipantBuilder, ParticipantLocators};
pub use reader::{DataReader, InstanceState, Sample, SampleInfo, SampleState};
pub use registry::{DomainId, Registry};
pub use topic::{RawBytes, TopicType};
pub use waitset::{Condition, ConditionId, GuardCondition, StatusCondition, WaitSet};
pub use writer::DataWriter;

/// Crate-wide error type.
///
/// Variants follow the DDS return-code taxonomy. Transient network loss never
/// shows up here in reliable mode; it is repaired by the protocol engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Resource / lifecycle
    // ========================================================================
    /// History or payload pool exhausted (after `max_blocking_time` for KEEP_ALL writers).
    ResourceLimitExceeded(String),
    /// Operation issued against an entity in the wrong lifecycle state.
    PreconditionNotMet(String),
    /// Entity has not been enabled yet.
    NotEnabled,
    /// Entity (or its registry) was already deleted / shut down.
    AlreadyDeleted,
    /// Blocking operation timed out.
    Timeout,

    // ========================================================================
    // QoS / parameters
    // ========================================================================
    /// Malformed value (bad QoS value, invalid locator, bad domain id).
    BadParameter(String),
    /// QoS combination is internally inconsistent.
    InconsistentPolicy(String),
    /// Immutable QoS policy changed after the entity was enabled.
    ImmutablePolicy(String),

    // ========================================================================
    // Remote state
    // ========================================================================
    /// Remote entity lease expired and its matching was torn down.
    NotAlive,

    // ========================================================================
    // Collaborators
    // ========================================================================
    /// Transport reported a failure.
    Transport(String),
    /// Sample (de)serialization failed.
    Serialization(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            Error::PreconditionNotMet(msg) => write!(f, "Precondition not met: {}", msg),
            Error::NotEnabled => write!(f, "Entity not enabled"),
            Error::AlreadyDeleted => write!(f, "Entity already deleted"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            Error::InconsistentPolicy(msg) => write!(f, "Inconsistent QoS policy: {}", msg),
            Error::ImmutablePolicy(msg) => write!(f, "Immutable QoS policy: {}", msg),
            Error::NotAlive => write!(f, "Remote entity is not alive"),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;
