// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Quality of Service policies
//!
//! [`QoS`] is a flat value struct: every writer and reader carries one
//! instance. Only the policies the delivery and discovery engines act on are
//! modelled here.
//!
//! # Mutability
//!
//! | Policy | Changeable after enable |
//! |--------|-------------------------|
//! | reliability, durability, history, resource_limits | no |
//! | liveliness, ownership kind, destination_order | no |
//! | deadline, partition, ownership strength, lifespan | yes |

pub mod deadline;
pub mod liveliness;
pub mod ownership;
pub mod partition;
pub mod policies;

use std::time::Duration;

pub use deadline::DeadlineTracker;
pub use liveliness::{Liveliness, LivelinessKind};
pub use ownership::OwnershipArbiter;
pub use partition::Partition;
pub use policies::{
    Deadline, DestinationOrder, Durability, History, Lifespan, Ownership, OwnershipKind,
    Reliability, ReliabilityKind, ResourceLimits, LENGTH_UNLIMITED,
};

use crate::dds::{Error, Result};

/// Complete QoS carried by one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QoS {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
    pub resource_limits: ResourceLimits,
    pub deadline: Deadline,
    pub liveliness: Liveliness,
    pub ownership: Ownership,
    pub partition: Partition,
    pub destination_order: DestinationOrder,
    pub lifespan: Lifespan,
}

impl Default for QoS {
    fn default() -> Self {
        Self::best_effort()
    }
}

impl QoS {
    /// BEST_EFFORT, VOLATILE, KEEP_LAST(100).
    pub fn best_effort() -> Self {
        Self {
            reliability: Reliability::best_effort(),
            durability: Durability::Volatile,
            history: History::KeepLast(100),
            resource_limits: ResourceLimits::default(),
            deadline: Deadline::default(),
            liveliness: Liveliness::default(),
            ownership: Ownership::default(),
            partition: Partition::default(),
            destination_order: DestinationOrder::default(),
            lifespan: Lifespan::default(),
        }
    }

    /// RELIABLE, VOLATILE, KEEP_LAST(100).
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::reliable(),
            ..Self::best_effort()
        }
    }

    #[must_use]
    pub fn keep_last(mut self, depth: u32) -> Self {
        self.history = History::KeepLast(depth);
        self
    }

    #[must_use]
    pub fn keep_all(mut self) -> Self {
        self.history = History::KeepAll;
        self
    }

    #[must_use]
    pub fn transient_local(mut self) -> Self {
        self.durability = Durability::TransientLocal;
        self
    }

    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.durability = Durability::Volatile;
        self
    }

    #[must_use]
    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.resource_limits.max_samples = max_samples;
        self
    }

    #[must_use]
    pub fn max_instances(mut self, max_instances: usize) -> Self {
        self.resource_limits.max_instances = max_instances;
        self
    }

    #[must_use]
    pub fn max_samples_per_instance(mut self, max_samples_per_instance: usize) -> Self {
        self.resource_limits.max_samples_per_instance = max_samples_per_instance;
        self
    }

    #[must_use]
    pub fn max_blocking_time(mut self, d: Duration) -> Self {
        self.reliability.max_blocking_time = d;
        self
    }

    #[must_use]
    pub fn deadline(mut self, period: Duration) -> Self {
        self.deadline = Deadline::new(period);
        self
    }

    #[must_use]
    pub fn lifespan(mut self, duration: Duration) -> Self {
        self.lifespan = Lifespan::new(duration);
        self
    }

    #[must_use]
    pub fn liveliness(mut self, liveliness: Liveliness) -> Self {
        self.liveliness = liveliness;
        self
    }

    #[must_use]
    pub fn ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    #[must_use]
    pub fn partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    #[must_use]
    pub fn destination_order(mut self, order: DestinationOrder) -> Self {
        self.destination_order = order;
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability.is_reliable()
    }

    /// Per-instance sample bound implied by HISTORY and RESOURCE_LIMITS.
    pub fn per_instance_limit(&self) -> usize {
        match self.history {
            History::KeepLast(depth) => depth as usize,
            History::KeepAll => self.resource_limits.max_samples_per_instance,
        }
    }

    /// Check values and policy combinations.
    ///
    /// # Errors
    /// - `BadParameter` for zero depth, limits, periods or lifespan.
    /// - `InconsistentPolicy` when HISTORY depth exceeds RESOURCE_LIMITS, or
    ///   `max_samples < max_samples_per_instance`.
    pub fn validate(&self) -> Result<()> {
        if let History::KeepLast(0) = self.history {
            return Err(Error::BadParameter("HISTORY depth must be > 0".into()));
        }
        let limits = &self.resource_limits;
        if limits.max_samples == 0 || limits.max_instances == 0 || limits.max_samples_per_instance == 0 {
            return Err(Error::BadParameter(
                "RESOURCE_LIMITS values must be > 0 (or unlimited)".into(),
            ));
        }
        if self.deadline.period.is_zero() {
            return Err(Error::BadParameter("DEADLINE period must be > 0".into()));
        }
        if self.lifespan.duration.is_zero() {
            return Err(Error::BadParameter("LIFESPAN duration must be > 0".into()));
        }
        if self.liveliness.lease_duration.is_zero() {
            return Err(Error::BadParameter("LIVELINESS lease_duration must be > 0".into()));
        }

        if let History::KeepLast(depth) = self.history {
            if limits.max_samples_per_instance != LENGTH_UNLIMITED
                && depth as usize > limits.max_samples_per_instance
            {
                return Err(Error::InconsistentPolicy(format!(
                    "HISTORY depth {} > RESOURCE_LIMITS max_samples_per_instance {}",
                    depth, limits.max_samples_per_instance
                )));
            }
        }
        if limits.max_samples_per_instance != LENGTH_UNLIMITED
            && limits.max_samples < limits.max_samples_per_instance
        {
            return Err(Error::InconsistentPolicy(format!(
                "RESOURCE_LIMITS max_samples {} < max_samples_per_instance {}",
                limits.max_samples, limits.max_samples_per_instance
            )));
        }
        Ok(())
    }

    /// Validate a `set_qos` request against the currently enabled QoS.
    ///
    /// # Errors
    /// `ImmutablePolicy` naming the first immutable policy that differs, or
    /// whatever [`QoS::validate`] reports for the new value.
    pub fn check_update(&self, new: &QoS) -> Result<()> {
        let immutable = [
            ("RELIABILITY", self.reliability.kind != new.reliability.kind),
            ("DURABILITY", self.durability != new.durability),
            ("HISTORY", self.history != new.history),
            ("RESOURCE_LIMITS", self.resource_limits != new.resource_limits),
            ("LIVELINESS", self.liveliness != new.liveliness),
            ("OWNERSHIP", self.ownership.kind != new.ownership.kind),
            ("DESTINATION_ORDER", self.destination_order != new.destination_order),
        ];
        if let Some((name, _)) = immutable.iter().find(|(_, changed)| *changed) {
            return Err(Error::ImmutablePolicy((*name).to_string()));
        }
        new.validate()
    }
}
