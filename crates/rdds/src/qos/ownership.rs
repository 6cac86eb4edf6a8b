// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! EXCLUSIVE ownership resolution (DDS v1.4 Sec.2.2.3.9)
//!
//! A reader with EXCLUSIVE ownership accepts samples of an instance from a
//! single writer at a time: the matched writer with the highest
//! OWNERSHIP_STRENGTH. Equal strengths are broken by the smaller GUID so
//! every reader picks the same owner.
//!
//! Ownership of an instance is released when its owner is unmatched, loses
//! liveliness, or misses the requested deadline for that instance.

use std::collections::HashMap;

use crate::core::GUID;
use crate::history::InstanceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner {
    writer: GUID,
    strength: i32,
}

impl Owner {
    fn yields_to(&self, writer: &GUID, strength: i32) -> bool {
        strength > self.strength || (strength == self.strength && *writer < self.writer)
    }
}

/// Current owner per instance of one EXCLUSIVE reader.
#[derive(Debug, Default)]
pub struct OwnershipArbiter {
    owners: HashMap<Option<InstanceHandle>, Owner>,
}

impl OwnershipArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a sample of `instance` from `writer` is accepted.
    ///
    /// Claims the instance when it has no owner or `writer` outranks the
    /// current one.
    pub fn accept(&mut self, instance: Option<InstanceHandle>, writer: &GUID, strength: i32) -> bool {
        match self.owners.get_mut(&instance) {
            Some(owner) if owner.writer == *writer => {
                owner.strength = strength;
                true
            }
            Some(owner) if owner.yields_to(writer, strength) => {
                log::debug!(
                    "[ownership] {:?} taken over by {} (strength {} -> {})",
                    instance,
                    writer,
                    owner.strength,
                    strength
                );
                *owner = Owner {
                    writer: *writer,
                    strength,
                };
                true
            }
            Some(_) => false,
            None => {
                self.owners.insert(
                    instance,
                    Owner {
                        writer: *writer,
                        strength,
                    },
                );
                true
            }
        }
    }

    /// Drop every instance owned by `writer`; returns how many were released.
    pub fn release_writer(&mut self, writer: &GUID) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, owner| owner.writer != *writer);
        before - self.owners.len()
    }

    pub fn release_instance(&mut self, instance: Option<&InstanceHandle>) {
        self.owners.remove(&instance.copied());
    }

    /// OWNERSHIP_STRENGTH of `writer` changed.
    ///
    /// A lowered strength keeps the instances it owns until a stronger
    /// writer publishes.
    pub fn update_strength(&mut self, writer: &GUID, strength: i32) {
        for owner in self.owners.values_mut().filter(|o| o.writer == *writer) {
            owner.strength = strength;
        }
    }

    pub fn owner_of(&self, instance: Option<&InstanceHandle>) -> Option<GUID> {
        self.owners.get(&instance.copied()).map(|o| o.writer)
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
