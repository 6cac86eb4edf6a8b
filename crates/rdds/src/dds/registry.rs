// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant registry
//!
//! The registry is the explicit context every participant is created in.
//! There is no process-wide singleton: applications (and tests) create as
//! many registries as they want, each with its own participants, type
//! table and default in-process network.
//!
//! # Architecture
//!
//! ```text
//! Registry
//! +-- state: Uninitialized -> Running -> ShutDown
//! +-- participants: DashMap<GuidPrefix, (DomainId, Arc<Participant>)>
//! +-- types: DashMap<type name, std::any::TypeId>
//! +-- network: Arc<InProcessNetwork>   (default transport fabric)
//! +-- config: RuntimeConfig            (default timing for new participants)
//! ```
//!
//! # Lifecycle
//!
//! 1. `Registry::new()` -> `init()`
//! 2. `Participant::builder(&registry)...build()` registers the participant
//! 3. `Participant::delete()` unregisters it
//! 4. `shutdown()` deletes every remaining participant; further creation
//!    fails with `AlreadyDeleted`

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::participant::{Participant, ParticipantBuilder};
use super::topic::TopicType;
use super::{Error, Result};
use crate::config::{RuntimeConfig, Timing};
use crate::core::GuidPrefix;
use crate::transport::InProcessNetwork;

/// Domain ID type (0-232)
pub type DomainId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryState {
    Uninitialized,
    Running,
    ShutDown,
}

pub struct Registry {
    state: Mutex<RegistryState>,
    participants: DashMap<GuidPrefix, (DomainId, Arc<Participant>)>,
    types: DashMap<&'static str, TypeId>,
    network: Arc<InProcessNetwork>,
    config: RuntimeConfig,
}

impl Registry {
    /// Uninitialized registry with timing read from the environment.
    pub fn new() -> Arc<Self> {
        Self::with_config(RuntimeConfig::new(Timing::from_env()))
    }

    pub fn with_config(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::Uninitialized),
            participants: DashMap::new(),
            types: DashMap::new(),
            network: InProcessNetwork::new(),
            config,
        })
    }

    /// Allow participant creation. Idempotent while running.
    ///
    /// # Errors
    /// `AlreadyDeleted` after [`Registry::shutdown`].
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            RegistryState::ShutDown => Err(Error::AlreadyDeleted),
            RegistryState::Running => Ok(()),
            RegistryState::Uninitialized => {
                *state = RegistryState::Running;
                log::debug!("[REGISTRY] initialized");
                Ok(())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == RegistryState::Running
    }

    /// Delete every participant and refuse new ones.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == RegistryState::ShutDown {
                return;
            }
            *state = RegistryState::ShutDown;
        }
        // Collected first: deleting a participant removes it from the map.
        let participants: Vec<Arc<Participant>> =
            self.participants.iter().map(|e| Arc::clone(&e.value().1)).collect();
        log::info!("[REGISTRY] shutting down {} participant(s)", participants.len());
        for participant in participants {
            participant.delete();
        }
        self.participants.clear();
    }

    /// Shorthand for `Participant::builder(self)`.
    pub fn participant_builder(self: &Arc<Self>) -> ParticipantBuilder {
        Participant::builder(self)
    }

    /// Fabric used by participants that were not given a transport.
    pub fn network(&self) -> &Arc<InProcessNetwork> {
        &self.network
    }

    /// Default timing for new participants.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Record `T` under its type name.
    ///
    /// # Errors
    /// `BadParameter` if another Rust type already claimed the name.
    pub fn register_type<T: TopicType>(&self) -> Result<()> {
        let name = T::type_name();
        let id = TypeId::of::<T>();
        let existing = *self.types.entry(name).or_insert(id);
        if existing != id {
            return Err(Error::BadParameter(format!(
                "type name '{}' already registered by another type",
                name
            )));
        }
        Ok(())
    }

    pub fn is_type_registered(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Live participants of `domain`.
    pub fn participants(&self, domain: DomainId) -> Vec<Arc<Participant>> {
        self.participants
            .iter()
            .filter(|e| e.value().0 == domain)
            .map(|e| Arc::clone(&e.value().1))
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Fails unless participants may be created right now.
    pub(crate) fn check_running(&self) -> Result<()> {
        match *self.state.lock() {
            RegistryState::Running => Ok(()),
            RegistryState::Uninitialized => {
                Err(Error::PreconditionNotMet("registry not initialized".into()))
            }
            RegistryState::ShutDown => Err(Error::AlreadyDeleted),
        }
    }

    pub(crate) fn add(&self, participant: Arc<Participant>) -> Result<()> {
        // Held across the insert so a concurrent shutdown cannot miss it.
        let state = self.state.lock();
        if *state != RegistryState::Running {
            return Err(Error::AlreadyDeleted);
        }
        self.participants
            .insert(participant.guid_prefix(), (participant.domain_id(), participant));
        Ok(())
    }

    pub(crate) fn remove(&self, prefix: &GuidPrefix) {
        self.participants.remove(prefix);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("state", &*self.state.lock())
            .field("participants", &self.participants.len())
            .field("types", &self.types.len())
            .finish()
    }
}
