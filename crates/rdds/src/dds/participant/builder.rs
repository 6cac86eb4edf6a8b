// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant builder pattern implementation.
//!
//! The builder configures:
//! - domain ID and (optionally) participant ID
//! - transport: an explicit [`Transport`], another [`InProcessNetwork`], or
//!   the registry's default network
//! - timing, initial peers and external locators

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::receiver::Receiver;
use super::{Participant, ParticipantLocators};
use crate::config::{
    metatraffic_unicast_port, spdp_multicast_locator, user_unicast_port, RuntimeConfig, Timing,
    MAX_DOMAIN_ID, MAX_PARTICIPANT_ID, VENDOR_ID,
};
use crate::core::{
    EventThread, ExternalLocator, ExternalLocatorPolicy, GuidPrefix, Locator, PayloadPool,
};
use crate::dds::registry::Registry;
use crate::dds::{Error, Result};
use crate::discovery::{Discovery, ParticipantProxyData};
use crate::liveliness::{LivelinessCallback, LivelinessManager, LivelinessTransition};
use crate::transport::{InProcessNetwork, ReceiverResource, RtpsSender, Transport};

const DEFAULT_PAYLOAD_BUFFERS: usize = 4096;

/// Builder for configuring and creating a [`Participant`].
pub struct ParticipantBuilder {
    registry: Arc<Registry>,
    name: String,
    domain_id: u32,
    participant_id: Option<u32>,
    host: Ipv4Addr,
    transport: Option<Arc<dyn Transport>>,
    network: Option<Arc<InProcessNetwork>>,
    config: Option<RuntimeConfig>,
    initial_peers: Vec<Locator>,
    external_locators: Vec<ExternalLocator>,
    locator_policy: ExternalLocatorPolicy,
    autoenable: bool,
    payload_buffers: usize,
}

impl ParticipantBuilder {
    pub(super) fn new(registry: &Arc<Registry>) -> Self {
        Self {
            registry: Arc::clone(registry),
            name: String::from("rdds"),
            domain_id: 0,
            participant_id: None,
            host: Ipv4Addr::LOCALHOST,
            transport: None,
            network: None,
            config: None,
            initial_peers: Vec::new(),
            external_locators: Vec::new(),
            locator_policy: ExternalLocatorPolicy::default(),
            autoenable: true,
            payload_buffers: DEFAULT_PAYLOAD_BUFFERS,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Use exactly this participant id instead of the first free one.
    pub fn participant_id(mut self, participant_id: u32) -> Self {
        self.participant_id = Some(participant_id);
        self
    }

    /// Address the participant's locators are built on (default 127.0.0.1).
    pub fn host(mut self, host: Ipv4Addr) -> Self {
        self.host = host;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Join another in-process network than the registry's.
    pub fn network(mut self, network: Arc<InProcessNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn timing(self, timing: Timing) -> Self {
        self.config(RuntimeConfig::new(timing))
    }

    /// Metatraffic unicast locator SPDP announcements are also sent to.
    pub fn initial_peer(mut self, locator: Locator) -> Self {
        self.initial_peers.push(locator);
        self
    }

    pub fn external_locator(mut self, locator: ExternalLocator) -> Self {
        self.external_locators.push(locator);
        self
    }

    pub fn external_locator_policy(mut self, policy: ExternalLocatorPolicy) -> Self {
        self.locator_policy = policy;
        self
    }

    /// Create entities disabled; they must be enabled explicitly.
    pub fn autoenable(mut self, autoenable: bool) -> Self {
        self.autoenable = autoenable;
        self
    }

    pub fn payload_buffers(mut self, buffers: usize) -> Self {
        self.payload_buffers = buffers;
        self
    }

    /// Open the transport channels, start discovery and register the
    /// participant.
    ///
    /// # Errors
    /// - `PreconditionNotMet` before `Registry::init`, `AlreadyDeleted`
    ///   after `Registry::shutdown`.
    /// - `BadParameter` for a domain or participant id out of range.
    /// - `ResourceLimitExceeded` when every participant id is taken,
    ///   `Transport` when the requested one is.
    pub fn build(self) -> Result<Arc<Participant>> {
        let domain_id = self.domain_id;
        self.try_build().map_err(|e| {
            log::warn!("[PARTICIPANT] creation on domain {} failed: {}", domain_id, e);
            e
        })
    }

    fn try_build(self) -> Result<Arc<Participant>> {
        crate::trace_fn!("ParticipantBuilder::build");
        self.registry.check_running()?;
        if self.domain_id > MAX_DOMAIN_ID {
            return Err(Error::BadParameter(format!(
                "domain id {} exceeds {}",
                self.domain_id, MAX_DOMAIN_ID
            )));
        }
        if self.participant_id.is_some_and(|id| id > MAX_PARTICIPANT_ID) {
            return Err(Error::BadParameter(format!(
                "participant id exceeds {}",
                MAX_PARTICIPANT_ID
            )));
        }

        let config = Arc::new(
            self.config
                .clone()
                .unwrap_or_else(|| self.registry.config().clone()),
        );
        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => {
                let network = self
                    .network
                    .clone()
                    .unwrap_or_else(|| Arc::clone(self.registry.network()));
                network.transport(Locator::udpv4(self.host, 0))
            }
        };

        let receiver = Arc::new(Receiver::default());
        let (participant_id, locators) = self.open_locators(&transport, &receiver)?;
        let events = match EventThread::spawn(&format!("rdds-d{}-p{}", self.domain_id, participant_id)) {
            Ok(events) => events,
            Err(e) => {
                for locator in locators.all() {
                    transport.close_input_channel(&locator);
                }
                return Err(e);
            }
        };

        let prefix = GuidPrefix::generate(VENDOR_ID);
        let timing = config.timing();
        let sender = Arc::new(RtpsSender::new(Arc::clone(&transport), prefix));

        let mut local = ParticipantProxyData::new(prefix, self.domain_id);
        local.metatraffic_unicast = vec![locators.metatraffic_unicast];
        local.metatraffic_multicast = vec![locators.metatraffic_multicast];
        local.default_unicast = vec![locators.default_unicast];
        local.lease_duration = timing.participant_lease;
        local.entity_name = Some(self.name.clone());

        let mut spdp_targets = vec![locators.metatraffic_multicast];
        spdp_targets.extend(self.initial_peers.iter().copied());

        let participant = Arc::new_cyclic(|weak: &Weak<Participant>| {
            let on_local = weak.clone();
            let local_callback: LivelinessCallback = Arc::new(move |t: LivelinessTransition| {
                if let Some(participant) = on_local.upgrade() {
                    participant.on_local_liveliness(t);
                }
            });
            let on_remote = weak.clone();
            let remote_callback: LivelinessCallback = Arc::new(move |t: LivelinessTransition| {
                if let Some(participant) = on_remote.upgrade() {
                    participant.on_remote_liveliness(t);
                }
            });
            let local_liveliness = Arc::new(LivelinessManager::new(Some(local_callback), false));
            let remote_liveliness = Arc::new(LivelinessManager::new(Some(remote_callback), true));

            let discovery = Discovery::new(
                local,
                Arc::clone(&sender),
                Arc::clone(&config),
                spdp_targets,
                Arc::clone(&remote_liveliness),
            );
            discovery.set_external_locators(self.external_locators.clone(), self.locator_policy);

            Participant {
                name: self.name.clone(),
                domain_id: self.domain_id,
                participant_id,
                prefix,
                registry: Arc::downgrade(&self.registry),
                config: Arc::clone(&config),
                sender,
                locators,
                events,
                discovery,
                local_liveliness,
                remote_liveliness,
                pool: PayloadPool::new(self.payload_buffers),
                writers: DashMap::new(),
                readers: DashMap::new(),
                topics: DashMap::new(),
                next_entity: AtomicU32::new(1),
                autoenable: self.autoenable,
                closed: AtomicBool::new(false),
            }
        });

        receiver.bind(&participant);
        participant.discovery.attach_timers(&participant.events);
        participant.local_liveliness.attach_timer(&participant.events);
        participant.remote_liveliness.attach_timer(&participant.events);

        if let Err(e) = self.registry.add(Arc::clone(&participant)) {
            participant.delete();
            return Err(e);
        }
        log::info!(
            "[PARTICIPANT] {} joined domain {} as participant {} ({})",
            prefix,
            self.domain_id,
            participant_id,
            locators.metatraffic_unicast
        );
        Ok(participant)
    }

    /// Open metatraffic unicast, user unicast and SPDP multicast on the first
    /// usable participant id.
    fn open_locators(
        &self,
        transport: &Arc<dyn Transport>,
        receiver: &Arc<Receiver>,
    ) -> Result<(u32, ParticipantLocators)> {
        let candidates: Vec<u32> = match self.participant_id {
            Some(id) => vec![id],
            None => (0..=MAX_PARTICIPANT_ID).collect(),
        };
        let resource: Arc<dyn ReceiverResource> = Arc::clone(receiver) as Arc<dyn ReceiverResource>;

        for id in candidates {
            let locators = ParticipantLocators {
                metatraffic_unicast: Locator::udpv4(self.host, metatraffic_unicast_port(self.domain_id, id)),
                metatraffic_multicast: spdp_multicast_locator(self.domain_id),
                default_unicast: Locator::udpv4(self.host, user_unicast_port(self.domain_id, id)),
            };
            match open_all(transport, &resource, &locators) {
                Ok(()) => return Ok((id, locators)),
                Err(Error::Transport(msg)) if self.participant_id.is_none() => {
                    log::trace!("[PARTICIPANT] participant id {} unavailable: {}", id, msg);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::ResourceLimitExceeded(format!(
            "no free participant id on domain {}",
            self.domain_id
        )))
    }
}

/// Open every locator, closing the ones already opened on failure.
fn open_all(
    transport: &Arc<dyn Transport>,
    receiver: &Arc<dyn ReceiverResource>,
    locators: &ParticipantLocators,
) -> Result<()> {
    let mut opened = Vec::with_capacity(3);
    for locator in [
        locators.metatraffic_unicast,
        locators.default_unicast,
        locators.metatraffic_multicast,
    ] {
        if let Err(e) = transport.open_input_channel(&locator, Arc::clone(receiver)) {
            for done in &opened {
                transport.close_input_channel(done);
            }
            return Err(e);
        }
        opened.push(locator);
    }
    Ok(())
}
