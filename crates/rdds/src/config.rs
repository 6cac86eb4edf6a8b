// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RDDS configuration
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: RTPS port mapping constants and protocol defaults.
//! - **Level 2 (Dynamic)**: [`RuntimeConfig`] holding the protocol timing in
//!   an `ArcSwap` (hot-swappable, lock-free reads) plus per-topic overrides in
//!   a `DashMap`.
//!
//! ```ignore
//! let config = RuntimeConfig::new(Timing::from_env());
//! config.update_timing(|t| t.heartbeat_period = Duration::from_millis(500));
//! config.set_topic_override("sensors/imu", TopicTiming {
//!     heartbeat_period: Some(Duration::from_millis(50)),
//!     ..TopicTiming::default()
//! });
//! let hb = config.timing_for_topic("sensors/imu").heartbeat_period;
//! ```

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::core::Locator;

// =======================================================================
// RTPS Port Mapping (DDS-RTPS v2.5 Sec.9.6.1.1)
// =======================================================================

/// PB: base port.
pub const PORT_BASE: u32 = 7400;

/// DG: domain gain.
pub const DOMAIN_ID_GAIN: u32 = 250;

/// PG: participant gain.
pub const PARTICIPANT_ID_GAIN: u32 = 2;

/// d0: metatraffic multicast offset.
pub const OFFSET_D0: u32 = 0;
/// d1: metatraffic unicast offset.
pub const OFFSET_D1: u32 = 10;
/// d2: user multicast offset.
pub const OFFSET_D2: u32 = 1;
/// d3: user unicast offset.
pub const OFFSET_D3: u32 = 11;

/// Highest valid domain id (ports overflow u16 above it).
pub const MAX_DOMAIN_ID: u32 = 232;

/// Highest participant id allocated per domain on one host.
pub const MAX_PARTICIPANT_ID: u32 = 119;

/// Standard RTPS discovery multicast group.
pub const MULTICAST_IP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Vendor id stamped on outgoing RTPS headers (experimental, not OMG-registered).
pub const VENDOR_ID: [u8; 2] = [0x01, 0xAA];

/// `PB + DG * domain + d0`
pub fn spdp_multicast_port(domain_id: u32) -> u32 {
    PORT_BASE + DOMAIN_ID_GAIN * domain_id + OFFSET_D0
}

/// `PB + DG * domain + d1 + PG * participant`
pub fn metatraffic_unicast_port(domain_id: u32, participant_id: u32) -> u32 {
    PORT_BASE + DOMAIN_ID_GAIN * domain_id + OFFSET_D1 + PARTICIPANT_ID_GAIN * participant_id
}

/// `PB + DG * domain + d2`
pub fn user_multicast_port(domain_id: u32) -> u32 {
    PORT_BASE + DOMAIN_ID_GAIN * domain_id + OFFSET_D2
}

/// `PB + DG * domain + d3 + PG * participant`
pub fn user_unicast_port(domain_id: u32, participant_id: u32) -> u32 {
    PORT_BASE + DOMAIN_ID_GAIN * domain_id + OFFSET_D3 + PARTICIPANT_ID_GAIN * participant_id
}

/// Metatraffic multicast locator for a domain (SPDP destination).
pub fn spdp_multicast_locator(domain_id: u32) -> Locator {
    Locator::udpv4(MULTICAST_IP, spdp_multicast_port(domain_id))
}

// =======================================================================
// Protocol timing
// =======================================================================

/// Default heartbeat period for reliable writers.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);

/// Default participant lease duration.
pub const DEFAULT_PARTICIPANT_LEASE: Duration = Duration::from_secs(20);

/// Tunables of the reliability, liveliness and discovery protocols.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    /// Period of HEARTBEATs to readers with unacknowledged data.
    pub heartbeat_period: Duration,
    /// Upper bound of the random jitter added to each heartbeat period.
    pub heartbeat_jitter: Duration,
    /// ACKNACK replies are delayed by a random value in `[0, nack_response_delay]`.
    pub nack_response_delay: Duration,
    /// First unsolicited NACK resend delay; doubles on each retry.
    pub nack_backoff_base: Duration,
    /// Unsolicited NACK resends before waiting for the next HEARTBEAT.
    pub nack_max_retries: u32,
    /// Period of the reader's progress ACKNACK.
    pub acknack_period: Duration,
    /// SPDP announcement period.
    pub announcement_period: Duration,
    /// Fast announcements sent right after a participant starts.
    pub initial_announcements: u32,
    /// Spacing of the fast initial announcements.
    pub initial_announcement_period: Duration,
    /// How often participant and writer leases are checked.
    pub lease_check_period: Duration,
    /// Lease advertised in our own participant announcements.
    pub participant_lease: Duration,
    /// AUTOMATIC liveliness is asserted every `lease / wlp_assert_divisor`.
    pub wlp_assert_divisor: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
            heartbeat_jitter: Duration::from_millis(100),
            nack_response_delay: Duration::from_millis(5),
            nack_backoff_base: Duration::from_millis(20),
            nack_max_retries: 3,
            acknack_period: Duration::from_secs(1),
            announcement_period: Duration::from_secs(3),
            initial_announcements: 5,
            initial_announcement_period: Duration::from_millis(100),
            lease_check_period: Duration::from_secs(1),
            participant_lease: DEFAULT_PARTICIPANT_LEASE,
            wlp_assert_divisor: 2,
        }
    }
}

impl Timing {
    /// Defaults overridden by `RDDS_*` environment variables (milliseconds).
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `RDDS_HEARTBEAT_PERIOD_MS` | `heartbeat_period` |
    /// | `RDDS_NACK_RESPONSE_DELAY_MS` | `nack_response_delay` |
    /// | `RDDS_NACK_MAX_RETRIES` | `nack_max_retries` (count) |
    /// | `RDDS_ACKNACK_PERIOD_MS` | `acknack_period` |
    /// | `RDDS_ANNOUNCEMENT_PERIOD_MS` | `announcement_period` |
    /// | `RDDS_LEASE_CHECK_PERIOD_MS` | `lease_check_period` |
    /// | `RDDS_PARTICIPANT_LEASE_MS` | `participant_lease` |
    ///
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut timing = Self::default();
        let millis = |key: &str, slot: &mut Duration| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u64>() {
                    Ok(ms) => *slot = Duration::from_millis(ms),
                    Err(_) => log::warn!("[config] ignoring {}={:?}: not a millisecond count", key, raw),
                }
            }
        };
        millis("RDDS_HEARTBEAT_PERIOD_MS", &mut timing.heartbeat_period);
        millis("RDDS_NACK_RESPONSE_DELAY_MS", &mut timing.nack_response_delay);
        millis("RDDS_ACKNACK_PERIOD_MS", &mut timing.acknack_period);
        millis("RDDS_ANNOUNCEMENT_PERIOD_MS", &mut timing.announcement_period);
        millis("RDDS_LEASE_CHECK_PERIOD_MS", &mut timing.lease_check_period);
        millis("RDDS_PARTICIPANT_LEASE_MS", &mut timing.participant_lease);
        if let Some(raw) = lookup("RDDS_NACK_MAX_RETRIES") {
            match raw.trim().parse::<u32>() {
                Ok(n) => timing.nack_max_retries = n,
                Err(_) => log::warn!("[config] ignoring RDDS_NACK_MAX_RETRIES={:?}", raw),
            }
        }
        timing
    }

    /// Compressed timing for tests and in-process deployments.
    pub fn fast() -> Self {
        Self {
            heartbeat_period: Duration::from_millis(50),
            heartbeat_jitter: Duration::from_millis(5),
            nack_response_delay: Duration::from_millis(2),
            nack_backoff_base: Duration::from_millis(10),
            nack_max_retries: 3,
            acknack_period: Duration::from_millis(50),
            announcement_period: Duration::from_millis(100),
            initial_announcements: 3,
            initial_announcement_period: Duration::from_millis(20),
            lease_check_period: Duration::from_millis(50),
            participant_lease: Duration::from_secs(2),
            wlp_assert_divisor: 2,
        }
    }
}

/// Per-topic overrides applied on top of the global [`Timing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopicTiming {
    pub heartbeat_period: Option<Duration>,
    pub nack_response_delay: Option<Duration>,
}

// =======================================================================
// Runtime Configuration (Dynamic, Lock-Free)
// =======================================================================

/// Shared runtime configuration.
///
/// Cloning is cheap (two `Arc` increments); every participant component
/// holds a clone and reads the current timing on each use, so a swap takes
/// effect at the next timer expiry.
#[derive(Clone)]
pub struct RuntimeConfig {
    timing: Arc<ArcSwap<Timing>>,
    topic_overrides: Arc<DashMap<Arc<str>, TopicTiming>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(Timing::default())
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn new(timing: Timing) -> Self {
        Self {
            timing: Arc::new(ArcSwap::from_pointee(timing)),
            topic_overrides: Arc::new(DashMap::new()),
        }
    }

    /// Current global timing (atomic load).
    #[inline]
    #[must_use]
    pub fn timing(&self) -> Arc<Timing> {
        self.timing.load_full()
    }

    /// Replace the global timing.
    pub fn set_timing(&self, timing: Timing) {
        log::debug!("[config] timing replaced: {:?}", timing);
        self.timing.store(Arc::new(timing));
    }

    /// Read-copy-update of the global timing.
    pub fn update_timing(&self, f: impl Fn(&mut Timing)) {
        self.timing.rcu(|current| {
            let mut next = Timing::clone(current);
            f(&mut next);
            next
        });
    }

    pub fn set_topic_override(&self, topic: &str, overrides: TopicTiming) {
        self.topic_overrides.insert(Arc::from(topic), overrides);
    }

    pub fn clear_topic_override(&self, topic: &str) -> bool {
        self.topic_overrides.remove(topic).is_some()
    }

    /// Global timing with the overrides registered for `topic` applied.
    #[must_use]
    pub fn timing_for_topic(&self, topic: &str) -> Timing {
        let mut timing = Timing::clone(&self.timing.load());
        if let Some(o) = self.topic_overrides.get(topic) {
            if let Some(hb) = o.heartbeat_period {
                timing.heartbeat_period = hb;
            }
            if let Some(delay) = o.nack_response_delay {
                timing.nack_response_delay = delay;
            }
        }
        timing
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("timing", &*self.timing.load())
            .field("topic_overrides", &self.topic_overrides.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_port_mapping_formula() {
        assert_eq!(spdp_multicast_port(0), 7400);
        assert_eq!(metatraffic_unicast_port(0, 0), 7410);
        assert_eq!(user_unicast_port(0, 1), 7413);
        assert_eq!(spdp_multicast_port(1), 7650);
        assert_eq!(user_multicast_port(0), 7401);
    }

    #[test]
    fn test_from_lookup_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("RDDS_HEARTBEAT_PERIOD_MS", "250"),
            ("RDDS_NACK_MAX_RETRIES", "7"),
            ("RDDS_PARTICIPANT_LEASE_MS", "soon"),
        ]
        .into_iter()
        .collect();
        let timing = Timing::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(timing.heartbeat_period, Duration::from_millis(250));
        assert_eq!(timing.nack_max_retries, 7);
        assert_eq!(timing.participant_lease, DEFAULT_PARTICIPANT_LEASE);
    }

    #[test]
    fn test_hot_swap_visible_to_clones() {
        let config = RuntimeConfig::default();
        let clone = config.clone();
        config.update_timing(|t| t.heartbeat_period = Duration::from_millis(10));
        assert_eq!(clone.timing().heartbeat_period, Duration::from_millis(10));
    }

    #[test]
    fn test_topic_override() {
        let config = RuntimeConfig::default();
        config.set_topic_override(
            "fast",
            TopicTiming {
                heartbeat_period: Some(Duration::from_millis(20)),
                ..TopicTiming::default()
            },
        );
        assert_eq!(config.timing_for_topic("fast").heartbeat_period, Duration::from_millis(20));
        assert_eq!(config.timing_for_topic("slow").heartbeat_period, DEFAULT_HEARTBEAT_PERIOD);
        assert!(config.clear_topic_override("fast"));
        assert!(!config.clear_topic_override("fast"));
    }
}
