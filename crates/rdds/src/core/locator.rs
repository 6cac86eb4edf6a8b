// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locators and external-locator selection
//!
//! The core treats a locator as an opaque `(kind, address, port)` tuple; only
//! the transport interprets it.
//!
//! # External Locators
//!
//! A participant behind NAT or inside a container can advertise extra
//! "external" locators tagged with an externality level (0 = same host,
//! higher = further away), a cost, and a network mask. When deciding which
//! remote locators to use, [`filter_remote_locators`] keeps only remote
//! locators reachable through one of our external networks, ranked by
//! [`ExternalLocatorPolicy`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const LOCATOR_KIND_INVALID: i32 = -1;
pub const LOCATOR_KIND_UDPV4: i32 = 1;
pub const LOCATOR_KIND_UDPV6: i32 = 2;
pub const LOCATOR_KIND_TCPV4: i32 = 4;
pub const LOCATOR_KIND_SHM: i32 = 16;

/// Wire size of a serialized locator: kind(4) + port(4) + address(16).
pub const LOCATOR_WIRE_SIZE: usize = 24;

/// RTPS locator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
    /// Locator kind (1 = UDPv4, 2 = UDPv6, ...)
    pub kind: i32,
    /// Port number
    pub port: u32,
    /// IPv4 (last 4 bytes) or IPv6 address
    pub address: [u8; 16],
}

impl Locator {
    pub const INVALID: Locator = Locator {
        kind: LOCATOR_KIND_INVALID,
        port: 0,
        address: [0; 16],
    };

    pub fn udpv4(ip: Ipv4Addr, port: u32) -> Self {
        let mut address = [0u8; 16];
        address[12..16].copy_from_slice(&ip.octets());
        Self {
            kind: LOCATOR_KIND_UDPV4,
            port,
            address,
        }
    }

    pub fn udpv6(ip: Ipv6Addr, port: u32) -> Self {
        Self {
            kind: LOCATOR_KIND_UDPV6,
            port,
            address: ip.octets(),
        }
    }

    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ip) => Self::udpv4(ip, u32::from(addr.port())),
            IpAddr::V6(ip) => Self::udpv6(ip, u32::from(addr.port())),
        }
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        match self.kind {
            LOCATOR_KIND_UDPV4 | LOCATOR_KIND_TCPV4 => {
                let a = &self.address;
                Some(SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::new(a[12], a[13], a[14], a[15])),
                    port,
                ))
            }
            LOCATOR_KIND_UDPV6 => Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.address)), port)),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind != LOCATOR_KIND_INVALID && self.port != 0
    }

    pub fn is_multicast(&self) -> bool {
        match self.kind {
            LOCATOR_KIND_UDPV4 => (224..=239).contains(&self.address[12]),
            LOCATOR_KIND_UDPV6 => self.address[0] == 0xff,
            _ => false,
        }
    }

    /// True when `self` and `other` share the first `mask` address bits.
    ///
    /// For IPv4 the mask counts from the start of the 4-byte address.
    pub fn same_network(&self, other: &Locator, mask: u8) -> bool {
        if self.kind != other.kind {
            return false;
        }
        let (a, b) = if self.kind == LOCATOR_KIND_UDPV4 {
            (&self.address[12..16], &other.address[12..16])
        } else {
            (&self.address[..], &other.address[..])
        };
        let mut bits = usize::from(mask).min(a.len() * 8);
        for (x, y) in a.iter().zip(b.iter()) {
            if bits == 0 {
                return true;
            }
            let take = bits.min(8);
            let m: u8 = 0xffu8 << (8 - take);
            if (x & m) != (y & m) {
                return false;
            }
            bits -= take;
        }
        true
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "{}:{}", kind_name(self.kind), addr),
            None => write!(f, "{}:[{:02x?}]:{}", kind_name(self.kind), self.address, self.port),
        }
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", self)
    }
}

fn kind_name(kind: i32) -> &'static str {
    match kind {
        LOCATOR_KIND_UDPV4 => "UDPv4",
        LOCATOR_KIND_UDPV6 => "UDPv6",
        LOCATOR_KIND_TCPV4 => "TCPv4",
        LOCATOR_KIND_SHM => "SHM",
        _ => "INVALID",
    }
}

// ============================================================================
// External locators
// ============================================================================

/// Locator advertised for peers outside the local network scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalLocator {
    pub locator: Locator,
    /// Network mask in bits used to decide reachability.
    pub mask: u8,
    /// 0 = same host, grows with network distance.
    pub externality: u8,
    /// Relative cost of using this path; lower is preferred.
    pub cost: u8,
}

/// Ranking weights applied to `(externality, cost)` pairs.
///
/// `score = externality * externality_weight - cost * cost_weight`; the
/// highest score wins and equal scores are all kept in their original order.
/// With the default weights externality dominates and cost breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalLocatorPolicy {
    pub externality_weight: i32,
    pub cost_weight: i32,
}

impl Default for ExternalLocatorPolicy {
    fn default() -> Self {
        Self {
            externality_weight: 256,
            cost_weight: 1,
        }
    }
}

impl ExternalLocatorPolicy {
    fn score(&self, ext: &ExternalLocator) -> i32 {
        i32::from(ext.externality) * self.externality_weight - i32::from(ext.cost) * self.cost_weight
    }
}

/// Select the remote locators to use given our own external locators.
///
/// - No local external locators: remote list is returned unchanged.
/// - Otherwise, each remote locator is scored by the best local external
///   locator sharing its network; only the best-scored remote locators are
///   kept.
/// - If no remote locator is reachable through an external network, the
///   remote list is returned unchanged (plain LAN behavior).
pub fn filter_remote_locators(
    remote: &[Locator],
    local_external: &[ExternalLocator],
    policy: &ExternalLocatorPolicy,
) -> Vec<Locator> {
    if local_external.is_empty() {
        return remote.to_vec();
    }

    let scored: Vec<(Locator, Option<i32>)> = remote
        .iter()
        .map(|loc| {
            let best = local_external
                .iter()
                .filter(|ext| ext.locator.same_network(loc, ext.mask))
                .map(|ext| policy.score(ext))
                .max();
            (*loc, best)
        })
        .collect();

    let Some(top) = scored.iter().filter_map(|(_, s)| *s).max() else {
        return remote.to_vec();
    };

    scored
        .into_iter()
        .filter(|(_, s)| *s == Some(top))
        .map(|(loc, _)| loc)
        .collect()
}
