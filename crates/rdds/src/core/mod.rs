// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core building blocks shared by the protocol engines.

pub mod guid;
pub mod locator;
pub mod payload;
pub mod time;
pub mod timer;

pub use guid::{EntityId, GuidPrefix, GUID};
pub use locator::{
    filter_remote_locators, ExternalLocator, ExternalLocatorPolicy, Locator, LOCATOR_KIND_UDPV4,
    LOCATOR_KIND_UDPV6,
};
pub use payload::{Payload, PayloadPool};
pub use time::{Time, DURATION_INFINITE};
pub use timer::{EventThread, TimerAction, TimerHandle};
