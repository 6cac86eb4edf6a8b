// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport seam for RTPS communication.
//!
//! The engines never touch sockets: they build datagrams with
//! [`MessageBuilder`] and hand them to an [`RtpsSender`], which fans them out
//! over a [`Transport`]. Reception is a callback into a [`ReceiverResource`].
//!
//! # Modules
//!
//! - `inproc` - in-process network (delivery threads over crossbeam channels)
//!   used by the tests and for intra-process communication

pub mod inproc;

use std::sync::Arc;

use crate::config::VENDOR_ID;
use crate::core::{GuidPrefix, Locator};
use crate::dds::Result;
use crate::protocol::MessageBuilder;

pub use inproc::{DropPolicy, InProcessNetwork, InProcessTransport, NetworkStats};

/// Byte-pushing collaborator (UDP, TCP, SHM, in-process).
pub trait Transport: Send + Sync {
    /// Send one datagram.
    fn send(&self, dest: &Locator, bytes: &[u8]) -> Result<()>;

    /// Prepare to send to `dest` (socket creation, route lookup).
    fn open_output_channel(&self, dest: &Locator) -> Result<()>;

    /// Start delivering datagrams addressed to `locator` to `receiver`.
    fn open_input_channel(&self, locator: &Locator, receiver: Arc<dyn ReceiverResource>)
        -> Result<()>;

    /// Stop delivering datagrams for `locator`.
    fn close_input_channel(&self, _locator: &Locator) {}
}

/// Reception callback, invoked on a transport thread.
pub trait ReceiverResource: Send + Sync {
    fn on_data_received(&self, source: &Locator, bytes: &[u8]);
}

/// Outgoing side shared by every engine of one participant.
pub struct RtpsSender {
    transport: Arc<dyn Transport>,
    prefix: GuidPrefix,
}

impl RtpsSender {
    pub fn new(transport: Arc<dyn Transport>, prefix: GuidPrefix) -> Self {
        Self { transport, prefix }
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.prefix
    }

    /// Fresh datagram carrying this participant's header.
    pub fn builder(&self) -> MessageBuilder {
        MessageBuilder::new(self.prefix, VENDOR_ID)
    }

    /// Send `bytes` to every locator.
    ///
    /// Failures are logged and swallowed: loss on an unreliable transport is
    /// repaired by the protocol, never reported to the application.
    pub fn send_to(&self, locators: &[Locator], bytes: &[u8]) {
        for loc in locators {
            if let Err(e) = self.transport.send(loc, bytes) {
                log::debug!("[transport] send to {} failed: {}", loc, e);
            }
        }
    }

    /// Finish `builder` and send it, unless it carries no submessage.
    pub fn send_message(&self, builder: MessageBuilder, locators: &[Locator]) {
        if builder.is_empty() || locators.is_empty() {
            return;
        }
        let bytes = builder.finish();
        self.send_to(locators, &bytes);
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl std::fmt::Debug for RtpsSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpsSender").field("prefix", &self.prefix).finish()
    }
}
