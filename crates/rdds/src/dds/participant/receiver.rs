// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram demultiplexing.
//!
//! ```text
//! bytes -> RtpsMessage::parse
//!   INFO_DST   other prefix: skip until the next INFO_DST
//!   INFO_TS    source timestamp for the following DATA / DATA_FRAG
//!   DATA       SPDP writer -> Discovery::on_spdp
//!              otherwise   -> built-in or user ReaderEngine(s)
//!   DATA_FRAG  -> ReaderEngine(s), reassembled there
//!   HEARTBEAT  -> ReaderEngine(s)
//!   GAP        -> ReaderEngine(s)
//!   ACKNACK    -> WriterEngine
//!   NACK_FRAG  -> WriterEngine
//! ```
//!
//! A reader id of ENTITYID_UNKNOWN reaches every user reader; engines drop
//! traffic from writers they are not matched with.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::Participant;
use crate::core::{EntityId, Locator};
use crate::protocol::{RtpsMessage, Submessage};
use crate::transport::ReceiverResource;

/// Transport callback of one participant. Bound after construction; any
/// datagram arriving before that (or after drop) is discarded.
#[derive(Default)]
pub(super) struct Receiver {
    participant: RwLock<Weak<Participant>>,
}

impl Receiver {
    pub(super) fn bind(&self, participant: &Arc<Participant>) {
        *self.participant.write() = Arc::downgrade(participant);
    }
}

impl ReceiverResource for Receiver {
    fn on_data_received(&self, source: &Locator, bytes: &[u8]) {
        let participant = self.participant.read().upgrade();
        match participant {
            Some(participant) => participant.on_datagram(source, bytes),
            None => log::trace!("[RECEIVER] {} bytes from {} before bind", bytes.len(), source),
        }
    }
}

impl Participant {
    pub(super) fn on_datagram(&self, source: &Locator, bytes: &[u8]) {
        if self.is_closed() {
            return;
        }
        let message = match RtpsMessage::parse(bytes) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("[RECEIVER] dropping datagram from {}: {}", source, e);
                return;
            }
        };
        let remote = message.header.guid_prefix;
        let mut addressed = true;
        let mut timestamp = None;

        for submessage in &message.submessages {
            match submessage {
                Submessage::InfoDst(dst) => addressed = dst.is_unknown() || *dst == self.prefix,
                Submessage::InfoTs(ts) => timestamp = *ts,
                _ if !addressed => {}
                Submessage::Data(data) if data.writer_id == EntityId::SPDP_WRITER => {
                    self.discovery.on_spdp(data);
                }
                Submessage::Data(data) => {
                    for reader in self.readers_for(data.reader_id, data.writer_id) {
                        reader.on_data(remote, data, timestamp);
                    }
                }
                Submessage::DataFrag(frag) => {
                    for reader in self.readers_for(frag.reader_id, frag.writer_id) {
                        reader.on_data_frag(remote, frag, timestamp);
                    }
                }
                Submessage::Heartbeat(hb) => {
                    for reader in self.readers_for(hb.reader_id, hb.writer_id) {
                        reader.on_heartbeat(remote, hb);
                    }
                }
                Submessage::Gap(gap) => {
                    for reader in self.readers_for(gap.reader_id, gap.writer_id) {
                        reader.on_gap(remote, gap);
                    }
                }
                Submessage::AckNack(ack) => match self.writer_for(ack.writer_id) {
                    Some(writer) => writer.on_acknack(remote, ack),
                    None => log::trace!("[RECEIVER] ACKNACK for unknown writer {:?}", ack.writer_id),
                },
                Submessage::NackFrag(nf) => match self.writer_for(nf.writer_id) {
                    Some(writer) => writer.on_nack_frag(remote, nf),
                    None => log::trace!("[RECEIVER] NACK_FRAG for unknown writer {:?}", nf.writer_id),
                },
                Submessage::Unknown { id } => {
                    log::trace!("[RECEIVER] skipping submessage 0x{:02x}", id);
                }
            }
        }
    }
}
