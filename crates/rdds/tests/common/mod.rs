// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rdds::config::{RuntimeConfig, Timing};
use rdds::core::Locator;
use rdds::dds::{DataReader, DataWriter, Participant, RawBytes, Registry, TopicType};
use rdds::protocol::{RtpsMessage, Submessage};
use rdds::transport::DropPolicy;

/// Registry with compressed protocol timing, already initialized.
pub fn fast_registry() -> Arc<Registry> {
    let registry = Registry::with_config(RuntimeConfig::new(Timing::fast()));
    registry.init().expect("registry init");
    registry
}

pub fn participant(registry: &Arc<Registry>, name: &str) -> Arc<Participant> {
    Participant::builder(registry)
        .name(name)
        .build()
        .expect("participant")
}

/// Poll `cond` every 10ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn wait_matched<T: TopicType>(writer: &DataWriter<T>, reader: &DataReader<T>) -> bool {
    wait_until(Duration::from_secs(5), || {
        writer.matched_subscriptions().contains(&reader.guid())
            && reader.matched_publications().contains(&writer.guid())
    })
}

/// Take until `expected` samples arrived (or the timeout hits).
pub fn collect(reader: &DataReader<RawBytes>, expected: usize, timeout: Duration) -> Vec<(i64, Vec<u8>)> {
    let mut received = Vec::new();
    wait_until(timeout, || {
        for sample in reader.take().expect("take") {
            if let Some(data) = sample.data {
                received.push((sample.info.sequence_number, data.data));
            }
        }
        received.len() >= expected
    });
    received
}

/// Whether a datagram carries a submessage for a user (non built-in) endpoint
/// that matches `pred`.
pub fn has_user_submessage(bytes: &[u8], pred: impl Fn(&Submessage) -> bool) -> bool {
    let Ok(message) = RtpsMessage::parse(bytes) else {
        return false;
    };
    message.submessages.iter().any(|sub| {
        let user = match sub {
            Submessage::Data(d) => !d.writer_id.is_builtin(),
            Submessage::Heartbeat(hb) => !hb.writer_id.is_builtin(),
            Submessage::AckNack(ack) => !ack.writer_id.is_builtin(),
            Submessage::Gap(gap) => !gap.writer_id.is_builtin(),
            Submessage::DataFrag(f) => !f.writer_id.is_builtin(),
            Submessage::NackFrag(n) => !n.writer_id.is_builtin(),
            _ => false,
        };
        user && pred(sub)
    })
}

/// Drop policy looking only at the datagram bytes.
pub fn drop_when(pred: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> DropPolicy {
    Arc::new(move |_: &Locator, bytes: &[u8]| pred(bytes))
}

pub fn sample(n: u32) -> RawBytes {
    RawBytes::new(n.to_le_bytes().to_vec())
}

pub fn value(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}
