// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::cast_sign_loss)] // Test data conversions
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Test code

//! Reliable delivery end to end
//!
//! Writer and reader live on two participants sharing an in-process
//! network; loss is injected with the network's drop policy.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rdds::dds::{Error, RawBytes};
use rdds::protocol::Submessage;
use rdds::qos::QoS;

use common::{
    collect, drop_when, fast_registry, has_user_submessage, participant, sample, value, wait_matched,
    wait_until,
};

#[test]
fn late_joiner_recovers_history_and_writer_releases_it() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let writer = pub_side
        .create_writer::<RawBytes>("late/joiner", QoS::reliable().keep_all().max_samples(10))
        .expect("writer");
    for i in 1..=3 {
        writer.write(&sample(i)).expect("write before match");
    }
    assert_eq!(writer.history_len(), 3, "no reader yet: history is kept");

    let reader = sub_side
        .create_reader::<RawBytes>("late/joiner", QoS::reliable().keep_all())
        .expect("reader");
    assert!(wait_matched(&writer, &reader), "discovery did not match the pair");

    for i in 4..=5 {
        writer.write(&sample(i)).expect("write after match");
    }

    let received = collect(&reader, 5, Duration::from_secs(5));
    let seqs: Vec<i64> = received.iter().map(|(seq, _)| *seq).collect();
    let values: Vec<u32> = received.iter().map(|(_, bytes)| value(bytes)).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert_eq!(values, vec![1, 2, 3, 4, 5]);

    assert!(
        wait_until(Duration::from_secs(5), || writer.history_len() == 0),
        "writer history still holds {} changes",
        writer.history_len()
    );
    let metrics = writer.metrics().expect("enabled writer");
    assert!(metrics.retransmissions() >= 3, "samples 1..3 are repaired, not pushed");

    registry.shutdown();
}

#[test]
fn lossy_network_delivers_every_sample_once_in_order() {
    let registry = fast_registry();
    let rng = Mutex::new(fastrand::Rng::with_seed(0x5eed));
    let data_dropped = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&data_dropped);
    registry.network().set_drop_policy(Some(drop_when(move |bytes| {
        let lossy = has_user_submessage(bytes, |s| {
            matches!(s, Submessage::Data(_) | Submessage::AckNack(_) | Submessage::Heartbeat(_))
        });
        if !lossy || rng.lock().f32() >= 0.2 {
            return false;
        }
        if has_user_submessage(bytes, |s| matches!(s, Submessage::Data(_))) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        true
    })));

    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");
    let writer = pub_side
        .create_writer::<RawBytes>("lossy", QoS::reliable().keep_all())
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("lossy", QoS::reliable().keep_all())
        .expect("reader");
    assert!(wait_matched(&writer, &reader));

    const N: u32 = 50;
    for i in 1..=N {
        writer.write(&sample(i)).expect("write");
    }

    let received = collect(&reader, N as usize, Duration::from_secs(15));
    let values: Vec<u32> = received.iter().map(|(_, bytes)| value(bytes)).collect();
    assert_eq!(values, (1..=N).collect::<Vec<_>>());

    // Nothing left over: no duplicate reaches the application later.
    std::thread::sleep(Duration::from_millis(300));
    assert!(reader.take().expect("take").is_empty());

    if data_dropped.load(Ordering::Relaxed) > 0 {
        let repaired = writer.metrics().expect("metrics").retransmissions();
        assert!(repaired > 0, "drops without a single retransmission");
    }
    assert!(writer.wait_for_acknowledgments(Duration::from_secs(5)).is_ok());

    registry.shutdown();
}

#[test]
fn keep_all_write_blocks_until_acknowledged_then_fails() {
    let registry = fast_registry();
    let starve = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&starve);
    registry.network().set_drop_policy(Some(drop_when(move |bytes| {
        gate.load(Ordering::Acquire) && has_user_submessage(bytes, |s| matches!(s, Submessage::AckNack(_)))
    })));

    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");
    let qos = QoS::reliable()
        .keep_all()
        .max_samples(3)
        .max_blocking_time(Duration::from_millis(100));
    let writer = pub_side.create_writer::<RawBytes>("flow", qos).expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("flow", QoS::reliable().keep_all())
        .expect("reader");
    assert!(wait_matched(&writer, &reader));

    starve.store(true, Ordering::Release);
    for i in 1..=3 {
        writer.write(&sample(i)).expect("room in history");
    }
    // The reader got everything but its acknowledgments never arrive.
    assert_eq!(collect(&reader, 3, Duration::from_secs(5)).len(), 3);
    assert!(matches!(
        writer.write(&sample(4)),
        Err(Error::ResourceLimitExceeded(_))
    ));
    assert_eq!(writer.history_len(), 3, "unacknowledged changes are never evicted");

    starve.store(false, Ordering::Release);
    assert!(
        wait_until(Duration::from_secs(5), || writer.history_len() == 0),
        "periodic ACKNACK should release the history"
    );
    writer.write(&sample(4)).expect("room again");

    registry.shutdown();
}

#[test]
fn wait_for_acknowledgments_times_out_without_acks() {
    let registry = fast_registry();
    registry.network().set_drop_policy(Some(drop_when(|bytes| {
        has_user_submessage(bytes, |s| matches!(s, Submessage::AckNack(_)))
    })));
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");
    let writer = pub_side
        .create_writer::<RawBytes>("acks", QoS::reliable())
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("acks", QoS::reliable())
        .expect("reader");
    assert!(wait_matched(&writer, &reader));

    writer.write(&sample(1)).expect("write");
    assert_eq!(
        writer.wait_for_acknowledgments(Duration::from_millis(200)),
        Err(Error::Timeout)
    );

    registry.network().set_drop_policy(None);
    assert!(writer.wait_for_acknowledgments(Duration::from_secs(5)).is_ok());

    registry.shutdown();
}
