// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! DEADLINE, OWNERSHIP, LIFESPAN and fragmented samples between participants.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rdds::dds::{DataReader, RawBytes};
use rdds::protocol::Submessage;
use rdds::qos::{Ownership, QoS};

use common::{collect, drop_when, fast_registry, has_user_submessage, participant, sample, value, wait_matched, wait_until};

fn values(reader: &DataReader<RawBytes>) -> Vec<u32> {
    reader
        .take()
        .expect("take")
        .into_iter()
        .filter_map(|s| s.data.map(|d| value(&d.data)))
        .collect()
}

#[test]
fn deadline_missed_reported_on_both_sides() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let qos = QoS::reliable().deadline(Duration::from_millis(100));
    let writer = pub_side.create_writer::<RawBytes>("deadline", qos.clone()).expect("writer");
    let reader = sub_side.create_reader::<RawBytes>("deadline", qos).expect("reader");
    assert!(wait_matched(&writer, &reader));

    // Nothing is owed before the first sample.
    thread::sleep(Duration::from_millis(250));
    assert_eq!(writer.offered_deadline_missed_status().total_count, 0);
    assert_eq!(reader.requested_deadline_missed_status().total_count, 0);

    writer.write(&sample(1)).expect("write");
    assert_eq!(collect(&reader, 1, Duration::from_secs(2)).len(), 1);

    assert!(wait_until(Duration::from_secs(2), || {
        writer.offered_deadline_missed_status().total_count >= 1
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        reader.requested_deadline_missed_status().total_count >= 1
    }));
    assert_eq!(reader.requested_deadline_missed_status().last_instance_handle, None);

    registry.shutdown();
}

#[test]
fn exclusive_reader_follows_strongest_writer() {
    let registry = fast_registry();
    let weak_side = participant(&registry, "weak");
    let strong_side = participant(&registry, "strong");
    let sub_side = participant(&registry, "sub");

    let reader = sub_side
        .create_reader::<RawBytes>("owned", QoS::reliable().keep_all().ownership(Ownership::exclusive(0)))
        .expect("reader");
    let weak = weak_side
        .create_writer::<RawBytes>("owned", QoS::reliable().ownership(Ownership::exclusive(10)))
        .expect("weak writer");
    let strong = strong_side
        .create_writer::<RawBytes>("owned", QoS::reliable().ownership(Ownership::exclusive(20)))
        .expect("strong writer");
    assert!(wait_matched(&weak, &reader));
    assert!(wait_matched(&strong, &reader));

    weak.write(&sample(1)).expect("write");
    assert!(wait_until(Duration::from_secs(2), || values(&reader) == vec![1]));
    strong.write(&sample(2)).expect("write");
    assert!(wait_until(Duration::from_secs(2), || values(&reader) == vec![2]));

    weak.write(&sample(3)).expect("write");
    strong.write(&sample(4)).expect("write");
    weak.wait_for_acknowledgments(Duration::from_secs(2)).expect("weak acked");
    strong.wait_for_acknowledgments(Duration::from_secs(2)).expect("strong acked");
    assert_eq!(values(&reader), vec![4]);
    assert_eq!(reader.sample_lost_status().total_count, 0);

    // The owner leaves: the weaker writer takes the instance back.
    strong_side.delete_writer(&strong).expect("delete");
    assert!(wait_until(Duration::from_secs(3), || {
        !reader.matched_publications().contains(&strong.guid())
    }));
    weak.write(&sample(5)).expect("write");
    assert!(wait_until(Duration::from_secs(2), || values(&reader) == vec![5]));

    registry.shutdown();
}

#[test]
fn shared_ownership_mismatch_does_not_match() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let _writer = pub_side
        .create_writer::<RawBytes>("kinds", QoS::reliable())
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("kinds", QoS::reliable().ownership(Ownership::exclusive(0)))
        .expect("reader");
    assert!(wait_until(Duration::from_secs(3), || {
        reader.requested_incompatible_qos_status().last_policy == Some("OWNERSHIP")
    }));

    registry.shutdown();
}

#[test]
fn large_sample_survives_fragment_loss() {
    let registry = fast_registry();
    let dropped = Arc::new(AtomicBool::new(false));
    let once = Arc::clone(&dropped);
    registry.network().set_drop_policy(Some(drop_when(move |bytes| {
        let third = has_user_submessage(bytes, |s| match s {
            Submessage::DataFrag(f) => {
                let first = f.fragment_starting_num;
                (first..first + u32::from(f.fragments_in_submessage)).contains(&3)
            }
            _ => false,
        });
        third && !once.swap(true, Ordering::AcqRel)
    })));

    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");
    let writer = pub_side
        .create_writer::<RawBytes>("blob", QoS::reliable().keep_all())
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("blob", QoS::reliable().keep_all())
        .expect("reader");
    assert!(wait_matched(&writer, &reader));

    let blob: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    writer.write(&RawBytes::new(blob.clone())).expect("large write");
    writer.write(&sample(7)).expect("small write");

    let received = collect(&reader, 2, Duration::from_secs(5));
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].1, blob);
    assert_eq!(value(&received[1].1), 7);
    assert!(dropped.load(Ordering::Acquire), "a fragment datagram was dropped");

    let sent = writer.metrics().expect("writer metrics").snapshot();
    assert!(sent.fragments_sent > 98);
    assert!(sent.nack_frags_received >= 1);
    let got = reader.metrics().expect("reader metrics").snapshot();
    assert_eq!(got.samples_reassembled, 1);
    assert_eq!(reader.sample_lost_status().total_count, 0);

    registry.shutdown();
}

#[test]
fn lifespan_expires_samples_on_reader_and_writer() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let writer = pub_side
        .create_writer::<RawBytes>(
            "short/lived",
            QoS::reliable().keep_all().transient_local().lifespan(Duration::from_millis(200)),
        )
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("short/lived", QoS::reliable().keep_all())
        .expect("reader");
    assert!(wait_matched(&writer, &reader));

    for n in 0..3 {
        writer.write(&sample(n)).expect("write");
    }
    assert!(wait_until(Duration::from_secs(2), || reader.read().expect("read").len() == 3));

    thread::sleep(Duration::from_millis(400));
    assert!(reader.take().expect("take").is_empty());
    assert!(wait_until(Duration::from_secs(2), || writer.history_len() == 0));

    // A late joiner gets nothing from the expired history.
    let late = sub_side
        .create_reader::<RawBytes>("short/lived", QoS::reliable().keep_all().transient_local())
        .expect("late reader");
    assert!(wait_matched(&writer, &late));
    thread::sleep(Duration::from_millis(200));
    assert!(late.take().expect("take").is_empty());
    assert_eq!(late.sample_lost_status().total_count, 0);

    registry.shutdown();
}
