// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Keyed topics: KEEP_LAST eviction per instance and instance lifecycle.

mod common;

use std::time::Duration;

use rdds::dds::{Error, InstanceState, RawBytes, Sample};
use rdds::history::InstanceHandle;
use rdds::qos::QoS;

use common::{fast_registry, participant, value, wait_matched, wait_until};

fn keyed(key: &str, n: u32) -> RawBytes {
    RawBytes::keyed(key.as_bytes().to_vec(), n.to_le_bytes().to_vec())
}

fn values_of(samples: &[Sample<RawBytes>], key: &str) -> Vec<u32> {
    let handle = InstanceHandle::from_key(key.as_bytes());
    samples
        .iter()
        .filter(|s| s.info.instance_handle == Some(handle))
        .filter_map(|s| s.data.as_ref().map(|d| value(&d.data)))
        .collect()
}

#[test]
fn keep_last_holds_depth_samples_per_instance() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let writer = pub_side
        .create_writer::<RawBytes>("keyed", QoS::reliable().keep_last(2))
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("keyed", QoS::reliable().keep_last(2))
        .expect("reader");
    assert!(wait_matched(&writer, &reader));

    for n in 1..=5 {
        writer.write(&keyed("a", n)).expect("write a");
        writer.write(&keyed("b", 10 + n)).expect("write b");
    }

    let mut samples = Vec::new();
    assert!(wait_until(Duration::from_secs(5), || {
        samples = reader.read().expect("read");
        values_of(&samples, "a").last() == Some(&5) && values_of(&samples, "b").last() == Some(&15)
    }));
    // The oldest of each instance went first; the other instance is untouched.
    assert_eq!(values_of(&samples, "a"), vec![4, 5]);
    assert_eq!(values_of(&samples, "b"), vec![14, 15]);
    assert!(writer.history_len() <= 4);

    registry.shutdown();
}

#[test]
fn dispose_and_unregister_reach_the_reader() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let writer = pub_side
        .create_writer::<RawBytes>("lifecycle", QoS::reliable().keep_all())
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("lifecycle", QoS::reliable().keep_all())
        .expect("reader");
    assert!(wait_matched(&writer, &reader));

    let handle = writer.register_instance(&keyed("x", 0)).expect("register");
    assert_eq!(handle, InstanceHandle::from_key(b"x"));
    writer.write(&keyed("x", 1)).expect("write");
    writer.dispose_instance(&keyed("x", 0)).expect("dispose");
    writer.write(&keyed("y", 2)).expect("write y");
    writer.unregister_instance(&keyed("y", 0)).expect("unregister");

    let mut samples = Vec::new();
    assert!(wait_until(Duration::from_secs(5), || {
        samples.extend(reader.take().expect("take"));
        samples.len() >= 4
    }));

    let states: Vec<(InstanceState, bool)> = samples
        .iter()
        .map(|s| (s.info.instance_state, s.info.valid_data))
        .collect();
    assert_eq!(
        states,
        vec![
            (InstanceState::Alive, true),
            (InstanceState::NotAliveDisposed, false),
            (InstanceState::Alive, true),
            (InstanceState::NotAliveNoWriters, false),
        ]
    );
    assert!(samples[1].data.is_none());
    assert_eq!(samples[1].info.instance_handle, Some(handle));

    // "x" is still registered explicitly.
    assert!(matches!(
        pub_side.delete_writer(&writer),
        Err(Error::PreconditionNotMet(_))
    ));
    writer.unregister_instance(&keyed("x", 0)).expect("unregister x");
    pub_side.delete_writer(&writer).expect("delete");

    registry.shutdown();
}

#[test]
fn max_instances_rejects_new_instance() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");

    let writer = pub_side
        .create_writer::<RawBytes>("bounded", QoS::reliable().keep_last(1).max_instances(2))
        .expect("writer");
    writer.write(&keyed("a", 1)).expect("first instance");
    writer.write(&keyed("b", 1)).expect("second instance");
    writer.write(&keyed("a", 2)).expect("existing instance replaces its sample");
    assert!(matches!(
        writer.write(&keyed("c", 1)),
        Err(Error::ResourceLimitExceeded(_))
    ));
    assert_eq!(writer.history_len(), 2);

    registry.shutdown();
}
