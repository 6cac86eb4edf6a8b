// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! LIVELINESS: leases, assertions and one notification per transition.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rdds::dds::{DataReaderListener, DataWriterListener, LivelinessChangedStatus, LivelinessLostStatus, RawBytes};
use rdds::qos::{Liveliness, LivelinessKind, QoS};

use common::{fast_registry, participant, sample, wait_matched, wait_until};

const LEASE: Duration = Duration::from_millis(300);

#[derive(Default)]
struct Changes(Mutex<Vec<LivelinessChangedStatus>>);

impl Changes {
    fn alive_transitions(&self) -> i32 {
        self.0
            .lock()
            .iter()
            .map(|s| s.alive_count_change.max(0))
            .sum()
    }

    fn lost_transitions(&self) -> i32 {
        self.0
            .lock()
            .iter()
            .map(|s| s.not_alive_count_change.max(0))
            .sum()
    }

    fn last(&self) -> Option<LivelinessChangedStatus> {
        self.0.lock().last().cloned()
    }
}

impl DataReaderListener for Changes {
    fn on_liveliness_changed(&self, status: LivelinessChangedStatus) {
        self.0.lock().push(status);
    }
}

#[derive(Default)]
struct Lost(Mutex<Vec<LivelinessLostStatus>>);

impl DataWriterListener for Lost {
    fn on_liveliness_lost(&self, status: LivelinessLostStatus) {
        self.0.lock().push(status);
    }
}

fn manual_by_topic() -> QoS {
    QoS::reliable().liveliness(Liveliness::new(LivelinessKind::ManualByTopic, LEASE))
}

#[test]
fn manual_writer_expires_once_and_recovers() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let writer = pub_side
        .create_writer::<RawBytes>("alive", manual_by_topic())
        .expect("writer");
    let lost = Arc::new(Lost::default());
    writer.set_listener(Some(lost.clone()));

    let reader = sub_side
        .create_reader::<RawBytes>("alive", manual_by_topic())
        .expect("reader");
    let changes = Arc::new(Changes::default());
    reader.set_listener(Some(changes.clone()));
    assert!(wait_matched(&writer, &reader));

    writer.assert_liveliness().expect("assert");
    assert!(wait_until(Duration::from_secs(2), || changes.alive_transitions() == 1));
    assert!(reader.is_writer_alive(&writer.guid()));

    // Silence for several leases: exactly one NOT_ALIVE transition.
    assert!(wait_until(Duration::from_secs(2), || changes.lost_transitions() == 1));
    thread::sleep(LEASE * 3);
    assert_eq!(changes.lost_transitions(), 1);
    assert_eq!(changes.alive_transitions(), 1);
    let last = changes.last().expect("status");
    assert_eq!(last.alive_count, 0);
    assert_eq!(last.not_alive_count, 1);
    assert_eq!(last.last_publication_handle, Some(writer.guid()));
    assert!(!reader.is_writer_alive(&writer.guid()));

    assert_eq!(lost.0.lock().len(), 1, "writer side reports the lapse once");
    assert_eq!(lost.0.lock()[0].total_count, 1);

    // Writing asserts liveliness again.
    writer.write(&sample(1)).expect("write");
    assert!(wait_until(Duration::from_secs(2), || changes.alive_transitions() == 2));
    let last = changes.last().expect("status");
    assert_eq!(last.alive_count, 1);
    assert_eq!(last.not_alive_count, 0);

    registry.shutdown();
}

#[test]
fn same_participant_reader_sees_one_transition_each_way() {
    let registry = fast_registry();
    let local = participant(&registry, "local");

    let writer = local
        .create_writer::<RawBytes>("alive/local", manual_by_topic())
        .expect("writer");
    let reader = local
        .create_reader::<RawBytes>("alive/local", manual_by_topic())
        .expect("reader");
    let changes = Arc::new(Changes::default());
    reader.set_listener(Some(changes.clone()));
    assert!(wait_matched(&writer, &reader));

    writer.assert_liveliness().expect("assert");
    assert!(wait_until(Duration::from_secs(2), || changes.alive_transitions() == 1));
    assert!(wait_until(Duration::from_secs(2), || changes.lost_transitions() == 1));
    thread::sleep(LEASE * 3);
    assert_eq!(changes.alive_transitions(), 1);
    assert_eq!(changes.lost_transitions(), 1);
    let last = changes.last().expect("status");
    assert_eq!(last.not_alive_count, 1);
    assert_eq!(last.last_publication_handle, Some(writer.guid()));

    registry.shutdown();
}

#[test]
fn periodic_assertions_keep_writer_alive() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let writer = pub_side
        .create_writer::<RawBytes>("heartbeat", manual_by_topic())
        .expect("writer");
    let reader = sub_side
        .create_reader::<RawBytes>("heartbeat", manual_by_topic())
        .expect("reader");
    let changes = Arc::new(Changes::default());
    reader.set_listener(Some(changes.clone()));
    assert!(wait_matched(&writer, &reader));

    for _ in 0..10 {
        writer.assert_liveliness().expect("assert");
        thread::sleep(LEASE / 3);
    }
    assert_eq!(changes.alive_transitions(), 1);
    assert_eq!(changes.lost_transitions(), 0);
    assert_eq!(writer.liveliness_lost_status().total_count, 0);

    registry.shutdown();
}

#[test]
fn manual_by_participant_assertion_reaches_remote_reader() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let qos = QoS::reliable().liveliness(Liveliness::new(LivelinessKind::ManualByParticipant, LEASE));
    let writer = pub_side.create_writer::<RawBytes>("by/participant", qos.clone()).expect("writer");
    let reader = sub_side.create_reader::<RawBytes>("by/participant", qos).expect("reader");
    let changes = Arc::new(Changes::default());
    reader.set_listener(Some(changes.clone()));
    assert!(wait_matched(&writer, &reader));

    pub_side.assert_liveliness().expect("participant assertion");
    assert!(wait_until(Duration::from_secs(2), || changes.alive_transitions() == 1));
    assert!(wait_until(Duration::from_secs(2), || changes.lost_transitions() == 1));

    registry.shutdown();
}

#[test]
fn stronger_requested_kind_does_not_match() {
    let registry = fast_registry();
    let pub_side = participant(&registry, "pub");
    let sub_side = participant(&registry, "sub");

    let writer = pub_side
        .create_writer::<RawBytes>("kinds", QoS::reliable())
        .expect("automatic writer");
    let reader = sub_side
        .create_reader::<RawBytes>("kinds", manual_by_topic())
        .expect("manual reader");

    assert!(wait_until(Duration::from_secs(3), || {
        reader.requested_incompatible_qos_status().last_policy == Some("LIVELINESS")
    }));
    assert!(writer.matched_subscriptions().is_empty());

    registry.shutdown();
}
