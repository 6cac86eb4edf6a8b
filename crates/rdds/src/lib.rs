// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RDDS - Reliable DDS delivery and discovery engine
//!
//! The RTPS machinery underneath a DDS stack: participant and endpoint
//! discovery, reliable and best-effort delivery with history caches,
//! liveliness tracking and QoS matching, plus a thin typed DDS layer on top.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rdds::{Participant, QoS, RawBytes, Registry, Result};
//!
//! fn main() -> Result<()> {
//!     let registry = Registry::new();
//!     registry.init()?;
//!
//!     let participant = Participant::builder(&registry).domain_id(0).build()?;
//!     let writer = participant.create_writer::<RawBytes>("sensors/temperature", QoS::reliable())?;
//!     let reader = participant.create_reader::<RawBytes>("sensors/temperature", QoS::reliable())?;
//!
//!     writer.write(&RawBytes::new(vec![42]))?;
//!     for sample in reader.take()? {
//!         println!("{:?}", sample.data);
//!     }
//!
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                            DDS Layer                                |
//! |   Registry -> Participant -> DataWriter/DataReader | WaitSet        |
//! +---------------------------------------------------------------------+
//! |                         Protocol Engines                            |
//! |   WriterEngine | ReaderEngine | HistoryCache | LivelinessManager   |
//! +---------------------------------------------------------------------+
//! |                            Discovery                                |
//! |   SPDP (participants) | SEDP (endpoints) | WLP | QoS matcher       |
//! +---------------------------------------------------------------------+
//! |                     Wire Format + Transport                         |
//! |   RTPS submessages | ParameterList | Transport trait | in-process  |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`dds`] - Application-facing API (start here)
//! - [`qos`] - Quality of Service policies and compatibility rules
//! - [`writer`] / [`reader`] - Reliable protocol engines
//! - [`discovery`] - SPDP/SEDP/WLP and endpoint matching
//! - [`transport`] - Transport abstraction and the in-process network
//!
//! ## Logging
//!
//! Everything goes through the `log` facade with `[TAG]` prefixes
//! (`[PDP]`, `[EDP]`, `[WRITER]`, `[READER]`, ...). Install any logger in
//! the application. The `trace` feature adds function-entry tracing.

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Runtime configuration (RTPS port mapping, timing knobs, per-topic overrides).
pub mod config;
/// Identifiers, locators, payload pool, time and the event thread.
pub mod core;
/// DDS API (Registry, Participant, DataReader, DataWriter, WaitSet).
pub mod dds;
/// Built-in discovery protocols (SPDP, SEDP, WLP) and QoS matching.
pub mod discovery;
/// History caches and cache changes shared by writers and readers.
pub mod history;
/// Liveliness leases and the writer liveliness protocol.
pub mod liveliness;
/// RTPS wire format (header, submessages, parameter lists).
pub mod protocol;
/// `QoS` (Quality of Service) policies for DDS entities.
pub mod qos;
/// Reader-side protocol engine.
pub mod reader;
/// Shared reliability helpers (sequence numbers, heartbeats, NACK scheduling, metrics).
pub mod reliability;
/// Transport abstraction and the in-process network.
pub mod transport;
/// Writer-side protocol engine.
pub mod writer;

pub use dds::{
    DataReader, DataWriter, Error, GuardCondition, Participant, RawBytes, Registry, Result,
    Sample, SampleInfo, StatusMask, TopicType, WaitSet,
};
pub use qos::QoS;

/// Trace function entry (requires the `trace` feature).
///
/// # Example
/// ```ignore
/// fn on_spdp(&self, data: &Data) {
///     trace_fn!("Discovery::on_spdp");
///     // ...
/// }
/// ```
#[macro_export]
#[cfg(feature = "trace")]
macro_rules! trace_fn {
    ($fn_name:expr) => {
        log::trace!("-> {}", $fn_name);
    };
}

/// No-op trace macro (when trace feature disabled).
#[macro_export]
#[cfg(not(feature = "trace"))]
macro_rules! trace_fn {
    ($fn_name:expr) => {};
}

/// RDDS version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
