// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RTPS Reliability Building Blocks
//!
//! Small, lock-free or single-owner pieces shared by the writer and reader
//! engines.
//!
//! ## Protocol Flow
//!
//! ```text
//! Writer                                    Reader
//!   |                                          |
//!   |--- DATA (seq=1) ------------------------>|
//!   |--- DATA (seq=2) ----------X (lost)       |
//!   |--- DATA (seq=3) ------------------------>| (buffered, 2 missing)
//!   |                                          |
//!   |--- HEARTBEAT (first=1, last=3) -------->|
//!   |                                          | (response delay)
//!   |<-- ACKNACK (base=2, set={2}) -----------|
//!   |                                          |
//!   |--- DATA (seq=2) [retransmit] ---------->|
//!   |                                          | (2 and 3 delivered)
//!   |<-- ACKNACK (base=4, set={}) final ------|
//! ```
//!
//! When the writer no longer holds a requested change it answers with GAP and
//! the reader moves its watermark past it.
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | `SeqNumGenerator` | Per-writer monotonic sequence numbers (start at 1) |
//! | `CountFilter` | Drops stale HEARTBEAT / ACKNACK counts |
//! | `jittered_period` / `response_delay` | Randomized timer spreading |
//! | `NackScheduler` | Reader-side ACKNACK scheduling with exponential backoff |
//! | `build_gaps` | Compresses irrelevant sequences into GAP submessages |
//! | `ReliableMetrics` | Observability counters (heartbeats, NACKs, retransmits) |

mod gap;
mod heartbeat;
mod metrics;
mod nack;
mod seq;

// ============================================================================
// Public re-exports
// ============================================================================

pub use gap::build_gaps;
pub use heartbeat::{jittered_period, response_delay, CountFilter};
pub use metrics::{MetricsSnapshot, ReliableMetrics};
pub use nack::NackScheduler;
pub use seq::SeqNumGenerator;
