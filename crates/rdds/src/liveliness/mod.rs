// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveliness
//!
//! - [`LivelinessManager`]: per-writer lease state machine with a single
//!   nearest-deadline timer. A participant runs two: one for its own MANUAL
//!   writers (lost liveliness) and one for matched remote writers (liveliness
//!   changed).
//! - [`Wlp`]: the Writer Liveliness Protocol over the built-in
//!   participant-message endpoints.
//!
//! Assertion sources for a remote writer: any DATA from it, a HEARTBEAT with
//! the liveliness flag, and WLP messages from its participant.

mod manager;
mod wlp;

pub use manager::{
    LivelinessCallback, LivelinessData, LivelinessManager, LivelinessStatus, LivelinessTransition,
};
pub use wlp::{assertion_period, ParticipantMessage, Wlp};
