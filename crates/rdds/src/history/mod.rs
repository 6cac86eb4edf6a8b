// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-endpoint history: [`CacheChange`] and [`HistoryCache`].

mod cache;
mod change;

pub use cache::{HistoryAttributes, HistoryCache};
pub use change::{CacheChange, ChangeKind, InstanceHandle};
