// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat / ACKNACK helpers: stale-count filtering and timer jitter.

use std::time::Duration;

// ============================================================================
// COUNT FILTER
// ============================================================================

/// Drops HEARTBEAT / ACKNACK submessages whose `count` is not newer than the
/// last accepted one for the same (writer, reader) pair.
///
/// Counts are compared with wrapping arithmetic so a long-lived pair survives
/// the u32 rollover.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountFilter {
    last: Option<u32>,
}

impl CountFilter {
    #[must_use]
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Returns true (and remembers `count`) if `count` is fresh.
    pub fn accept(&mut self, count: u32) -> bool {
        if let Some(last) = self.last {
            let delta = count.wrapping_sub(last);
            if delta == 0 || delta > u32::MAX / 2 {
                return false;
            }
        }
        self.last = Some(count);
        true
    }

    #[must_use]
    pub fn last(&self) -> Option<u32> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ============================================================================
// JITTER
// ============================================================================

/// `base` spread by a uniformly random offset in `[-jitter, +jitter]`.
///
/// Never returns less than 1 ms so a zero-ish period cannot spin the event
/// thread.
pub fn jittered_period(base: Duration, jitter: Duration) -> Duration {
    let floor = Duration::from_millis(1);
    let jitter_ns = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
    if jitter_ns == 0 {
        return base.max(floor);
    }
    let offset = Duration::from_nanos(fastrand::u64(0..=jitter_ns));
    let period = if fastrand::bool() {
        base.saturating_add(offset)
    } else {
        base.saturating_sub(offset)
    };
    period.max(floor)
}

/// Uniform delay in `[0, max]` before answering a HEARTBEAT.
pub fn response_delay(max: Duration) -> Duration {
    let max_ns = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
    if max_ns == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(fastrand::u64(0..=max_ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_filter_drops_stale() {
        let mut f = CountFilter::new();
        assert!(f.accept(1));
        assert!(f.accept(2));
        assert!(!f.accept(2), "repeated count is stale");
        assert!(!f.accept(1), "older count is stale");
        assert!(f.accept(10), "gaps in counts are fine");
        assert_eq!(f.last(), Some(10));
    }

    #[test]
    fn test_count_filter_wraps() {
        let mut f = CountFilter::new();
        assert!(f.accept(u32::MAX));
        assert!(f.accept(0));
        assert!(f.accept(1));
        assert!(!f.accept(u32::MAX));
    }

    #[test]
    fn test_count_filter_reset() {
        let mut f = CountFilter::new();
        assert!(f.accept(5));
        f.reset();
        assert!(f.accept(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        let jitter = Duration::from_millis(10);
        for _ in 0..200 {
            let p = jittered_period(base, jitter);
            assert!(p >= Duration::from_millis(90) && p <= Duration::from_millis(110), "{:?}", p);
        }
        assert_eq!(jittered_period(base, Duration::ZERO), base);
        assert_eq!(jittered_period(Duration::ZERO, Duration::ZERO), Duration::from_millis(1));
    }

    #[test]
    fn test_response_delay_bounds() {
        assert_eq!(response_delay(Duration::ZERO), Duration::ZERO);
        let max = Duration::from_millis(5);
        for _ in 0..200 {
            assert!(response_delay(max) <= max);
        }
    }
}
