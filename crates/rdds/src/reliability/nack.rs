// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side ACKNACK scheduling.

use std::time::{Duration, Instant};

/// NackScheduler state machine:
///
/// ```text
///                 HEARTBEAT / gap
///   ┌────────┐ ───────────────────▶ ┌─────────┐  poll() due   ┌──────────┐
///   │  IDLE  │                      │ PENDING │ ─────────────▶│ BACKOFF  │
///   └────────┘ ◀─────────────────── └─────────┘               └────┬─────┘
///       ▲        nothing missing         ▲   backoff expires        │
///       │                                └──────────────────────────┤
///       │            retries exhausted (wait for next HEARTBEAT)    │
///       └───────────────────────────────────────────────────────────┘
/// ```
///
/// - **PENDING**: an ACKNACK is due at `due` (HEARTBEAT response delay, or
///   immediately for a gap seen in the DATA stream).
/// - **BACKOFF**: an ACKNACK went out but data is still missing; an
///   unsolicited resend is scheduled after `backoff_base * 2^retries`.
/// - After `max_retries` unsolicited resends the scheduler goes idle until the
///   writer's next HEARTBEAT re-arms it. Missing data is never declared lost
///   here; only GAP or HEARTBEAT.first can do that.
#[derive(Debug, Clone)]
pub struct NackScheduler {
    due: Option<Instant>,
    retries: u32,
    backoff_base: Duration,
    max_retries: u32,
}

impl NackScheduler {
    #[must_use]
    pub fn new(backoff_base: Duration, max_retries: u32) -> Self {
        Self {
            due: None,
            retries: 0,
            backoff_base,
            max_retries,
        }
    }

    /// HEARTBEAT accepted: answer after `delay`. Keeps an earlier deadline.
    pub fn on_heartbeat(&mut self, now: Instant, delay: Duration) {
        self.retries = 0;
        self.schedule(now + delay);
    }

    /// Out-of-order DATA exposed a hole.
    pub fn on_gap_detected(&mut self, now: Instant) {
        if self.due.is_none() && self.retries == 0 {
            self.schedule(now + self.backoff_base);
        }
    }

    fn schedule(&mut self, at: Instant) {
        self.due = Some(match self.due {
            Some(existing) if existing <= at => existing,
            _ => at,
        });
    }

    /// True when an ACKNACK should be sent now.
    #[must_use]
    pub fn poll(&self, now: Instant) -> bool {
        self.due.is_some_and(|due| due <= now)
    }

    #[must_use]
    pub fn due(&self) -> Option<Instant> {
        self.due
    }

    /// Record a sent ACKNACK; arms the backoff resend if data is still missing.
    pub fn on_sent(&mut self, now: Instant, still_missing: bool) {
        if !still_missing || self.retries >= self.max_retries {
            self.due = None;
            return;
        }
        let factor = 1u32 << self.retries.min(16);
        self.retries += 1;
        self.due = Some(now + self.backoff_base.saturating_mul(factor));
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reset(&mut self) {
        self.due = None;
        self.retries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(10);

    #[test]
    fn test_heartbeat_schedules_response() {
        let mut s = NackScheduler::new(BASE, 3);
        let now = Instant::now();
        s.on_heartbeat(now, Duration::from_millis(5));
        assert!(!s.poll(now));
        assert!(s.poll(now + Duration::from_millis(5)));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let mut s = NackScheduler::new(BASE, 3);
        let now = Instant::now();
        s.on_heartbeat(now, Duration::from_millis(50));
        s.on_heartbeat(now, Duration::from_millis(1));
        assert_eq!(s.due(), Some(now + Duration::from_millis(1)));
        s.on_heartbeat(now, Duration::from_millis(30));
        assert_eq!(s.due(), Some(now + Duration::from_millis(1)));
    }

    #[test]
    fn test_backoff_doubles_then_stops() {
        let mut s = NackScheduler::new(BASE, 3);
        let now = Instant::now();
        s.on_heartbeat(now, Duration::ZERO);

        s.on_sent(now, true);
        assert_eq!(s.due(), Some(now + BASE));
        s.on_sent(now, true);
        assert_eq!(s.due(), Some(now + BASE * 2));
        s.on_sent(now, true);
        assert_eq!(s.due(), Some(now + BASE * 4));
        s.on_sent(now, true);
        assert_eq!(s.due(), None, "retries exhausted, wait for next HEARTBEAT");

        s.on_heartbeat(now, Duration::ZERO);
        assert_eq!(s.retries(), 0);
        assert!(s.poll(now));
    }

    #[test]
    fn test_sent_without_missing_goes_idle() {
        let mut s = NackScheduler::new(BASE, 3);
        let now = Instant::now();
        s.on_heartbeat(now, Duration::ZERO);
        s.on_sent(now, false);
        assert_eq!(s.due(), None);
    }

    #[test]
    fn test_gap_detected_does_not_postpone_backoff() {
        let mut s = NackScheduler::new(BASE, 3);
        let now = Instant::now();
        s.on_gap_detected(now);
        assert_eq!(s.due(), Some(now + BASE));
        s.on_sent(now, true);
        s.on_sent(now, true);
        s.on_sent(now, true);
        s.on_sent(now, true);
        s.on_gap_detected(now);
        assert_eq!(s.due(), None, "exhausted scheduler waits for HEARTBEAT");
        s.reset();
        s.on_gap_detected(now);
        assert!(s.due().is_some());
    }
}
