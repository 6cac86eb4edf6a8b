// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS time representation (seconds + 2^-32 fractions).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Duration used to express "never expires" (lease, deadline).
pub const DURATION_INFINITE: Duration = Duration::from_secs(u64::MAX);

/// RTPS `Time_t` / `Duration_t` wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Time {
    pub seconds: i32,
    pub fraction: u32,
}

impl Time {
    pub const ZERO: Time = Time {
        seconds: 0,
        fraction: 0,
    };
    pub const INFINITE: Time = Time {
        seconds: 0x7fff_ffff,
        fraction: 0xffff_ffff,
    };
    pub const INVALID: Time = Time {
        seconds: -1,
        fraction: 0xffff_ffff,
    };

    /// Current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration(since_epoch)
    }

    /// Convert a duration to wire format; saturates to [`Time::INFINITE`].
    pub fn from_duration(d: Duration) -> Self {
        if d == DURATION_INFINITE || d.as_secs() >= 0x7fff_ffff {
            return Self::INFINITE;
        }
        // Round to nearest so a Duration survives the wire unchanged.
        let fraction = (((u64::from(d.subsec_nanos()) << 32) + 500_000_000) / 1_000_000_000) as u32;
        Self {
            seconds: d.as_secs() as i32,
            fraction,
        }
    }

    /// Convert back to a duration; [`Time::INFINITE`] maps to [`DURATION_INFINITE`].
    pub fn to_duration(self) -> Duration {
        if self == Self::INFINITE {
            return DURATION_INFINITE;
        }
        if self.seconds < 0 {
            return Duration::ZERO;
        }
        let nanos = ((u64::from(self.fraction) * 1_000_000_000 + (1 << 31)) >> 32) as u32;
        Duration::new(self.seconds as u64, nanos)
    }

    pub fn as_nanos(self) -> u128 {
        self.to_duration().as_nanos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_roundtrip_is_exact() {
        for d in [
            Duration::from_millis(1500),
            Duration::from_millis(300),
            Duration::from_millis(100),
            Duration::from_nanos(1),
            Duration::new(3, 999_999_999),
            Duration::new(12, 123_456_789),
        ] {
            assert_eq!(Time::from_duration(d).to_duration(), d);
        }
    }

    #[test]
    fn test_fraction_rounds_to_nearest() {
        // 0.3s is 1288490188.8 fractions.
        assert_eq!(Time::from_duration(Duration::from_millis(300)).fraction, 1_288_490_189);
        // The last fraction is nearer to the next second.
        assert_eq!(Time { seconds: 0, fraction: 0xffff_ffff }.to_duration(), Duration::from_secs(1));
        assert_eq!(Time { seconds: 0, fraction: 0xffff_fff0 }.to_duration().subsec_nanos(), 999_999_996);
    }

    #[test]
    fn test_infinite_saturates() {
        assert_eq!(Time::from_duration(DURATION_INFINITE), Time::INFINITE);
        assert_eq!(Time::INFINITE.to_duration(), DURATION_INFINITE);
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = Time::now();
        let b = Time::now();
        assert!(b >= a);
    }
}
