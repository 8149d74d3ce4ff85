// SPDX-License-Identifier: Apache-2.0

//! The monotonic timing source.
//!
//! Every issue and completion timestamp in a run comes from one [`Clock`]
//! anchored at construction. Readings are signed nanoseconds from the
//! anchor, so latencies subtract without conversions. Wall-clock time never
//! appears on a timing path.

use std::time::{Duration, Instant};

/// Monotonic nanosecond clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Anchors a new clock at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Clock {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the anchor.
    #[inline]
    #[must_use]
    pub fn now_ns(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    /// Exercises the clock so the first measured readings are not cold.
    pub fn prewarm(&self) {
        let mut last = 0i64;
        for _ in 0..1_000 {
            last = last.max(self.now_ns());
        }
        let _ = std::hint::black_box(last);
    }

    /// Sleeps until `target_ns` on this clock, finishing with a short spin
    /// so wakeup jitter does not leak into issue timestamps.
    pub fn sleep_until(&self, target_ns: i64) {
        const SPIN_SLACK_NS: i64 = 200_000;
        let remaining = target_ns - self.now_ns();
        if remaining > SPIN_SLACK_NS {
            std::thread::sleep(Duration::from_nanos((remaining - SPIN_SLACK_NS) as u64));
        }
        while self.now_ns() < target_ns {
            std::hint::spin_loop();
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_monotonic() {
        let clock = Clock::new();
        let mut prev = clock.now_ns();
        for _ in 0..10_000 {
            let now = clock.now_ns();
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn sleep_until_does_not_wake_early() {
        let clock = Clock::new();
        let target = clock.now_ns() + 2_000_000;
        clock.sleep_until(target);
        assert!(clock.now_ns() >= target);
    }

    #[test]
    fn sleep_until_past_target_returns_immediately() {
        let clock = Clock::new();
        clock.sleep_until(clock.now_ns() - 1);
    }
}
