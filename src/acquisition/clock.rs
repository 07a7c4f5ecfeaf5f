//! clock.rs
//! Millisecond session clock shared by the recorder, every worker and the event source.

use std::time::{Duration, Instant};

use spin_sleep::{SpinSleeper, SpinStrategy};

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Milliseconds since the clock was created.
    #[inline]
    pub fn time(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Sleeps for `ms` milliseconds with sub-millisecond precision.
    pub fn wait(&self, ms: u64) {
        sleeper().sleep(Duration::from_millis(ms));
    }
}

/// Sleeper used for all pacing in the acquisition path.
pub fn sleeper() -> SpinSleeper {
    SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_advances_in_milliseconds() {
        let clock = Clock::new();
        let t0 = clock.time();
        clock.wait(5);
        let t1 = clock.time();
        assert!(t1 - t0 >= 5, "t0={} t1={}", t0, t1);
    }

    #[test]
    fn copies_share_the_epoch() {
        let a = Clock::new();
        let b = a;
        a.wait(2);
        assert!((a.time() - b.time()).abs() <= 1);
    }
}
