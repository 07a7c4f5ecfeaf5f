//! polling_profile.rs
//! Histogram of inter-sample time deltas for one acquisition interval.
//!
//! Deltas above `timing_range` ms are clamped into the last bin. Runs of
//! zero-delta polls (several samples stamped with the same millisecond) are
//! counted by run length; they reveal a source delivering buffered bursts.

use std::collections::BTreeMap;

pub const DEFAULT_TIMING_RANGE: usize = 10;

#[derive(Debug, Clone)]
pub struct PollingTimeProfile {
    last: Option<i64>,
    timing_range: usize,
    zero_cnt: u64,
    frequency: Vec<u64>,
    zero_runs: BTreeMap<u64, u64>,
}

impl Default for PollingTimeProfile {
    fn default() -> Self {
        Self::new(DEFAULT_TIMING_RANGE)
    }
}

impl PollingTimeProfile {
    pub fn new(timing_range: usize) -> Self {
        Self {
            last: None,
            timing_range,
            zero_cnt: 0,
            frequency: vec![0; timing_range + 1],
            zero_runs: BTreeMap::new(),
        }
    }

    /// Ends the current interval; the next update starts a fresh delta chain.
    pub fn stop(&mut self) {
        self.last = None;
    }

    pub fn update(&mut self, time_ms: i64) {
        if let Some(last) = self.last {
            let d = (time_ms - last).clamp(0, self.timing_range as i64) as usize;
            self.frequency[d] += 1;

            if d == 0 {
                self.zero_cnt += 1;
            } else if self.zero_cnt > 0 {
                *self.zero_runs.entry(self.zero_cnt).or_insert(0) += 1;
                self.zero_cnt = 0;
            }
        }
        self.last = Some(time_ms);
    }

    pub fn frequency(&self) -> &[u64] {
        &self.frequency
    }

    pub fn total(&self) -> u64 {
        self.frequency.iter().sum()
    }

    /// Share of deltas per bin (0..=timing_range ms).
    pub fn profile_percent(&self) -> Vec<f64> {
        let n = self.total();
        if n == 0 {
            return vec![0.0; self.frequency.len()];
        }
        self.frequency.iter().map(|&c| c as f64 / n as f64).collect()
    }

    pub fn zero_time_runs(&self) -> &BTreeMap<u64, u64> {
        &self.zero_runs
    }

    pub fn summary(&self) -> String {
        let pct: Vec<String> = self
            .profile_percent()
            .iter()
            .enumerate()
            .filter(|(_, p)| **p > 0.0)
            .map(|(d, p)| format!("{}ms:{:.1}%", d, p * 100.0))
            .collect();
        format!("n={} [{}] zero_runs={:?}", self.total(), pct.join(" "), self.zero_runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_deltas_and_clamps_large_gaps() {
        let mut p = PollingTimeProfile::new(10);
        for t in [0, 1, 2, 4, 100] {
            p.update(t);
        }
        assert_eq!(p.frequency()[1], 2);
        assert_eq!(p.frequency()[2], 1);
        assert_eq!(p.frequency()[10], 1);
        assert_eq!(p.total(), 4);
    }

    #[test]
    fn counts_zero_runs() {
        let mut p = PollingTimeProfile::default();
        for t in [5, 5, 5, 6, 6, 7] {
            p.update(t);
        }
        // run of two zero deltas, then a run of one
        assert_eq!(p.zero_time_runs().get(&2), Some(&1));
        assert_eq!(p.zero_time_runs().get(&1), Some(&1));
    }

    #[test]
    fn stop_breaks_the_delta_chain() {
        let mut p = PollingTimeProfile::default();
        p.update(0);
        p.stop();
        p.update(1000);
        assert_eq!(p.total(), 0);
        let pct = p.profile_percent();
        assert!(pct.iter().all(|v| *v == 0.0));
    }
}
