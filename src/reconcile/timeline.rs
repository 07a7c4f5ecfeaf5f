//! timeline.rs
//! TimestampReconciler: replaces an irregular time column with a regular one.
//!
//! Per period:
//! 1. probe `[probe_start, probe_start + probe_len)` for the first sample whose
//!    next gap is at least a delay threshold (thresholds tried in order)
//! 2. that sample is the reference; the period's timeline is
//!    `t[ref] - ref * interval, ... ` in steps of `interval`, same length as the period
//! 3. drift between the period's sample count and its declared duration is logged
//!
//! Early samples of a period are often delayed by driver warm-up, so the anchor
//! is taken later in the period.

use log::{info, warn};

use crate::acquisition::types::LifecycleEvent;
use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::reconcile::periods::{RecordingPeriod, cross_validate, segment_by_events, segment_by_gap};

/// Result of reconciling one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub times: Vec<i64>,
    pub periods: Vec<RecordingPeriod>,
}

#[derive(Debug, Clone, Default)]
pub struct TimestampReconciler {
    config: ReconcileConfig,
}

impl TimestampReconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Index (within `times`) of the sample anchoring the regular timeline.
    /// `None` if no sample in the probe window qualifies.
    pub fn reference_sample(&self, times: &[i64]) -> Option<usize> {
        let start = self.config.reference_probe_start;
        let end = start.saturating_add(self.config.reference_probe_len).min(times.len());
        if start >= end {
            return None;
        }
        let probe = &times[start..end];
        self.config.delay_thresholds_ms.iter().find_map(|&threshold| {
            probe
                .windows(2)
                .position(|w| w[1] - w[0] >= threshold)
                .map(|i| start + i)
        })
    }

    /// Builds the regular timeline of one period window.
    pub fn regular_timeline(&self, times: &[i64], reference: usize) -> Vec<i64> {
        let interval = self.config.interval_ms;
        let first = times[reference] - reference as i64 * interval;
        (0..times.len() as i64).map(|k| first + k * interval).collect()
    }

    /// Segments `times` by gap and by `events`, cross-validates, and rebuilds
    /// every period. Nothing is returned if the segmentations disagree.
    pub fn reconcile(&self, times: &[i64], events: &[LifecycleEvent], device_id: u16) -> Result<Reconciled> {
        let windows = segment_by_gap(times, self.config.pause_criterion_ms);
        let event_periods = segment_by_events(events, device_id);
        let periods = cross_validate(&windows, &event_periods, self.config.allow_open_periods)?;

        let mut out = Vec::with_capacity(times.len());
        for (n, period) in periods.iter().enumerate() {
            self.log_drift(n + 1, period);

            let window = &times[period.start_idx..=period.end_idx];
            let reference = match self.reference_sample(window) {
                Some(r) => r,
                None => {
                    warn!(
                        "[Reconcile] period {}: no stable reference sample in probe window, using first sample",
                        n + 1
                    );
                    0
                }
            };
            out.extend(self.regular_timeline(window, reference));
        }

        Ok(Reconciled { times: out, periods })
    }

    fn log_drift(&self, n: usize, period: &RecordingPeriod) {
        let Some(end) = period.declared_end_time else {
            info!("[Reconcile] period {}: no pause time", n);
            return;
        };
        let declared = 1 + (end - period.declared_start_time).div_euclid(self.config.interval_ms.max(1));
        let diff = period.sample_count() as i64 - declared;
        if diff != 0 {
            info!("[Reconcile] period {}: sample difference of {}", n, diff);
        }
    }
}
