//! periods.rs
//! Two independent segmentations of a recording into acquisition periods.
//! - by gap: a timestamp difference above the pause criterion ends a period
//! - by event: each `Started` is paired with the next `Paused` of the same device
//! The reconciler only proceeds if both agree on the number of periods.

use log::warn;

use crate::acquisition::types::{LifecycleEvent, LifecycleKind};
use crate::error::{DaqError, Result};

/// One continuous acquisition interval of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingPeriod {
    /// First and last sample index (inclusive) in the device's time column.
    pub start_idx: usize,
    pub end_idx: usize,
    pub declared_start_time: i64,
    /// `None` if the period was never closed by a `Paused` event.
    pub declared_end_time: Option<i64>,
}

impl RecordingPeriod {
    pub fn sample_count(&self) -> usize {
        self.end_idx - self.start_idx + 1
    }
}

/// A Started/Paused pair from the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPeriod {
    pub start: i64,
    pub end: Option<i64>,
}

/// Inclusive `(start_idx, end_idx)` windows covering all of `times`.
pub fn segment_by_gap(times: &[i64], pause_criterion: i64) -> Vec<(usize, usize)> {
    if times.is_empty() {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut start = 0;
    for (i, pair) in times.windows(2).enumerate() {
        if pair[1] - pair[0] > pause_criterion {
            windows.push((start, i));
            start = i + 1;
        }
    }
    windows.push((start, times.len() - 1));
    windows
}

/// Pairs the `device_id` lifecycle events (time-sorted) into periods.
///
/// A trailing `Started` yields `end = None`. A second `Started` while a period
/// is open closes it with `end = None` and opens a new one. A `Paused` with no
/// open period is ignored.
pub fn segment_by_events(events: &[LifecycleEvent], device_id: u16) -> Vec<EventPeriod> {
    let mut evs: Vec<&LifecycleEvent> = events.iter().filter(|e| e.device_id == device_id).collect();
    evs.sort_by_key(|e| e.time);

    let mut periods = Vec::new();
    let mut open: Option<i64> = None;
    for ev in evs {
        match ev.kind {
            LifecycleKind::Started => {
                if let Some(start) = open.replace(ev.time) {
                    warn!("[Reconcile] device {}: started at {} without pause", device_id, start);
                    periods.push(EventPeriod { start, end: None });
                }
            }
            LifecycleKind::Paused => match open.take() {
                Some(start) => periods.push(EventPeriod { start, end: Some(ev.time) }),
                None => warn!("[Reconcile] device {}: pause at {} without start, ignored", device_id, ev.time),
            },
        }
    }
    if let Some(start) = open {
        periods.push(EventPeriod { start, end: None });
    }
    periods
}

/// Matches gap windows with event periods one to one.
///
/// Fails if the counts differ. Unless `allow_open_periods`, a period without a
/// `Paused` event counts as missing: a recorder always pauses before closing,
/// so an open period means an event was lost.
pub fn cross_validate(
    windows: &[(usize, usize)],
    events: &[EventPeriod],
    allow_open_periods: bool,
) -> Result<Vec<RecordingPeriod>> {
    let usable = if allow_open_periods {
        events.len()
    } else {
        events.iter().filter(|p| p.end.is_some()).count()
    };
    if windows.len() != events.len() || usable != events.len() {
        return Err(DaqError::ReconciliationInconsistency {
            from_timestamps: windows.len(),
            from_events: usable,
        });
    }
    Ok(windows
        .iter()
        .zip(events)
        .map(|(&(start_idx, end_idx), ev)| RecordingPeriod {
            start_idx,
            end_idx,
            declared_start_time: ev.start,
            declared_end_time: ev.end,
        })
        .collect())
}
