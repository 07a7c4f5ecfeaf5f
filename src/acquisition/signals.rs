//! signals.rs
//! Cross-thread flags and live-value cells between a sensor worker and its owner.
//!
//! - `EventFlag`: set/clear/wait event. The worker's hot loop only ever does an atomic
//!   load; the mutex/condvar pair is touched by waiters and by `set()`.
//! - `WorkerSignals`: the full flag set (polling, draining, bias, quit, trigger) plus
//!   counters mirrored for diagnostics.
//! - `LiveForces`: single-writer, many-reader f32 cells (relaxed). Readers may see a
//!   stale or mixed set of channels; they are for display only, never for the record.

use std::{
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::acquisition::types::ForceChannel;

#[derive(Debug, Default)]
pub struct EventFlag {
    state: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl EventFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.state.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        self.state.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }

    /// Returns the flag state once it is set or the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_set() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.is_set();
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct WorkerSignals {
    /// Requested acquisition state; the worker loop follows it.
    pub polling: EventFlag,
    /// Set by the worker while a hand-off is in flight; cleared by the receiver.
    pub draining: EventFlag,
    pub bias_requested: EventFlag,
    pub bias_available: EventFlag,
    /// Set instead of `bias_available` when the last bias cycle failed.
    pub bias_failed: EventFlag,
    pub quit_request: EventFlag,
    /// Marks the next polled sample with `trigger[0] = 1`.
    pub trigger: EventFlag,
    /// Items sitting in the worker's accumulation buffer.
    pub pending: AtomicUsize,
    pub sample_cnt: AtomicU64,
    pub bias_n_samples: AtomicUsize,
}

impl WorkerSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn set_pending(&self, n: usize) {
        self.pending.store(n, Ordering::Release);
    }

    pub fn sample_cnt(&self) -> u64 {
        self.sample_cnt.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct LiveForces {
    cells: [AtomicU32; 6],
}

impl LiveForces {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn publish(&self, forces: &[f32; 6]) {
        for (cell, v) in self.cells.iter().zip(forces.iter()) {
            cell.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn get(&self, channel: ForceChannel) -> f32 {
        f32::from_bits(self.cells[channel.index()].load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> [f32; 6] {
        let mut out = [0.0; 6];
        for ch in ForceChannel::ALL {
            out[ch.index()] = self.get(ch);
        }
        out
    }
}
