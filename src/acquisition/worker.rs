//! worker.rs
//! SensorWorker: one acquisition thread per sensor.
//!
//! The owner never touches the sensor directly; it only flips flags in
//! `WorkerSignals` and reads the hand-off channel / live cells.
//!
//! Loop (one iteration per poll):
//! 1. idle → polling: start the source, emit `Started`.
//! 2. poll, convert, publish live values, buffer (or stream) the sample.
//! 3. polling → idle: stop the source, emit `Paused`.
//! 4. idle with a non-empty buffer: raise `draining`, ship in chunks, wait for the receiver.
//! 5. idle with a bias request: determine bias, raise `bias_available`.

use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};

use crate::acquisition::{
    clock::{Clock, sleeper},
    handoff::{self, CHUNK_DEPTH, HandOffReceiver, HandOffSender, STREAM_DEPTH},
    sensor::Sensor,
    signals::{LiveForces, WorkerSignals},
    source::AnalogSource,
    types::{ForceChannel, ForceSample, LifecycleEvent, LifecycleKind, WorkerItem},
};
use crate::config::{DEFAULT_CHUNK_SIZE, HandOffMode, SensorSettings};
use crate::error::{DaqError, Result};
use crate::utils::{polling_profile::PollingTimeProfile, priority};

/// Upper bound on how long an idle worker sleeps before re-checking its flags.
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// Poll attempts after the first failure before acquisition is stopped.
const MAX_POLL_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub hand_off: HandOffMode,
    pub chunk_size: usize,
    /// Capacity of the streaming channel; a full channel falls back to buffering.
    pub stream_depth: usize,
    /// Wait between `pause_polling()` and collecting the buffer on shutdown.
    pub pause_grace: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            hand_off: HandOffMode::Buffered,
            chunk_size: DEFAULT_CHUNK_SIZE,
            stream_depth: STREAM_DEPTH,
            pause_grace: Duration::from_millis(100),
        }
    }
}

pub struct SensorWorker {
    pub settings: SensorSettings,
    pub calibration_file: Option<PathBuf>,
    signals: Arc<WorkerSignals>,
    live: Arc<LiveForces>,
    handoff: HandOffReceiver,
    handle: Option<JoinHandle<()>>,
    options: WorkerOptions,
}

impl SensorWorker {
    /// Builds the sensor (calibration lookup included) and starts its thread.
    /// Construction errors are returned before any thread exists.
    pub fn spawn(
        settings: &SensorSettings,
        source: Box<dyn AnalogSource>,
        clock: Clock,
        options: WorkerOptions,
    ) -> Result<Self> {
        let sensor = Sensor::new(settings, source, clock)?;
        Self::spawn_with_sensor(settings, sensor, options)
    }

    pub fn spawn_with_sensor(settings: &SensorSettings, sensor: Sensor, options: WorkerOptions) -> Result<Self> {
        settings.validate()?;
        let signals = Arc::new(WorkerSignals::new());
        let live = Arc::new(LiveForces::new());

        let depth = match options.hand_off {
            HandOffMode::Buffered => CHUNK_DEPTH,
            HandOffMode::Streaming => options.stream_depth.max(1),
        };
        let (tx, rx) = handoff::channel(depth, options.chunk_size);
        let calibration_file = sensor.calibration_file.clone();

        let worker_loop = WorkerLoop {
            sensor,
            signals: signals.clone(),
            live: live.clone(),
            tx,
            mode: options.hand_off,
        };
        let priority = settings.priority;
        let cpu_core = settings.cpu_core;
        let handle = thread::Builder::new()
            .name(format!("sensor-{}", settings.device_id))
            .spawn(move || {
                let label = worker_loop.sensor.name.clone();
                priority::apply_to_current_thread(&label, priority, cpu_core);
                worker_loop.run();
            })?;

        Ok(Self {
            settings: settings.clone(),
            calibration_file,
            signals,
            live,
            handoff: rx,
            handle: Some(handle),
            options,
        })
    }

    pub fn device_id(&self) -> u16 {
        self.settings.device_id
    }

    pub fn name(&self) -> &str {
        &self.settings.sensor_name
    }

    pub fn signals(&self) -> &Arc<WorkerSignals> {
        &self.signals
    }

    pub fn start_polling(&self) {
        self.signals.polling.set();
    }

    pub fn pause_polling(&self) {
        self.signals.polling.clear();
    }

    pub fn is_polling(&self) -> bool {
        self.signals.polling.is_set()
    }

    /// Requests a bias cycle over `n_samples` raw reads. Only valid while paused.
    pub fn determine_bias(&self, n_samples: usize) -> Result<()> {
        if self.signals.polling.is_set() {
            return Err(DaqError::Protocol(format!(
                "bias of sensor '{}' requested while polling",
                self.name()
            )));
        }
        self.signals
            .bias_n_samples
            .store(n_samples.max(1), std::sync::atomic::Ordering::Relaxed);
        self.signals.bias_available.clear();
        self.signals.bias_failed.clear();
        self.signals.bias_requested.set();
        Ok(())
    }

    pub fn bias_available(&self) -> bool {
        self.signals.bias_available.is_set()
    }

    pub fn wait_bias_available(&self, timeout: Duration) -> bool {
        self.signals.bias_available.wait_timeout(timeout)
    }

    pub fn bias_failed(&self) -> bool {
        self.signals.bias_failed.is_set()
    }

    /// Marks the next polled sample with `trigger[0] = 1`.
    pub fn trigger(&self) {
        self.signals.trigger.set();
    }

    /// Everything handed off since the previous call, in production order.
    /// Blocks while a drain is in flight.
    pub fn get_buffer(&self) -> Vec<WorkerItem> {
        self.handoff.collect(&self.signals, || self.is_alive())
    }

    pub fn get_force(&self, channel: ForceChannel) -> f32 {
        self.live.get(channel)
    }

    pub fn live_forces(&self) -> [f32; 6] {
        self.live.snapshot()
    }

    pub fn sample_cnt(&self) -> u64 {
        self.signals.sample_cnt()
    }

    pub fn buffer_size(&self) -> usize {
        self.signals.pending()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Pauses, collects whatever is still buffered and stops the thread.
    /// Safe to call repeatedly and after the thread has already exited.
    pub fn join(&mut self) -> Vec<WorkerItem> {
        if self.handle.is_none() {
            return Vec::new();
        }

        if self.is_polling() {
            self.pause_polling();
            thread::sleep(self.options.pause_grace);
        }
        let leftover = self.get_buffer();

        self.signals.quit_request.set();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("[{}] worker thread panicked", self.name());
            }
        }
        debug!("[{}] joined, {} items collected at shutdown", self.name(), leftover.len());
        leftover
    }
}

impl Drop for SensorWorker {
    fn drop(&mut self) {
        let leftover = self.join();
        if !leftover.is_empty() {
            warn!(
                "[{}] {} buffered items discarded at drop",
                self.name(),
                leftover.len()
            );
        }
    }
}

/// State owned by the worker thread.
struct WorkerLoop {
    sensor: Sensor,
    signals: Arc<WorkerSignals>,
    live: Arc<LiveForces>,
    tx: HandOffSender,
    mode: HandOffMode,
}

impl WorkerLoop {
    fn run(mut self) {
        let mut buffer: Vec<WorkerItem> = Vec::new();
        let mut is_polling = false;
        let mut profile = PollingTimeProfile::default();
        let mut seq: u64 = self.signals.sample_cnt();
        self.signals.set_pending(0);

        while !self.signals.quit_request.is_set() {
            if self.signals.polling.is_set() {
                // ============================================================
                // idle → polling
                // ============================================================
                if !is_polling {
                    if let Err(e) = self.sensor.start_data_acquisition() {
                        error!("[{}] can't start acquisition: {}", self.sensor.name, e);
                        self.signals.polling.clear();
                        continue;
                    }
                    let ev = self.lifecycle(LifecycleKind::Started);
                    self.emit(&mut buffer, ev);
                    info!("[{}] sensor started (device {})", self.sensor.name, self.sensor.device_id);
                    is_polling = true;
                }

                match self.poll_with_retry(seq + 1) {
                    Ok(mut sample) => {
                        seq += 1;
                        profile.update(sample.time);
                        self.live.publish(&sample.forces);
                        self.signals.sample_cnt.store(seq, std::sync::atomic::Ordering::Relaxed);
                        if self.signals.trigger.is_set() {
                            self.signals.trigger.clear();
                            sample.trigger[0] = 1.0;
                        }
                        self.emit(&mut buffer, WorkerItem::Sample(sample));
                    }
                    Err(e) => {
                        error!("[{}] polling failed, stopping acquisition: {}", self.sensor.name, e);
                        self.signals.polling.clear();
                    }
                }
            } else {
                // ============================================================
                // polling → idle
                // ============================================================
                if is_polling {
                    self.sensor.stop_data_acquisition();
                    let ev = self.lifecycle(LifecycleKind::Paused);
                    self.emit(&mut buffer, ev);
                    info!("[{}] sensor paused, profile {}", self.sensor.name, profile.summary());
                    profile.stop();
                    is_polling = false;
                }

                if !buffer.is_empty() {
                    self.drain(&mut buffer);
                }

                if self.signals.bias_requested.is_set() {
                    let n = self.signals.bias_n_samples.load(std::sync::atomic::Ordering::Relaxed);
                    self.signals.bias_requested.clear();
                    match self.sensor.determine_bias(n) {
                        Ok(_) => self.signals.bias_available.set(),
                        Err(e) => {
                            error!("[{}] bias determination failed: {}", self.sensor.name, e);
                            self.signals.bias_failed.set();
                        }
                    }
                }

                if !self.signals.quit_request.is_set() {
                    self.signals.polling.wait_timeout(IDLE_WAIT);
                }
            }
        }

        self.sensor.stop_data_acquisition();
        if !buffer.is_empty() {
            warn!("[{}] quit with {} undelivered items", self.sensor.name, buffer.len());
        }
        self.signals.set_pending(0);
        info!("[{}] sensor quit, {} samples", self.sensor.name, seq);
    }

    fn lifecycle(&self, kind: LifecycleKind) -> WorkerItem {
        WorkerItem::Lifecycle(LifecycleEvent {
            time: self.sensor.clock().time(),
            device_id: self.sensor.device_id,
            kind,
        })
    }

    fn emit(&self, buffer: &mut Vec<WorkerItem>, item: WorkerItem) {
        match self.mode {
            // Once anything is buffered, keep buffering so the order survives.
            HandOffMode::Streaming if buffer.is_empty() => {
                if let Err(back) = self.tx.push(item) {
                    buffer.extend(back);
                }
            }
            _ => buffer.push(item),
        }
        self.signals.set_pending(buffer.len());
    }

    fn drain(&self, buffer: &mut Vec<WorkerItem>) {
        self.signals.draining.set();
        if !self.tx.ship(buffer, &self.signals) {
            warn!("[{}] hand-off aborted, receiver gone", self.sensor.name);
            buffer.clear();
            self.signals.set_pending(0);
            self.signals.draining.clear();
            return;
        }
        self.signals.set_pending(0);

        let sleeper = sleeper();
        while self.signals.draining.is_set() && !self.signals.quit_request.is_set() {
            sleeper.sleep(Duration::from_millis(2));
        }
    }

    fn poll_with_retry(&mut self, seq: u64) -> Result<ForceSample> {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.sensor.poll_data(seq) {
                Ok(sample) => return Ok(sample),
                Err(e) if attempt < MAX_POLL_RETRIES => {
                    attempt += 1;
                    warn!("[{}] poll failed (attempt {}): {}", self.sensor.name, attempt, e);
                    thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
