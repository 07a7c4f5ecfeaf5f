//! recorder.rs
//! DataRecorder: owns the sensor workers and the event source, drives the
//! start/pause/bias protocol and serializes everything into one data file.
//!
//! States: Idle → BiasPending → Paused ⇄ Recording → Closed
//!
//! On pause the output order is: each worker's buffer (sensor order), then
//! remote events, then soft triggers. Only per-device order is guaranteed.

use std::{path::{Path, PathBuf}, thread, time::Duration};

use dashmap::DashMap;
use log::{debug, error, info, warn};

use crate::acquisition::{
    clock::Clock,
    source::{AnalogSource, SimulatedSource, Waveform},
    types::{ForceChannel, RecordItem, RemoteEvent, SoftTrigger, WorkerItem},
    worker::{SensorWorker, WorkerOptions},
};
use crate::config::{RecorderConfig, SensorSettings};
use crate::error::{DaqError, Result};
use crate::recording::{
    event_source::EventSource,
    remote::RemoteCommand,
    udp::{EventChannel, UdpConnection},
    writer::{DataFile, FileOptions, RowFormat, SensorHeader},
};

const BIAS_WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    BiasPending,
    Paused,
    Recording,
    Closed,
}

pub struct DataRecorder {
    config: RecorderConfig,
    clock: Clock,
    workers: Vec<SensorWorker>,
    construction_errors: Vec<(u16, DaqError)>,
    event_source: Option<EventSource>,
    soft_triggers: Vec<SoftTrigger>,
    file: Option<DataFile>,
    state: RecorderState,
    sample_counts: DashMap<u16, u64>,
}

impl DataRecorder {
    /// Starts one worker per configured sensor, with a source from `make_source`.
    ///
    /// A sensor whose construction fails (bad settings, missing calibration) is
    /// left out and its error kept in `construction_errors()`; the recorder
    /// fails only if no sensor could be started. The event source uses
    /// `event_channel`, or a UDP connection if `poll_remote` is set.
    pub fn new<F>(mut config: RecorderConfig, mut make_source: F, event_channel: Option<Box<dyn EventChannel>>) -> Result<Self>
    where
        F: FnMut(&SensorSettings) -> Result<Box<dyn AnalogSource>>,
    {
        if config.sensors.is_empty() {
            return Err(DaqError::InvalidSettings("no sensors configured".into()));
        }
        for (i, s) in config.sensors.iter().enumerate() {
            if config.sensors[..i].iter().any(|o| o.device_id == s.device_id) {
                return Err(DaqError::InvalidSettings(format!("device id {} used twice", s.device_id)));
            }
        }
        // rows of several sensors can't be told apart without their device id
        if config.sensors.len() > 1 && !config.columns.device_id {
            info!("[Recorder] {} sensors, adding the device_tag column", config.sensors.len());
            config.columns.device_id = true;
        }

        let clock = Clock::new();
        let options = WorkerOptions {
            hand_off: config.hand_off,
            chunk_size: config.chunk_size,
            pause_grace: Duration::from_millis(config.pause_grace_ms),
            ..WorkerOptions::default()
        };

        let mut workers = Vec::with_capacity(config.sensors.len());
        let mut construction_errors = Vec::new();
        for settings in &config.sensors {
            match make_source(settings).and_then(|src| SensorWorker::spawn(settings, src, clock, options)) {
                Ok(w) => {
                    info!("[Recorder] sensor {} (device {}) ready", settings.sensor_name, settings.device_id);
                    workers.push(w);
                }
                Err(e) => {
                    error!("[Recorder] sensor {} (device {}) not started: {}", settings.sensor_name, settings.device_id, e);
                    construction_errors.push((settings.device_id, e));
                }
            }
        }
        if workers.is_empty() {
            return Err(construction_errors
                .pop()
                .map(|(_, e)| e)
                .unwrap_or_else(|| DaqError::InvalidSettings("no sensor started".into())));
        }

        let channel = match event_channel {
            Some(c) => Some(c),
            None if config.poll_remote => Some(Box::new(UdpConnection::bind(config.udp_port)?) as Box<dyn EventChannel>),
            None => None,
        };
        let event_source = match channel {
            Some(c) => {
                let triggers = workers.iter().map(|w| w.signals().clone()).collect();
                Some(EventSource::spawn(c, clock, triggers)?)
            }
            None => None,
        };

        let sample_counts = DashMap::new();
        for w in &workers {
            sample_counts.insert(w.device_id(), 0);
        }

        Ok(Self {
            config,
            clock,
            workers,
            construction_errors,
            event_source,
            soft_triggers: Vec::new(),
            file: None,
            state: RecorderState::Idle,
            sample_counts,
        })
    }

    /// Recorder over simulated sources (one sinusoid per sensor).
    pub fn simulated(config: RecorderConfig, event_channel: Option<Box<dyn EventChannel>>) -> Result<Self> {
        Self::new(
            config,
            |s| Ok(Box::new(SimulatedSource::new(s.rate_hz, Waveform::Sine).with_noise(0.01)) as Box<dyn AnalogSource>),
            event_channel,
        )
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn workers(&self) -> &[SensorWorker] {
        &self.workers
    }

    /// Sensors that failed to start, with the reason.
    pub fn construction_errors(&self) -> &[(u16, DaqError)] {
        &self.construction_errors
    }

    pub fn event_source(&self) -> Option<&EventSource> {
        self.event_source.as_ref()
    }

    /// Samples received from `device_id` so far.
    pub fn sample_count(&self, device_id: u16) -> u64 {
        self.sample_counts.get(&device_id).map(|c| *c).unwrap_or(0)
    }

    /// Latest live value of one channel (display only).
    pub fn get_force(&self, device_id: u16, channel: ForceChannel) -> Option<f32> {
        self.workers
            .iter()
            .find(|w| w.device_id() == device_id)
            .map(|w| w.get_force(channel))
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    // ========================================================================
    // Data file
    // ========================================================================

    /// Opens a new data file (closing the current one). Data is only written
    /// while a file is open. Returns the path actually used.
    pub fn open_data_file(&mut self, filename: &str, opts: &FileOptions) -> Result<PathBuf> {
        self.close_data_file()?;
        let sensors: Vec<SensorHeader> = self
            .workers
            .iter()
            .map(|w| SensorHeader {
                device_id: w.device_id(),
                name: w.name().to_string(),
                calibration_file: w.calibration_file.clone(),
            })
            .collect();
        let format = RowFormat::new(self.config.columns, self.config.float_decimals);
        let file = DataFile::create(filename, &sensors, format, opts)?;
        let path = file.path().to_path_buf();
        self.file = Some(file);
        Ok(path)
    }

    pub fn close_data_file(&mut self) -> Result<()> {
        if let Some(mut f) = self.file.take() {
            f.close()?;
        }
        Ok(())
    }

    fn save(&mut self, items: &[RecordItem]) -> Result<()> {
        if let Some(f) = self.file.as_mut() {
            f.write_items(items)?;
        }
        Ok(())
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Pauses, biases every worker over `n_samples` raw reads and waits for all of them.
    pub fn determine_biases(&mut self, n_samples: usize) -> Result<()> {
        if self.state == RecorderState::Closed {
            return Err(DaqError::Protocol("recorder is closed".into()));
        }
        self.pause_recording()?;
        self.state = RecorderState::BiasPending;

        for w in &self.workers {
            w.determine_bias(n_samples)?;
        }
        for w in &self.workers {
            while !w.wait_bias_available(BIAS_WAIT_SLICE) {
                if w.bias_failed() {
                    return Err(DaqError::Source(format!("bias of sensor '{}' failed", w.name())));
                }
                if !w.is_alive() {
                    return Err(DaqError::Source(format!("sensor '{}' exited during bias", w.name())));
                }
            }
        }
        self.state = RecorderState::Paused;
        info!("[Recorder] biases determined ({} samples)", n_samples);
        Ok(())
    }

    /// Starts polling on every worker. Rejected unless every worker has a bias.
    pub fn start_recording(&mut self) -> Result<()> {
        match self.state {
            RecorderState::Closed => return Err(DaqError::Protocol("recorder is closed".into())),
            RecorderState::Recording => return Ok(()),
            _ => {}
        }
        if let Some(w) = self.workers.iter().find(|w| !w.bias_available()) {
            return Err(DaqError::Protocol(format!(
                "sensor '{}' can't be started before its bias has been determined",
                w.name()
            )));
        }

        for w in &self.workers {
            w.start_polling();
        }
        self.state = RecorderState::Recording;
        self.feedback("started");
        debug!("[Recorder] recording");
        Ok(())
    }

    /// Stops polling, collects and writes everything buffered, and returns it.
    pub fn pause_recording(&mut self) -> Result<Vec<RecordItem>> {
        if self.state == RecorderState::Closed {
            return Ok(Vec::new());
        }
        let was_recording = self.state == RecorderState::Recording;
        for w in &self.workers {
            w.pause_polling();
        }
        if was_recording {
            thread::sleep(Duration::from_millis(self.config.pause_grace_ms));
            self.state = RecorderState::Paused;
            self.feedback("paused");
        }

        let mut data = Vec::new();
        for i in 0..self.workers.len() {
            let buffer = self.workers[i].get_buffer();
            let items = self.count_samples(buffer);
            self.save(&items)?;
            data.extend(items);
        }

        data.extend(self.process_remote_events()?.into_iter().map(RecordItem::Remote));

        let triggers: Vec<RecordItem> = self.soft_triggers.drain(..).map(RecordItem::SoftTrigger).collect();
        self.save(&triggers)?;
        data.extend(triggers);

        if was_recording {
            info!("[Recorder] paused, {} items collected", data.len());
        }
        Ok(data)
    }

    fn count_samples(&self, buffer: Vec<WorkerItem>) -> Vec<RecordItem> {
        buffer
            .into_iter()
            .map(|item| {
                if let WorkerItem::Sample(s) = &item {
                    *self.sample_counts.entry(s.device_id).or_insert(0) += 1;
                }
                RecordItem::from(item)
            })
            .collect()
    }

    /// Drains the event source, writes recorded payloads and returns all events
    /// (commands included) so the caller can react to them.
    pub fn process_remote_events(&mut self) -> Result<Vec<RemoteEvent>> {
        let Some(src) = self.event_source.as_ref() else {
            return Ok(Vec::new());
        };
        if let Some(connected) = src.connection_changed() {
            info!("[Recorder] remote control {}", if connected { "connected" } else { "disconnected" });
        }
        let events = src.drain();
        let items: Vec<RecordItem> = events.iter().cloned().map(RecordItem::Remote).collect();
        self.save(&items)?;
        Ok(events)
    }

    /// Queues a soft trigger; written at the next pause. Defaults to now.
    pub fn save_soft_trigger(&mut self, code: impl Into<String>, time: Option<i64>) {
        let time = time.unwrap_or_else(|| self.clock.time());
        self.soft_triggers.push(SoftTrigger { time, code: code.into() });
    }

    /// Sends a payload to the remote peer, if there is an event source.
    pub fn send_remote(&self, payload: impl Into<Vec<u8>>) {
        if let Some(src) = &self.event_source {
            src.send(payload);
        }
    }

    fn feedback(&self, msg: &str) {
        if let Some(src) = &self.event_source {
            if src.is_connected() {
                src.send(RemoteCommand::Feedback(msg.to_string()).encode());
            }
        }
    }

    /// Pauses, writes the remaining data, closes the file and stops every
    /// thread. Safe to call repeatedly.
    pub fn quit(&mut self) -> Result<Vec<RecordItem>> {
        if self.state == RecorderState::Closed {
            return Ok(Vec::new());
        }
        let paused = self.pause_recording();

        let mut leftover = Vec::new();
        for i in 0..self.workers.len() {
            let items = self.workers[i].join();
            leftover.extend(self.count_samples(items));
        }
        if !leftover.is_empty() {
            warn!("[Recorder] {} items arrived during shutdown", leftover.len());
            if let Err(e) = self.save(&leftover) {
                error!("[Recorder] can't write shutdown items: {}", e);
            }
        }

        let closed = self.close_data_file();
        if let Some(mut src) = self.event_source.take() {
            src.quit();
        }
        self.state = RecorderState::Closed;
        info!("[Recorder] quit");

        let mut data = paused?;
        closed?;
        data.extend(leftover);
        Ok(data)
    }
}

impl Drop for DataRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.quit() {
            error!("[Recorder] shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::types::LifecycleKind;
    use crate::reconcile::reader::RawRecording;
    use crate::recording::event_source::LoopbackChannel;
    use std::fs;

    fn config(ids: &[u16]) -> RecorderConfig {
        RecorderConfig {
            sensors: ids.iter().map(|&id| SensorSettings::new(id, &format!("FT{}", id))).collect(),
            pause_grace_ms: 50,
            bias_samples: 10,
            ..RecorderConfig::default()
        }
    }

    fn file_opts(dir: &Path) -> FileOptions {
        FileOptions {
            directory: dir.to_path_buf(),
            ..FileOptions::default()
        }
    }

    fn lifecycle(items: &[RecordItem], device: u16) -> Vec<LifecycleKind> {
        items
            .iter()
            .filter_map(|i| match i {
                RecordItem::Lifecycle(ev) if ev.device_id == device => Some(ev.kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_requires_bias() {
        let mut rec = DataRecorder::simulated(config(&[1]), None).unwrap();
        let err = rec.start_recording().unwrap_err();
        assert!(matches!(err, DaqError::Protocol(_)));
        assert_eq!(rec.state(), RecorderState::Idle);
        rec.quit().unwrap();
    }

    #[test]
    fn record_pause_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = DataRecorder::simulated(config(&[1, 2]), None).unwrap();
        let path = rec.open_data_file("session.csv", &file_opts(dir.path())).unwrap();

        rec.determine_biases(10).unwrap();
        assert_eq!(rec.state(), RecorderState::Paused);
        rec.start_recording().unwrap();
        thread::sleep(Duration::from_millis(60));
        rec.save_soft_trigger("block 1", None);
        let data = rec.pause_recording().unwrap();

        for device in [1, 2] {
            assert_eq!(lifecycle(&data, device), vec![LifecycleKind::Started, LifecycleKind::Paused]);
            let n = data
                .iter()
                .filter(|i| matches!(i, RecordItem::Sample(s) if s.device_id == device))
                .count() as u64;
            assert!(n > 0);
            assert_eq!(rec.sample_count(device), n);
        }
        assert!(matches!(data.last(), Some(RecordItem::SoftTrigger(t)) if t.code == "block 1"));

        rec.quit().unwrap();
        assert_eq!(rec.state(), RecorderState::Closed);
        assert!(rec.quit().unwrap().is_empty());
        assert!(rec.start_recording().is_err());

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("#T,"));
        assert!(text.contains("started:1"));
        assert!(text.contains("pause:2"));
        assert!(text.lines().last().unwrap().ends_with("block 1"));
    }

    #[test]
    fn several_sensors_always_write_their_device_id() {
        let single = DataRecorder::simulated(config(&[1]), None).unwrap();
        assert!(!single.config().columns.device_id);
        drop(single);

        let dir = tempfile::tempdir().unwrap();
        let mut rec = DataRecorder::simulated(config(&[1, 2]), None).unwrap();
        assert!(rec.config().columns.device_id);
        let path = rec.open_data_file("tagged.csv", &file_opts(dir.path())).unwrap();
        rec.determine_biases(10).unwrap();
        rec.start_recording().unwrap();
        thread::sleep(Duration::from_millis(40));
        let data = rec.pause_recording().unwrap();
        rec.quit().unwrap();

        let raw = RawRecording::read(&path).unwrap();
        assert!(raw.has_device_column());
        for device in [1u16, 2] {
            let n = data
                .iter()
                .filter(|i| matches!(i, RecordItem::Sample(s) if s.device_id == device))
                .count();
            assert_eq!(raw.timestamps(device).len(), n);
        }
    }

    #[test]
    fn broken_sensor_does_not_stop_the_others() {
        let empty = tempfile::tempdir().unwrap();
        let mut cfg = config(&[1, 2]);
        cfg.sensors[1].convert_to_ft = true;
        cfg.sensors[1].calibration_folder = empty.path().to_path_buf();

        let mut rec = DataRecorder::simulated(cfg, None).unwrap();
        assert_eq!(rec.workers().len(), 1);
        assert_eq!(rec.construction_errors().len(), 1);
        assert_eq!(rec.construction_errors()[0].0, 2);
        assert!(rec.construction_errors()[0].1.is_construction_error());
        rec.quit().unwrap();
    }

    #[test]
    fn duplicate_device_ids_are_rejected() {
        let err = DataRecorder::simulated(config(&[3, 3]), None).err().unwrap();
        assert!(matches!(err, DaqError::InvalidSettings(_)));
    }

    #[test]
    fn remote_commands_are_returned_but_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, peer) = LoopbackChannel::pair();
        let mut rec = DataRecorder::simulated(config(&[1]), Some(Box::new(channel))).unwrap();
        let path = rec.open_data_file("remote.csv", &file_opts(dir.path())).unwrap();

        peer.inject(b"cue A");
        peer.inject(b"$PSE");
        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(rec.process_remote_events().unwrap());
            if events.len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(events.len(), 2);
        assert_eq!(RemoteCommand::parse(&events[1].payload), Some(RemoteCommand::Pause));

        rec.quit().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("#UDP,").count(), 1);
        assert!(text.contains(",cue A"));
        assert!(!text.contains("$PSE"));
    }

    #[test]
    fn remote_data_triggers_the_next_sample() {
        let (channel, peer) = LoopbackChannel::pair();
        let mut rec = DataRecorder::simulated(config(&[1]), Some(Box::new(channel))).unwrap();
        rec.determine_biases(10).unwrap();
        rec.start_recording().unwrap();
        thread::sleep(Duration::from_millis(20));
        peer.inject(b"stimulus");
        thread::sleep(Duration::from_millis(40));
        let data = rec.pause_recording().unwrap();

        let marked = data
            .iter()
            .filter(|i| matches!(i, RecordItem::Sample(s) if s.trigger[0] == 1.0))
            .count();
        assert_eq!(marked, 1);
        assert!(data.iter().any(|i| matches!(i, RecordItem::Remote(ev) if ev.payload == b"stimulus")));
        rec.quit().unwrap();
    }
}
