//! sensor.rs
//! One force/torque sensor: Analog Source + Calibration Transform + session clock.
//! - poll_data(): read → bias/convert → reverse channels → trigger noise floor → timestamp.
//! - determine_bias(): averages raw voltages (no conversion) and installs them as zero offset.

use std::path::PathBuf;

use log::info;

use crate::acquisition::{
    calibration::{CalibrationTransform, MatrixCalibration, VoltagePassThrough, find_calibration_file},
    clock::Clock,
    source::AnalogSource,
    types::ForceSample,
};
use crate::config::SensorSettings;
use crate::error::Result;

/// Trigger readings below this magnitude are line noise and recorded as 0.
pub const TRIGGER_THRESHOLD: f32 = 0.9;

pub struct Sensor {
    pub device_id: u16,
    pub name: String,
    pub calibration_file: Option<PathBuf>,
    source: Box<dyn AnalogSource>,
    transform: Box<dyn CalibrationTransform>,
    reverse: Vec<usize>,
    clock: Clock,
}

impl Sensor {
    /// Builds the sensor described by `settings`.
    ///
    /// With `convert_to_ft` the calibration file is looked up by sensor name;
    /// a missing or malformed file fails construction of this sensor.
    pub fn new(settings: &SensorSettings, source: Box<dyn AnalogSource>, clock: Clock) -> Result<Self> {
        settings.validate()?;
        let (transform, calibration_file): (Box<dyn CalibrationTransform>, _) = if settings.convert_to_ft {
            let path = find_calibration_file(&settings.calibration_folder, &settings.sensor_name)?;
            (Box::new(MatrixCalibration::from_file(&path)?), Some(path))
        } else {
            (Box::new(VoltagePassThrough::new()), None)
        };
        let mut sensor = Self::with_transform(settings, source, transform, clock)?;
        sensor.calibration_file = calibration_file;
        Ok(sensor)
    }

    pub fn with_transform(
        settings: &SensorSettings,
        source: Box<dyn AnalogSource>,
        transform: Box<dyn CalibrationTransform>,
        clock: Clock,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            device_id: settings.device_id,
            name: settings.sensor_name.clone(),
            calibration_file: None,
            source,
            transform,
            reverse: settings.reverse_channels.iter().map(|c| c.index()).collect(),
            clock,
        })
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn is_acquiring(&self) -> bool {
        self.source.is_running()
    }

    pub fn start_data_acquisition(&mut self) -> Result<()> {
        self.source.start()
    }

    pub fn stop_data_acquisition(&mut self) {
        self.source.stop();
    }

    /// Polls one sample and stamps it with the session clock.
    pub fn poll_data(&mut self, seq: u64) -> Result<ForceSample> {
        let raw = self.source.read()?;
        let mut forces = self.transform.convert(&raw.voltages);
        for &i in &self.reverse {
            forces[i] = -forces[i];
        }
        let mut trigger = raw.trigger;
        for t in trigger.iter_mut() {
            if t.abs() < TRIGGER_THRESHOLD {
                *t = 0.0;
            }
        }
        Ok(ForceSample {
            time: self.clock.time(),
            device_id: self.device_id,
            seq,
            forces,
            trigger,
        })
    }

    /// Averages `n_samples` raw reads per gauge and installs the mean as bias.
    /// Leaves the source in the state it was found in.
    pub fn determine_bias(&mut self, n_samples: usize) -> Result<[f32; 6]> {
        let was_running = self.source.is_running();
        self.source.start()?;

        let mut sum = [0.0f64; 6];
        let n = n_samples.max(1);
        let mut result = Ok(());
        for _ in 0..n {
            match self.source.read() {
                Ok(raw) => {
                    for (acc, v) in sum.iter_mut().zip(raw.voltages.iter()) {
                        *acc += *v as f64;
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if !was_running {
            self.source.stop();
        }
        result?;

        let mut mean = [0.0f32; 6];
        for (m, s) in mean.iter_mut().zip(sum.iter()) {
            *m = (*s / n as f64) as f32;
        }
        self.transform.bias(&mean);
        info!("[{}] bias determined from {} samples: {:?}", self.name, n, mean);
        Ok(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::source::{RawSample, SimulatedSource, Waveform};
    use crate::acquisition::types::ForceChannel;
    use crate::error::DaqError;

    struct FixedSource {
        sample: RawSample,
        running: bool,
    }

    impl AnalogSource for FixedSource {
        fn start(&mut self) -> Result<()> {
            self.running = true;
            Ok(())
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn read(&mut self) -> Result<RawSample> {
            Ok(self.sample)
        }
    }

    fn fixed(voltages: [f32; 6], trigger: [f32; 2]) -> Box<dyn AnalogSource> {
        Box::new(FixedSource {
            sample: RawSample { voltages, trigger },
            running: false,
        })
    }

    #[test]
    fn bias_then_identical_inputs_convert_to_zero() {
        let settings = SensorSettings::new(1, "FT1");
        let mut sensor = Sensor::new(&settings, fixed([1.5, -0.2, 3.0, 0.1, 0.0, 7.0], [0.0; 2]), Clock::new()).unwrap();

        sensor.determine_bias(100).unwrap();
        assert!(!sensor.is_acquiring(), "bias must leave a stopped source stopped");

        sensor.start_data_acquisition().unwrap();
        for seq in 1..=100 {
            let s = sensor.poll_data(seq).unwrap();
            assert!(s.forces.iter().all(|f| f.abs() < 1e-5), "{:?}", s.forces);
        }
    }

    #[test]
    fn bias_keeps_running_source_running() {
        let settings = SensorSettings::new(1, "FT1");
        let src = SimulatedSource::new(5000, Waveform::Constant([2.0; 6]));
        let mut sensor = Sensor::new(&settings, Box::new(src), Clock::new()).unwrap();
        sensor.start_data_acquisition().unwrap();
        let mean = sensor.determine_bias(10).unwrap();
        assert_eq!(mean, [2.0; 6]);
        assert!(sensor.is_acquiring());
    }

    #[test]
    fn reversed_channels_and_trigger_floor() {
        let mut settings = SensorSettings::new(4, "FT4");
        settings.reverse_channels = vec![ForceChannel::Fy, ForceChannel::Tz];
        let mut sensor = Sensor::new(&settings, fixed([1.0; 6], [0.5, 1.2]), Clock::new()).unwrap();
        sensor.start_data_acquisition().unwrap();

        let s = sensor.poll_data(9).unwrap();
        assert_eq!(s.device_id, 4);
        assert_eq!(s.seq, 9);
        assert_eq!(s.forces, [1.0, -1.0, 1.0, 1.0, 1.0, -1.0]);
        assert_eq!(s.trigger, [0.0, 1.2]);
    }

    #[test]
    fn missing_calibration_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = SensorSettings::new(1, "FT404");
        settings.convert_to_ft = true;
        settings.calibration_folder = dir.path().to_path_buf();

        let err = Sensor::new(&settings, fixed([0.0; 6], [0.0; 2]), Clock::new()).err().unwrap();
        assert!(matches!(err, DaqError::CalibrationNotFound { .. }));
    }
}
