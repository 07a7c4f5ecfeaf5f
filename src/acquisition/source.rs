//! source.rs
//! Analog Source: the hardware polling primitive behind every sensor worker.
//! - `AnalogSource` is the seam a real DAQ driver plugs into.
//! - `SimulatedSource` paces itself like a DAQ clocked at `rate_hz` (one sample per period).

use std::time::{Duration, Instant};

use rand::random_range;

use crate::acquisition::clock::sleeper;
use crate::error::{DaqError, Result};

/// One read of all analog input lines: six gauge voltages plus two trigger lines.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawSample {
    pub voltages: [f32; 6],
    pub trigger: [f32; 2],
}

pub trait AnalogSource: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    /// Blocks until the next sample is available.
    fn read(&mut self) -> Result<RawSample>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Slow sinusoids on the first three channels around 10 V.
    Sine,
    Constant([f32; 6]),
}

pub struct SimulatedSource {
    period: Duration,
    waveform: Waveform,
    noise: f32,
    started_at: Option<Instant>,
    sample_cnt: u64,
}

impl SimulatedSource {
    pub fn new(rate_hz: u32, waveform: Waveform) -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64),
            waveform,
            noise: 0.0,
            started_at: None,
            sample_cnt: 0,
        }
    }

    /// Adds uniform noise in `-amplitude..amplitude` to every voltage.
    pub fn with_noise(mut self, amplitude: f32) -> Self {
        self.noise = amplitude.abs();
        self
    }

    fn voltages(&self) -> [f32; 6] {
        let mut v = match self.waveform {
            Waveform::Sine => {
                let x = self.sample_cnt as f32 / 2000.0;
                [
                    10.0 + (x / 2.0).sin() * 10.0,
                    10.0 + (x / 5.0).cos() * 10.0,
                    10.0 + x.sin() * 10.0,
                    0.0,
                    0.0,
                    0.0,
                ]
            }
            Waveform::Constant(values) => values,
        };
        if self.noise > 0.0 {
            for x in v.iter_mut() {
                *x += random_range(-self.noise..self.noise);
            }
        }
        v
    }
}

impl AnalogSource for SimulatedSource {
    fn start(&mut self) -> Result<()> {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
            self.sample_cnt = 0;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.started_at = None;
    }

    fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    fn read(&mut self) -> Result<RawSample> {
        let started = self
            .started_at
            .ok_or_else(|| DaqError::Source("read before start".into()))?;

        // Sample k is due k periods after start.
        let due = started + self.period.mul_f64((self.sample_cnt + 1) as f64);
        let now = Instant::now();
        if now < due {
            sleeper().sleep(due - now);
        }

        self.sample_cnt += 1;
        Ok(RawSample {
            voltages: self.voltages(),
            trigger: [0.0; 2],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_requires_start() {
        let mut src = SimulatedSource::new(1000, Waveform::Sine);
        assert!(matches!(src.read(), Err(DaqError::Source(_))));
        src.start().unwrap();
        assert!(src.is_running());
        assert!(src.read().is_ok());
        src.stop();
        assert!(!src.is_running());
    }

    #[test]
    fn reads_are_paced_by_rate() {
        let mut src = SimulatedSource::new(1000, Waveform::Constant([1.0; 6]));
        src.start().unwrap();
        let t0 = Instant::now();
        for _ in 0..20 {
            let s = src.read().unwrap();
            assert_eq!(s.voltages, [1.0; 6]);
        }
        assert!(t0.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn noise_stays_within_amplitude() {
        let mut src = SimulatedSource::new(10_000, Waveform::Constant([0.0; 6])).with_noise(0.5);
        src.start().unwrap();
        for _ in 0..50 {
            let s = src.read().unwrap();
            assert!(s.voltages.iter().all(|v| v.abs() < 0.5));
        }
    }
}
