//! config.rs
//! Explicit configuration passed to the recorder, workers and reconciler.
//!
//! Nothing here is process-wide: every struct is handed over at construction.
//! All structs deserialize from TOML with defaults for omitted keys.

use std::{fs, path::{Path, PathBuf}};

use serde::Deserialize;

use crate::acquisition::types::ForceChannel;
use crate::error::{DaqError, Result};

pub const DEFAULT_RATE_HZ: u32 = 1_000;
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_UDP_PORT: u16 = 5005;

/// Scheduling class requested for a sensor worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingPriority {
    #[default]
    Normal,
    High,
    RealTime,
}

impl PollingPriority {
    /// Lenient parse: anything mentioning "real" and "time" is real-time,
    /// anything starting with "high" is high, the rest is normal.
    pub fn from_label(label: &str) -> Self {
        let l = label.to_ascii_lowercase();
        if l.contains("real") && l.contains("time") {
            PollingPriority::RealTime
        } else if l.starts_with("high") {
            PollingPriority::High
        } else {
            PollingPriority::Normal
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub device_id: u16,
    pub sensor_name: String,
    pub calibration_folder: PathBuf,
    pub rate_hz: u32,
    /// Convert voltages to forces/torques with the sensor's calibration file.
    pub convert_to_ft: bool,
    /// Channels whose sign is inverted after conversion.
    pub reverse_channels: Vec<ForceChannel>,
    pub priority: PollingPriority,
    pub cpu_core: Option<usize>,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            device_id: 1,
            sensor_name: String::new(),
            calibration_folder: PathBuf::from("calibration"),
            rate_hz: DEFAULT_RATE_HZ,
            convert_to_ft: false,
            reverse_channels: Vec::new(),
            priority: PollingPriority::Normal,
            cpu_core: None,
        }
    }
}

impl SensorSettings {
    pub fn new(device_id: u16, sensor_name: &str) -> Self {
        Self {
            device_id,
            sensor_name: sensor_name.to_string(),
            ..Self::default()
        }
    }

    /// Rejects settings no worker could run with.
    pub fn validate(&self) -> Result<()> {
        if self.sensor_name.trim().is_empty() {
            return Err(DaqError::InvalidSettings(format!(
                "device {} has no sensor name",
                self.device_id
            )));
        }
        if self.rate_hz == 0 {
            return Err(DaqError::InvalidSettings(format!(
                "sensor '{}' has a sampling rate of 0 Hz",
                self.sensor_name
            )));
        }
        Ok(())
    }
}

/// Which columns a data row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputColumns {
    pub device_id: bool,
    pub forces: [bool; 6],
    pub triggers: [bool; 2],
}

impl Default for OutputColumns {
    fn default() -> Self {
        Self {
            device_id: false,
            forces: [true, true, true, false, false, false],
            triggers: [true, false],
        }
    }
}

impl OutputColumns {
    pub fn all() -> Self {
        Self {
            device_id: true,
            forces: [true; 6],
            triggers: [true; 2],
        }
    }
}

/// How a worker hands samples to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandOffMode {
    /// Accumulate while polling, ship in chunks after pause.
    #[default]
    Buffered,
    /// Push every item as soon as it is produced.
    Streaming,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub sensors: Vec<SensorSettings>,
    pub columns: OutputColumns,
    pub hand_off: HandOffMode,
    pub chunk_size: usize,
    pub poll_remote: bool,
    pub udp_port: u16,
    pub pause_grace_ms: u64,
    pub bias_samples: usize,
    pub float_decimals: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sensors: Vec::new(),
            columns: OutputColumns::default(),
            hand_off: HandOffMode::Buffered,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_remote: false,
            udp_port: DEFAULT_UDP_PORT,
            pause_grace_ms: 500,
            bias_samples: 1_000,
            float_decimals: 4,
        }
    }
}

impl RecorderConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Parameters of the offline timestamp reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Minimum gap (ms) between two samples treated as a pause.
    pub pause_criterion_ms: i64,
    /// Nominal sampling interval (ms).
    pub interval_ms: i64,
    pub reference_probe_start: usize,
    pub reference_probe_len: usize,
    /// Gap thresholds tried in order when looking for the reference sample.
    pub delay_thresholds_ms: Vec<i64>,
    /// Accept periods without a closing `Paused` event.
    pub allow_open_periods: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pause_criterion_ms: 500,
            interval_ms: 1,
            reference_probe_start: 1_000,
            reference_probe_len: 1_000,
            delay_thresholds_ms: vec![10, 0],
            allow_open_periods: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_labels() {
        assert_eq!(PollingPriority::from_label("real_time"), PollingPriority::RealTime);
        assert_eq!(PollingPriority::from_label("Realtime"), PollingPriority::RealTime);
        assert_eq!(PollingPriority::from_label("high"), PollingPriority::High);
        assert_eq!(PollingPriority::from_label("whatever"), PollingPriority::Normal);
    }

    #[test]
    fn recorder_config_from_toml() {
        let text = r#"
            poll_remote = true
            pause_grace_ms = 100

            [columns]
            device_id = true

            [[sensors]]
            device_id = 1
            sensor_name = "FT30436"
            priority = "high"

            [[sensors]]
            device_id = 2
            sensor_name = "FT30437"
            reverse_channels = ["Fz"]
        "#;
        let cfg = RecorderConfig::from_toml_str(text).unwrap();
        assert!(cfg.poll_remote);
        assert_eq!(cfg.pause_grace_ms, 100);
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(cfg.columns.device_id);
        assert_eq!(cfg.columns.forces, [true, true, true, false, false, false]);
        assert_eq!(cfg.sensors.len(), 2);
        assert_eq!(cfg.sensors[0].priority, PollingPriority::High);
        assert_eq!(cfg.sensors[1].reverse_channels, vec![ForceChannel::Fz]);
        assert_eq!(cfg.sensors[1].rate_hz, DEFAULT_RATE_HZ);
    }

    #[test]
    fn settings_validation() {
        assert!(SensorSettings::new(1, "FT1").validate().is_ok());

        let err = SensorSettings::new(1, " ").validate().unwrap_err();
        assert!(err.is_construction_error());

        let mut s = SensorSettings::new(1, "FT1");
        s.rate_hz = 0;
        assert!(matches!(s.validate(), Err(DaqError::InvalidSettings(_))));
    }
}
