//! error.rs
//! Error taxonomy for acquisition, recording and offline reconciliation.
//!
//! - **Construction:** `InvalidSettings`, `CalibrationNotFound`, `Calibration` (fatal for one sensor).
//! - **Protocol:** start without bias, bias while polling (raised synchronously to the caller).
//! - **Reconciliation:** period count mismatch; aborts the whole conversion, no output file.
//! - Everything non-fatal (period drift, missing reference sample) is logged, never returned.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("invalid sensor settings: {0}")]
    InvalidSettings(String),

    #[error("can't find calibration file for sensor '{sensor}' in {folder:?}")]
    CalibrationNotFound { sensor: String, folder: PathBuf },

    #[error("malformed calibration file {path:?}: {reason}")]
    Calibration { path: PathBuf, reason: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(
        "pauses in lifecycle events do not match recording pauses \
         ({from_timestamps} periods from timestamps, {from_events} from events)"
    )]
    ReconciliationInconsistency {
        from_timestamps: usize,
        from_events: usize,
    },

    #[error("recording holds {devices} devices but has no device_tag column")]
    AmbiguousDevices { devices: usize },

    #[error("analog source error: {0}")]
    Source(String),

    #[error("malformed recording, line {line}: {reason}")]
    Format { line: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// True for errors that abort construction of a single sensor.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            DaqError::InvalidSettings(_)
                | DaqError::CalibrationNotFound { .. }
                | DaqError::Calibration { .. }
        )
    }
}
